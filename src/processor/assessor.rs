use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, DurationRound};

use crate::models::alert::{Alert, Assessment, RiskEscalation};
use crate::models::signal::{Severity, Signal};

/// What the decision-maker concluded about an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentOutcome {
    Complete {
        assessment: Assessment,
        message: Option<String>,
    },
    /// Not enough evidence yet; look again after `next_check_minutes`.
    Investigate {
        assessment: Assessment,
        message: Option<String>,
        next_check_minutes: i32,
    },
}

/// Upstream decision-maker. Its verdict is treated as opaque input.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(&self, alert: &Alert, signals: &[Signal]) -> Result<AssessmentOutcome>;
}

/// Minutes between looks at an alert whose behavior is not labelled yet.
const UNLABELLED_RECHECK_MINUTES: i32 = 10;

/// Events of the same behavior on the same vehicle inside this bucket share a dedupe key.
const DEDUPE_BUCKET_MINUTES: i64 = 5;

/// Deterministic assessor driven by behavior labels and severity.
#[derive(Debug, Default, Clone)]
pub struct RuleAssessor;

impl RuleAssessor {
    fn dedupe_key(alert: &Alert) -> String {
        let bucket = alert
            .occurred_at
            .duration_trunc(Duration::minutes(DEDUPE_BUCKET_MINUTES))
            .unwrap_or(alert.occurred_at);
        format!(
            "{}:{}:{}:{}",
            alert.tenant_id,
            alert.vehicle_id.as_deref().unwrap_or("-"),
            alert.behavior,
            bucket.timestamp()
        )
    }
}

#[async_trait]
impl Assessor for RuleAssessor {
    async fn assess(&self, alert: &Alert, signals: &[Signal]) -> Result<AssessmentOutcome> {
        let labelled = signals.iter().any(|s| !s.behavior_labels.is_empty());
        if !labelled {
            return Ok(AssessmentOutcome::Investigate {
                assessment: Assessment {
                    verdict: Some("awaiting_labels".into()),
                    likelihood: Some("unknown".into()),
                    reasoning: Some("provider has not labelled the event yet".into()),
                    dedupe_key: Some(Self::dedupe_key(alert)),
                    ..Default::default()
                },
                message: None,
                next_check_minutes: UNLABELLED_RECHECK_MINUTES,
            });
        }

        let panic = signals.iter().any(|s| s.is_panic());
        let (tier, likelihood, confidence) = if panic {
            (RiskEscalation::Emergency, "high", 0.95)
        } else {
            match alert.severity {
                Severity::Critical => (RiskEscalation::Call, "high", 0.9),
                Severity::Warning => (RiskEscalation::Warn, "medium", 0.75),
                Severity::Info => (RiskEscalation::Monitor, "low", 0.5),
            }
        };

        let message = format!(
            "{} signal(s) reporting {}",
            signals.len(),
            alert.behavior.replace('_', " ")
        );
        Ok(AssessmentOutcome::Complete {
            assessment: Assessment {
                verdict: Some("confirmed_event".into()),
                likelihood: Some(likelihood.into()),
                confidence: Some(confidence),
                reasoning: Some(format!("severity {} maps to tier {}", alert.severity, tier)),
                dedupe_key: Some(Self::dedupe_key(alert)),
                risk_escalation: Some(tier),
                escalation_level: None,
                should_notify: tier != RiskEscalation::Monitor,
                voice_script: None,
            },
            message: Some(message),
        })
    }
}
