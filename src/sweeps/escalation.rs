use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{SweepOptions, SweepSummary};
use crate::gates::dedup;
use crate::models::alert::{ActivityEntry, Alert, EscalationUpdate, RiskEscalation};
use crate::models::notification::NotificationDecision;
use crate::notify::dispatcher::DispatchReport;
use crate::policy::TenantPolicy;
use crate::processor::pipeline::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Escalated,
    Capped,
    AlreadyClaimed,
}

/// Re-notifies unacknowledged alerts one tier higher once their escalation slot is due.
pub async fn run(engine: &Engine, opts: SweepOptions, now: DateTime<Utc>) -> Result<SweepSummary> {
    let mut summary = SweepSummary::new("escalation", &opts);
    let due = engine
        .store
        .alerts_due_for_escalation(opts.tenant_id, now)
        .await?;

    let mut policies: HashMap<Uuid, TenantPolicy> = HashMap::new();
    for alert in due {
        summary.examined += 1;
        if !policies.contains_key(&alert.tenant_id) {
            match engine.policy(alert.tenant_id).await {
                Ok(policy) => {
                    policies.insert(alert.tenant_id, policy);
                }
                Err(e) => {
                    error!(
                        "Escalation skipped alert {}: policy for tenant {} unavailable: {:#}",
                        alert.alert_id, alert.tenant_id, e
                    );
                    summary.failed += 1;
                    continue;
                }
            }
        }
        let Some(policy) = policies.get(&alert.tenant_id) else {
            continue;
        };

        match escalate(engine, &alert, policy, opts.dry_run, now).await {
            Ok(Step::Escalated) => summary.updated += 1,
            Ok(Step::Capped) | Ok(Step::AlreadyClaimed) => summary.skipped += 1,
            Err(e) => {
                error!("Escalation of alert {} failed: {:#}", alert.alert_id, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Escalation sweep: {} due, {} escalated, {} skipped, {} failed",
        summary.examined, summary.updated, summary.skipped, summary.failed
    );
    Ok(summary)
}

async fn escalate(
    engine: &Engine,
    alert: &Alert,
    policy: &TenantPolicy,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<Step> {
    let store = engine.store.as_ref();
    let max = policy.escalation.max_escalations;

    if alert.escalation_level >= max {
        if !dry_run {
            store
                .update_escalation(
                    alert.alert_id,
                    &EscalationUpdate {
                        escalation_level: alert.escalation_level,
                        escalation_count: alert.escalation_count,
                        risk_escalation: alert.risk_escalation,
                        next_escalation_at: None,
                        last_escalated_at: alert.last_escalated_at,
                    },
                    now,
                )
                .await?;
        }
        return Ok(Step::Capped);
    }

    let level = alert.escalation_level + 1;
    let tier = alert.risk_escalation.next();
    if dry_run {
        info!(
            "[dry-run] Alert {} would escalate to level {} ({})",
            alert.alert_id, level, tier
        );
        return Ok(Step::Escalated);
    }

    // Two sweeps racing on the same alert: only the one that claims the level proceeds.
    let claim = format!("escalation:{}:{}", alert.alert_id, level);
    if dedup::is_duplicate(store, &claim, policy.dedupe.ttl_hours, now).await? {
        info!("Escalation {} already claimed", claim);
        return Ok(Step::AlreadyClaimed);
    }

    // A step that did not land gives its claim back so the next sweep retries it.
    let (decision, report) = match step_up(engine, alert, policy, level, tier, now).await {
        Ok(done) => done,
        Err(e) => {
            if let Err(release_err) = dedup::release(store, &claim).await {
                warn!("Could not release {}: {:#}", claim, release_err);
            }
            return Err(e);
        }
    };

    store
        .append_activity(&ActivityEntry::new(
            alert.alert_id,
            None,
            "escalated",
            json!({
                "level": level,
                "tier": tier.as_str(),
                "decision_id": decision.decision_id,
                "attempted": report.attempted,
                "succeeded": report.succeeded,
            }),
            now,
        ))
        .await?;

    info!(
        "Alert {} escalated to level {} ({}), {} of {} sends ok",
        alert.alert_id, level, tier, report.succeeded, report.attempted
    );
    Ok(Step::Escalated)
}

async fn step_up(
    engine: &Engine,
    alert: &Alert,
    policy: &TenantPolicy,
    level: i32,
    tier: RiskEscalation,
    now: DateTime<Utc>,
) -> Result<(NotificationDecision, DispatchReport)> {
    let (decision, report) = engine
        .decide_and_dispatch(alert, None, tier, policy, now)
        .await?;

    let next_escalation_at = if level < policy.escalation.max_escalations {
        Some(now + Duration::minutes(policy.escalation.interval_minutes))
    } else {
        None
    };
    engine
        .store
        .update_escalation(
            alert.alert_id,
            &EscalationUpdate {
                escalation_level: level,
                escalation_count: alert.escalation_count + 1,
                risk_escalation: tier,
                next_escalation_at,
                last_escalated_at: Some(now),
            },
            now,
        )
        .await?;
    Ok((decision, report))
}
