//! Per-tenant engine policy.
//!
//! Tenants store partial overrides as JSON; every field falls back to its default,
//! and the escalation matrix merges tier by tier.

use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::alert::RiskEscalation;
use crate::models::notification::Channel;
use crate::models::signal::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRoute {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub recipient_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelToggles {
    pub sms: bool,
    pub whatsapp: bool,
    pub voice: bool,
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            sms: true,
            whatsapp: true,
            voice: true,
        }
    }
}

impl ChannelToggles {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.sms,
            Channel::Whatsapp => self.whatsapp,
            Channel::Voice => self.voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaTarget {
    pub ack_minutes: i64,
    pub resolve_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPolicy {
    pub critical: SlaTarget,
    pub warning: SlaTarget,
    pub info: SlaTarget,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical: SlaTarget {
                ack_minutes: 5,
                resolve_minutes: 60,
            },
            warning: SlaTarget {
                ack_minutes: 15,
                resolve_minutes: 240,
            },
            info: SlaTarget {
                ack_minutes: 60,
                resolve_minutes: 1440,
            },
        }
    }
}

impl SlaPolicy {
    pub fn for_severity(&self, severity: Severity) -> SlaTarget {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub interval_minutes: i64,
    pub max_escalations: i32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            max_escalations: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupePolicy {
    pub ttl_hours: i64,
}

impl Default for DedupePolicy {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlePolicy {
    pub window_minutes: i64,
    pub max_count: i64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            max_count: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalePolicy {
    pub enabled: bool,
    pub threshold_minutes: i64,
    pub cooldown_minutes: i64,
}

impl Default for StalePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_minutes: 60,
            cooldown_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternPolicy {
    pub window_hours: i64,
    pub threshold: usize,
    pub bucket_minutes: i64,
    pub significant_behaviors: Vec<String>,
}

impl Default for PatternPolicy {
    fn default() -> Self {
        Self {
            window_hours: 4,
            threshold: 3,
            bucket_minutes: 30,
            significant_behaviors: [
                "crash",
                "near_collision",
                "harsh_brake",
                "harsh_acceleration",
                "harsh_turn",
                "speeding",
                "severe_speeding",
                "distracted_driving",
                "drowsiness",
                "mobile_usage",
                "following_distance",
                "rolling_stop",
                "panic_button",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPolicy {
    pub escalation_matrix: HashMap<RiskEscalation, EscalationRoute>,
    pub channels: ChannelToggles,
    pub sla: SlaPolicy,
    pub escalation: EscalationPolicy,
    pub dedupe: DedupePolicy,
    pub throttle: ThrottlePolicy,
    pub stale: StalePolicy,
    pub patterns: PatternPolicy,
    pub max_investigations: i32,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            escalation_matrix: default_matrix(),
            channels: ChannelToggles::default(),
            sla: SlaPolicy::default(),
            escalation: EscalationPolicy::default(),
            dedupe: DedupePolicy::default(),
            throttle: ThrottlePolicy::default(),
            stale: StalePolicy::default(),
            patterns: PatternPolicy::default(),
            max_investigations: 3,
        }
    }
}

fn default_matrix() -> HashMap<RiskEscalation, EscalationRoute> {
    let route = |channels: &[Channel], types: &[&str]| EscalationRoute {
        channels: channels.to_vec(),
        recipient_types: types.iter().map(|t| t.to_string()).collect(),
    };
    HashMap::from([
        (RiskEscalation::Monitor, route(&[], &[])),
        (
            RiskEscalation::Warn,
            route(&[Channel::Whatsapp], &["fleet_manager"]),
        ),
        (
            RiskEscalation::Call,
            route(
                &[Channel::Sms, Channel::Whatsapp, Channel::Voice],
                &["fleet_manager", "supervisor"],
            ),
        ),
        (
            RiskEscalation::Emergency,
            route(
                &[Channel::Sms, Channel::Whatsapp, Channel::Voice],
                &["fleet_manager", "supervisor", "emergency_contact"],
            ),
        ),
    ])
}

impl TenantPolicy {
    /// Merges a tenant's JSON overrides over the defaults and validates the result.
    pub fn from_overrides(overrides: &Value) -> Result<Self> {
        if overrides.is_null() {
            return Ok(Self::default());
        }
        let mut policy: TenantPolicy = serde_json::from_value(overrides.clone())
            .context("Tenant settings do not match the policy schema")?;
        for (tier, route) in default_matrix() {
            policy.escalation_matrix.entry(tier).or_insert(route);
        }
        policy.validate()?;
        Ok(policy)
    }

    /// Like `from_overrides`, but invalid settings degrade to defaults so a sweep can continue.
    pub fn load_or_default(tenant_id: Uuid, overrides: &Value) -> Self {
        match Self::from_overrides(overrides) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "Invalid settings for tenant {}: {:#}. Falling back to defaults.",
                    tenant_id, e
                );
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.dedupe.ttl_hours > 0, "dedupe.ttl_hours must be positive");
        ensure!(
            self.throttle.window_minutes > 0 && self.throttle.max_count > 0,
            "throttle window and max_count must be positive"
        );
        ensure!(
            self.escalation.interval_minutes > 0,
            "escalation.interval_minutes must be positive"
        );
        ensure!(
            self.escalation.max_escalations >= 0,
            "escalation.max_escalations cannot be negative"
        );
        ensure!(
            self.stale.threshold_minutes > 0 && self.stale.cooldown_minutes >= 0,
            "stale thresholds must be positive"
        );
        ensure!(
            self.patterns.threshold >= 1 && self.patterns.window_hours > 0,
            "pattern threshold and window must be positive"
        );
        ensure!(
            self.patterns.bucket_minutes > 0,
            "patterns.bucket_minutes must be positive"
        );
        ensure!(
            self.max_investigations >= 1,
            "max_investigations must be at least 1"
        );
        for target in [self.sla.critical, self.sla.warning, self.sla.info] {
            ensure!(
                target.ack_minutes > 0 && target.resolve_minutes >= target.ack_minutes,
                "SLA resolve time must not be shorter than ack time"
            );
        }
        Ok(())
    }

    pub fn route(&self, tier: RiskEscalation) -> EscalationRoute {
        self.escalation_matrix
            .get(&tier)
            .cloned()
            .unwrap_or(EscalationRoute {
                channels: Vec::new(),
                recipient_types: Vec::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_overrides_yield_defaults() {
        let policy = TenantPolicy::from_overrides(&json!({})).unwrap();
        assert_eq!(policy, TenantPolicy::default());
        assert_eq!(policy.dedupe.ttl_hours, 24);
        assert_eq!(policy.throttle.window_minutes, 30);
        assert_eq!(policy.throttle.max_count, 5);
        assert_eq!(policy.max_investigations, 3);
    }

    #[test]
    fn test_partial_overrides_merge() {
        let policy = TenantPolicy::from_overrides(&json!({
            "escalation_matrix": {
                "call": { "channels": ["sms"], "recipient_types": ["owner"] }
            },
            "stale": { "threshold_minutes": 30 },
            "channels": { "voice": false }
        }))
        .unwrap();

        assert_eq!(policy.route(RiskEscalation::Call).channels, vec![Channel::Sms]);
        assert_eq!(
            policy.route(RiskEscalation::Emergency),
            default_matrix()[&RiskEscalation::Emergency]
        );
        assert_eq!(policy.stale.threshold_minutes, 30);
        assert_eq!(policy.stale.cooldown_minutes, 240);
        assert!(!policy.channels.voice);
        assert!(policy.channels.sms);
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        assert!(TenantPolicy::from_overrides(&json!({ "throttle": { "max_count": 0 } })).is_err());
        assert!(TenantPolicy::from_overrides(&json!({ "escalation_matrix": { "urgent": {} } })).is_err());

        let fallback = TenantPolicy::load_or_default(
            Uuid::new_v4(),
            &json!({ "dedupe": { "ttl_hours": -1 } }),
        );
        assert_eq!(fallback, TenantPolicy::default());
    }
}
