use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::alert::{Alert, Assessment, RiskEscalation};
use crate::models::notification::{
    Channel, Contact, EscalationLevel, NotificationDecision, NotificationRecipient,
};
use crate::models::stale_asset::VehicleStat;
use crate::policy::TenantPolicy;

/// Resolves route recipients from tenant contacts, ordered by priority.
pub fn resolve_recipients(
    recipient_types: &[String],
    contacts: &[Contact],
) -> Vec<NotificationRecipient> {
    let mut matched: Vec<&Contact> = contacts
        .iter()
        .filter(|c| c.active && recipient_types.iter().any(|t| t == &c.recipient_type))
        .collect();
    matched.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    matched.dedup_by_key(|c| c.contact_id);
    matched
        .into_iter()
        .map(NotificationRecipient::from_contact)
        .collect()
}

fn enabled_channels(policy: &TenantPolicy, tier: RiskEscalation) -> Vec<Channel> {
    policy
        .route(tier)
        .channels
        .into_iter()
        .filter(|c| policy.channels.is_enabled(*c))
        .collect()
}

fn compose_message(alert: &Alert, level: EscalationLevel) -> String {
    let mut msg = format!(
        "[{}] {} - {} at {}",
        level.as_str().to_uppercase(),
        alert.behavior.replace('_', " "),
        alert.subject_label(),
        alert.occurred_at.format("%Y-%m-%d %H:%M UTC"),
    );
    if let Some(detail) = alert.ai_message.as_deref().filter(|m| !m.trim().is_empty()) {
        msg.push_str(". ");
        msg.push_str(detail.trim());
    }
    msg
}

fn compose_voice_script(alert: &Alert) -> String {
    format!(
        "Safety alert. {} reported for {}. Please acknowledge this alert in the console.",
        alert.behavior.replace('_', " "),
        alert.subject_label()
    )
}

/// Builds the notification decision for `alert` at risk tier `tier`.
///
/// The decision always comes back, even when nobody should be notified, so it can be
/// persisted for audit.
pub fn build_decision(
    alert: &Alert,
    assessment: Option<&Assessment>,
    tier: RiskEscalation,
    policy: &TenantPolicy,
    contacts: &[Contact],
    now: DateTime<Utc>,
) -> NotificationDecision {
    let escalation_level = assessment
        .and_then(|a| a.escalation_level.as_deref())
        .map(EscalationLevel::normalize)
        .unwrap_or_else(|| EscalationLevel::for_risk(tier));

    let route = policy.route(tier);
    let channels = enabled_channels(policy, tier);
    let recipients = resolve_recipients(&route.recipient_types, contacts);

    let upstream_says_notify = assessment.map_or(true, |a| a.should_notify);
    let reason = if !upstream_says_notify {
        "assessment declined notification".to_string()
    } else if escalation_level == EscalationLevel::None {
        "escalation level is none".to_string()
    } else if channels.is_empty() {
        format!("no enabled channels for tier {}", tier)
    } else if recipients.is_empty() {
        format!("no contacts match tier {} recipient types", tier)
    } else {
        format!(
            "tier {} via {} to {} recipient(s)",
            tier,
            channels
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(","),
            recipients.len()
        )
    };

    let should_notify = upstream_says_notify
        && escalation_level != EscalationLevel::None
        && !channels.is_empty()
        && !recipients.is_empty();

    let voice_script = if channels.contains(&Channel::Voice) {
        Some(
            assessment
                .and_then(|a| a.voice_script.clone())
                .unwrap_or_else(|| compose_voice_script(alert)),
        )
    } else {
        None
    };

    let mut decision = NotificationDecision {
        decision_id: Uuid::new_v4(),
        tenant_id: alert.tenant_id,
        alert_id: Some(alert.alert_id),
        should_notify,
        escalation_level,
        risk_escalation: tier,
        channels,
        message: compose_message(alert, escalation_level),
        voice_script,
        reason: reason.clone(),
        recipients,
        created_at: now,
    };
    if !should_notify {
        decision.suppress(reason);
    }
    decision
}

/// Decision for a vehicle that stopped reporting; routed like a `warn` tier alert.
pub fn build_stale_asset_decision(
    tenant_id: Uuid,
    stat: &VehicleStat,
    policy: &TenantPolicy,
    contacts: &[Contact],
    now: DateTime<Utc>,
) -> NotificationDecision {
    let tier = RiskEscalation::Warn;
    let route = policy.route(tier);
    let channels: Vec<Channel> = enabled_channels(policy, tier)
        .into_iter()
        .filter(|c| *c != Channel::Voice)
        .collect();
    let recipients = resolve_recipients(&route.recipient_types, contacts);

    let name = stat.vehicle_name.as_deref().unwrap_or(&stat.vehicle_id);
    let last_seen = match stat.last_stat_at {
        Some(at) => format!(
            "last report {} minutes ago",
            (now - at).num_minutes().max(0)
        ),
        None => "no telemetry on record".to_string(),
    };

    let should_notify = !channels.is_empty() && !recipients.is_empty();
    let mut decision = NotificationDecision {
        decision_id: Uuid::new_v4(),
        tenant_id,
        alert_id: None,
        should_notify,
        escalation_level: EscalationLevel::High,
        risk_escalation: tier,
        channels,
        message: format!("[STALE] {} stopped reporting telemetry ({})", name, last_seen),
        voice_script: None,
        reason: format!("stale asset {}", stat.vehicle_id),
        recipients,
        created_at: now,
    };
    if !should_notify {
        decision.suppress(format!(
            "stale asset {} has no channels or recipients",
            stat.vehicle_id
        ));
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert_fixture, at, contact};

    fn contacts(tenant: Uuid) -> Vec<Contact> {
        vec![
            contact(tenant, "Zoe", "supervisor", 2),
            contact(tenant, "Ana", "fleet_manager", 1),
            contact(tenant, "Eli", "emergency_contact", 3),
            contact(tenant, "Max", "mechanic", 1),
        ]
    }

    #[test]
    fn test_call_tier_routes_to_matrix_recipients_by_priority() {
        let alert = alert_fixture();
        let policy = TenantPolicy::default();
        let decision = build_decision(
            &alert,
            None,
            RiskEscalation::Call,
            &policy,
            &contacts(alert.tenant_id),
            at(12, 0),
        );

        assert!(decision.should_notify);
        assert_eq!(decision.escalation_level, EscalationLevel::Critical);
        assert_eq!(
            decision.channels,
            vec![Channel::Sms, Channel::Whatsapp, Channel::Voice]
        );
        let names: Vec<&str> = decision.recipients.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Zoe"]);
        assert!(decision.voice_script.is_some());
    }

    #[test]
    fn test_unrecognized_level_is_critical_not_none() {
        let alert = alert_fixture();
        let assessment = Assessment {
            escalation_level: Some("URGENT".into()),
            should_notify: true,
            ..Default::default()
        };
        let decision = build_decision(
            &alert,
            Some(&assessment),
            RiskEscalation::Warn,
            &TenantPolicy::default(),
            &contacts(alert.tenant_id),
            at(12, 0),
        );
        assert_eq!(decision.escalation_level, EscalationLevel::Critical);
        assert!(decision.should_notify);
    }

    #[test]
    fn test_declined_decision_keeps_audit_but_drops_recipients() {
        let alert = alert_fixture();
        let assessment = Assessment {
            escalation_level: Some("none".into()),
            should_notify: true,
            ..Default::default()
        };
        let decision = build_decision(
            &alert,
            Some(&assessment),
            RiskEscalation::Emergency,
            &TenantPolicy::default(),
            &contacts(alert.tenant_id),
            at(12, 0),
        );
        assert!(!decision.should_notify);
        assert!(decision.recipients.is_empty());
        assert_eq!(decision.reason, "escalation level is none");
    }

    #[test]
    fn test_disabled_channels_are_removed() {
        let alert = alert_fixture();
        let mut policy = TenantPolicy::default();
        policy.channels.voice = false;
        policy.channels.sms = false;
        let decision = build_decision(
            &alert,
            None,
            RiskEscalation::Call,
            &policy,
            &contacts(alert.tenant_id),
            at(12, 0),
        );
        assert_eq!(decision.channels, vec![Channel::Whatsapp]);
        assert!(decision.voice_script.is_none());
    }

    #[test]
    fn test_monitor_tier_does_not_notify() {
        let alert = alert_fixture();
        let decision = build_decision(
            &alert,
            None,
            RiskEscalation::Monitor,
            &TenantPolicy::default(),
            &contacts(alert.tenant_id),
            at(12, 0),
        );
        assert!(!decision.should_notify);
        assert!(decision.reason.starts_with("no enabled channels"));
    }
}
