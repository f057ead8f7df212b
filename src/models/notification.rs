use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::alert::RiskEscalation;
use super::text_enum;

text_enum!(
    /// Closed set of escalation levels a decision can carry.
    EscalationLevel {
        Emergency => "emergency",
        Critical => "critical",
        High => "high",
        Low => "low",
        None => "none",
    }
);

impl EscalationLevel {
    /// Unrecognized levels become `Critical`: over-notify rather than drop.
    pub fn normalize(raw: &str) -> EscalationLevel {
        raw.parse().unwrap_or(EscalationLevel::Critical)
    }

    pub fn for_risk(tier: RiskEscalation) -> EscalationLevel {
        match tier {
            RiskEscalation::Emergency => EscalationLevel::Emergency,
            RiskEscalation::Call => EscalationLevel::Critical,
            RiskEscalation::Warn => EscalationLevel::High,
            RiskEscalation::Monitor => EscalationLevel::Low,
        }
    }
}

text_enum!(
    Channel {
        Sms => "sms",
        Whatsapp => "whatsapp",
        Voice => "voice",
    }
);

/// Tenant contact eligible to receive notifications.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub recipient_type: String,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub priority: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct NotificationRecipient {
    pub contact_id: Option<Uuid>,
    pub recipient_type: String,
    pub name: String,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub priority: i32,
}

impl NotificationRecipient {
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            contact_id: Some(contact.contact_id),
            recipient_type: contact.recipient_type.clone(),
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            whatsapp: contact.whatsapp.clone(),
            priority: contact.priority,
        }
    }

    /// Address to use on `channel`; WhatsApp falls back to the phone number.
    pub fn destination(&self, channel: Channel) -> Option<&str> {
        fn pick(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        match channel {
            Channel::Sms | Channel::Voice => pick(&self.phone),
            Channel::Whatsapp => pick(&self.whatsapp).or_else(|| pick(&self.phone)),
        }
    }
}

/// One decision per alert escalation event. Persisted even when `should_notify` is false.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationDecision {
    pub decision_id: Uuid,
    pub tenant_id: Uuid,
    pub alert_id: Option<Uuid>,
    pub should_notify: bool,
    pub escalation_level: EscalationLevel,
    pub risk_escalation: RiskEscalation,
    pub channels: Vec<Channel>,
    pub message: String,
    pub voice_script: Option<String>,
    pub reason: String,
    pub recipients: Vec<NotificationRecipient>,
    pub created_at: DateTime<Utc>,
}

impl NotificationDecision {
    /// Turns the decision into an audit-only record with no recipients.
    pub fn suppress(&mut self, reason: impl Into<String>) {
        self.should_notify = false;
        self.recipients.clear();
        self.reason = reason.into();
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.as_str().to_string()).collect()
    }
}

text_enum!(
    DeliveryStatus {
        Queued => "queued",
        Sending => "sending",
        Sent => "sent",
        Ringing => "ringing",
        InProgress => "in_progress",
        Delivered => "delivered",
        Read => "read",
        Completed => "completed",
        Failed => "failed",
        Undelivered => "undelivered",
        Busy => "busy",
        NoAnswer => "no_answer",
    }
);

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Read
                | DeliveryStatus::Failed
                | DeliveryStatus::Undelivered
        )
    }
}

/// One row per (channel, recipient) delivery attempt.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationResult {
    pub result_id: Uuid,
    pub decision_id: Uuid,
    pub channel: String,
    pub recipient_name: String,
    pub destination: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub provider_id: Option<String>,
    pub delivery_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationResult {
    pub fn is_terminal(&self) -> bool {
        self.delivery_status
            .as_deref()
            .and_then(|s| s.parse::<DeliveryStatus>().ok())
            .is_some_and(|s| s.is_terminal())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeliveryEvent {
    pub event_id: Uuid,
    pub result_id: Uuid,
    pub status: String,
    pub provider_code: Option<String>,
    pub provider_message: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_level_becomes_critical() {
        assert_eq!(EscalationLevel::normalize("URGENT"), EscalationLevel::Critical);
        assert_eq!(EscalationLevel::normalize(""), EscalationLevel::Critical);
        assert_eq!(EscalationLevel::normalize(" None "), EscalationLevel::None);
        assert_eq!(EscalationLevel::normalize("HIGH"), EscalationLevel::High);
    }

    #[test]
    fn test_whatsapp_falls_back_to_phone() {
        let r = NotificationRecipient {
            contact_id: None,
            recipient_type: "fleet_manager".into(),
            name: "Ana".into(),
            phone: Some("+5215550001".into()),
            whatsapp: Some("  ".into()),
            priority: 1,
        };
        assert_eq!(r.destination(Channel::Whatsapp), Some("+5215550001"));
        assert_eq!(r.destination(Channel::Voice), Some("+5215550001"));
    }

    #[test]
    fn test_terminal_statuses() {
        for s in ["delivered", "read", "failed", "undelivered"] {
            assert!(s.parse::<DeliveryStatus>().unwrap().is_terminal());
        }
        assert!(!DeliveryStatus::Sent.is_terminal());
    }
}
