use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::signal::{Severity, Signal};
use super::text_enum;
use crate::error::LifecycleError;

text_enum!(
    /// Progress of the upstream assessment.
    AiStatus {
        Pending => "pending",
        Processing => "processing",
        Investigating => "investigating",
        Completed => "completed",
        Failed => "failed",
    }
);

text_enum!(
    HumanStatus {
        Pending => "pending",
        Reviewed => "reviewed",
        Flagged => "flagged",
        Resolved => "resolved",
        FalsePositive => "false_positive",
    }
);

text_enum!(
    AttentionState {
        NeedsAttention => "needs_attention",
        InProgress => "in_progress",
        Blocked => "blocked",
        Closed => "closed",
    }
);

text_enum!(
    AckStatus {
        Pending => "pending",
        Acked => "acked",
    }
);

text_enum!(
    /// Severity-of-response tier driving channel and recipient selection.
    RiskEscalation {
        Monitor => "monitor",
        Warn => "warn",
        Call => "call",
        Emergency => "emergency",
    }
);

text_enum!(
    SourceRole {
        Primary => "primary",
        Correlated => "correlated",
        Supporting => "supporting",
        Contradicting => "contradicting",
    }
);

impl AiStatus {
    pub fn rank(&self) -> u8 {
        match self {
            AiStatus::Failed => 3,
            AiStatus::Investigating => 2,
            AiStatus::Processing => 1,
            AiStatus::Pending | AiStatus::Completed => 0,
        }
    }

    pub fn can_transition_to(&self, next: AiStatus) -> bool {
        use AiStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Investigating)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Investigating, Processing)
                | (Investigating, Investigating)
                | (Investigating, Completed)
                | (Investigating, Failed)
                | (Completed, Investigating)
                | (Failed, Processing)
        )
    }
}

impl RiskEscalation {
    pub fn rank(&self) -> u8 {
        match self {
            RiskEscalation::Monitor => 1,
            RiskEscalation::Warn => 2,
            RiskEscalation::Call => 3,
            RiskEscalation::Emergency => 4,
        }
    }

    /// One tier up; `Emergency` saturates.
    pub fn next(&self) -> RiskEscalation {
        match self {
            RiskEscalation::Monitor => RiskEscalation::Warn,
            RiskEscalation::Warn => RiskEscalation::Call,
            RiskEscalation::Call | RiskEscalation::Emergency => RiskEscalation::Emergency,
        }
    }

    pub fn for_signal(signal: &Signal) -> RiskEscalation {
        if signal.is_panic() {
            return RiskEscalation::Emergency;
        }
        match signal.severity {
            Severity::Critical => RiskEscalation::Call,
            Severity::Warning => RiskEscalation::Warn,
            Severity::Info => RiskEscalation::Monitor,
        }
    }
}

/// The operator-facing unit of work.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub tenant_id: Uuid,
    pub vehicle_id: Option<String>,
    pub vehicle_name: Option<String>,
    pub driver_id: Option<String>,
    pub driver_name: Option<String>,
    pub behavior: String,
    #[sqlx(try_from = "String")]
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,

    #[sqlx(try_from = "String")]
    pub ai_status: AiStatus,
    pub ai_error: Option<String>,
    pub verdict: Option<String>,
    pub likelihood: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub ai_message: Option<String>,
    pub dedupe_key: Option<String>,
    #[sqlx(try_from = "String")]
    pub risk_escalation: RiskEscalation,
    pub investigation_count: i32,
    pub next_check_minutes: Option<i32>,
    pub last_investigated_at: Option<DateTime<Utc>>,

    #[sqlx(try_from = "String")]
    pub human_status: HumanStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,

    #[sqlx(try_from = "String")]
    pub attention_state: AttentionState,
    #[sqlx(try_from = "String")]
    pub ack_status: AckStatus,
    pub acked_by: Option<Uuid>,
    pub acked_at: Option<DateTime<Utc>>,
    pub ack_due_at: Option<DateTime<Utc>>,
    pub resolve_due_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub escalation_level: i32,
    pub escalation_count: i32,
    pub next_escalation_at: Option<DateTime<Utc>>,
    pub last_escalated_at: Option<DateTime<Utc>>,

    pub owner_user_id: Option<Uuid>,
    pub owner_contact_id: Option<Uuid>,
    pub notification_channels: Vec<String>,
    pub notification_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields owned by the AI-processing transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct AiStateUpdate {
    pub ai_status: AiStatus,
    pub ai_error: Option<String>,
    pub verdict: Option<String>,
    pub likelihood: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub ai_message: Option<String>,
    pub dedupe_key: Option<String>,
    pub risk_escalation: RiskEscalation,
    pub investigation_count: i32,
    pub next_check_minutes: Option<i32>,
    pub last_investigated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HumanStatusUpdate {
    pub human_status: HumanStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: DateTime<Utc>,
    pub attention_state: AttentionState,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckUpdate {
    pub ack_status: AckStatus,
    pub acked_by: Option<Uuid>,
    pub acked_at: DateTime<Utc>,
    pub attention_state: AttentionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationUpdate {
    pub escalation_level: i32,
    pub escalation_count: i32,
    pub risk_escalation: RiskEscalation,
    pub next_escalation_at: Option<DateTime<Utc>>,
    pub last_escalated_at: Option<DateTime<Utc>>,
}

/// Written once a notification for the alert went out.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationStamp {
    pub channels: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub attention_state: AttentionState,
    pub ack_due_at: Option<DateTime<Utc>>,
    pub resolve_due_at: Option<DateTime<Utc>>,
    pub next_escalation_at: Option<DateTime<Utc>>,
}

/// Opaque verdict returned by the upstream decision-maker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct Assessment {
    pub verdict: Option<String>,
    pub likelihood: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub dedupe_key: Option<String>,
    pub risk_escalation: Option<RiskEscalation>,
    pub escalation_level: Option<String>,
    pub should_notify: bool,
    pub voice_script: Option<String>,
}

impl Assessment {
    /// The verdict already stored on a completed alert. The notify flag is not
    /// persisted, so it is read back from the tier.
    pub fn from_alert(alert: &Alert) -> Assessment {
        Assessment {
            verdict: alert.verdict.clone(),
            likelihood: alert.likelihood.clone(),
            confidence: alert.confidence,
            reasoning: alert.reasoning.clone(),
            dedupe_key: alert.dedupe_key.clone(),
            risk_escalation: Some(alert.risk_escalation),
            escalation_level: None,
            should_notify: alert.risk_escalation != RiskEscalation::Monitor,
            voice_script: None,
        }
    }
}

impl Alert {
    /// Builds a fresh alert whose primary source is `signal`.
    pub fn from_signal(signal: &Signal, now: DateTime<Utc>) -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            tenant_id: signal.tenant_id,
            vehicle_id: signal.vehicle_id.clone(),
            vehicle_name: signal.vehicle_name.clone(),
            driver_id: signal.driver_id.clone(),
            driver_name: signal.driver_name.clone(),
            behavior: signal.primary_behavior(),
            severity: signal.severity,
            occurred_at: signal.occurred_at,
            ai_status: AiStatus::Pending,
            ai_error: None,
            verdict: None,
            likelihood: None,
            confidence: None,
            reasoning: None,
            ai_message: None,
            dedupe_key: None,
            risk_escalation: RiskEscalation::for_signal(signal),
            investigation_count: 0,
            next_check_minutes: None,
            last_investigated_at: None,
            human_status: HumanStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            attention_state: AttentionState::InProgress,
            ack_status: AckStatus::Pending,
            acked_by: None,
            acked_at: None,
            ack_due_at: None,
            resolve_due_at: None,
            resolved_at: None,
            escalation_level: 0,
            escalation_count: 0,
            next_escalation_at: None,
            last_escalated_at: None,
            owner_user_id: None,
            owner_contact_id: None,
            notification_channels: Vec::new(),
            notification_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The single "needs attention" predicate used by every listing surface.
    pub fn needs_attention(&self) -> bool {
        match self.attention_state {
            AttentionState::Closed => false,
            AttentionState::NeedsAttention => true,
            AttentionState::InProgress | AttentionState::Blocked => {
                self.human_status == HumanStatus::Pending
                    && (matches!(self.ai_status, AiStatus::Failed | AiStatus::Investigating)
                        || self.severity == Severity::Critical
                        || matches!(
                            self.risk_escalation,
                            RiskEscalation::Call | RiskEscalation::Emergency
                        ))
            }
        }
    }

    /// Sort key for attention queues; compare descending.
    pub fn priority_key(&self) -> (u8, u8, bool, u8, DateTime<Utc>) {
        (
            self.risk_escalation.rank(),
            self.severity.rank(),
            self.human_status == HumanStatus::Pending,
            self.ai_status.rank(),
            self.occurred_at,
        )
    }

    pub fn should_revalidate(&self, now: DateTime<Utc>) -> bool {
        if self.ai_status != AiStatus::Investigating {
            return false;
        }
        match self.last_investigated_at {
            None => true,
            Some(last) => {
                let elapsed = (now - last).num_minutes();
                elapsed >= i64::from(self.next_check_minutes.unwrap_or(0))
            }
        }
    }

    pub fn is_ack_overdue(&self, now: DateTime<Utc>) -> bool {
        self.ack_status == AckStatus::Pending && self.ack_due_at.is_some_and(|due| now > due)
    }

    pub fn is_resolve_overdue(&self, now: DateTime<Utc>) -> bool {
        self.attention_state != AttentionState::Closed
            && self.resolve_due_at.is_some_and(|due| now > due)
    }

    /// `ack_status` agrees with `acked_at`.
    pub fn ack_consistent(&self) -> bool {
        match self.ack_status {
            AckStatus::Pending => self.acked_at.is_none(),
            AckStatus::Acked => self.acked_at.is_some(),
        }
    }

    fn ai_base(&self, status: AiStatus) -> Result<AiStateUpdate, LifecycleError> {
        if !self.ai_status.can_transition_to(status) {
            return Err(LifecycleError::InvalidTransition {
                from: self.ai_status.as_str(),
                to: status.as_str(),
            });
        }
        Ok(AiStateUpdate {
            ai_status: status,
            ai_error: None,
            verdict: self.verdict.clone(),
            likelihood: self.likelihood.clone(),
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
            ai_message: self.ai_message.clone(),
            dedupe_key: self.dedupe_key.clone(),
            risk_escalation: self.risk_escalation,
            investigation_count: self.investigation_count,
            next_check_minutes: self.next_check_minutes,
            last_investigated_at: self.last_investigated_at,
        })
    }

    pub fn processing(&self) -> Result<AiStateUpdate, LifecycleError> {
        self.ai_base(AiStatus::Processing)
    }

    pub fn completed(
        &self,
        assessment: &Assessment,
        message: Option<String>,
    ) -> Result<AiStateUpdate, LifecycleError> {
        let mut update = self.ai_base(AiStatus::Completed)?;
        apply_assessment(&mut update, assessment, message);
        update.next_check_minutes = None;
        Ok(update)
    }

    pub fn investigating(
        &self,
        assessment: &Assessment,
        message: Option<String>,
        next_check_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<AiStateUpdate, LifecycleError> {
        let mut update = self.ai_base(AiStatus::Investigating)?;
        apply_assessment(&mut update, assessment, message);
        update.investigation_count = self.investigation_count + 1;
        update.next_check_minutes = Some(next_check_minutes.max(0));
        update.last_investigated_at = Some(now);
        Ok(update)
    }

    pub fn failed(&self, error: &str) -> Result<AiStateUpdate, LifecycleError> {
        let mut update = self.ai_base(AiStatus::Failed)?;
        update.ai_error = Some(error.to_string());
        Ok(update)
    }

    pub fn human_status_change(
        &self,
        status: HumanStatus,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> HumanStatusUpdate {
        let (attention_state, resolved_at) = match status {
            HumanStatus::Resolved | HumanStatus::FalsePositive => {
                (AttentionState::Closed, Some(self.resolved_at.unwrap_or(now)))
            }
            HumanStatus::Flagged | HumanStatus::Pending => (AttentionState::NeedsAttention, None),
            HumanStatus::Reviewed => (AttentionState::InProgress, None),
        };
        HumanStatusUpdate {
            human_status: status,
            reviewed_by: actor,
            reviewed_at: now,
            attention_state,
            resolved_at,
        }
    }

    pub fn acknowledgement(&self, actor: Option<Uuid>, now: DateTime<Utc>) -> AckUpdate {
        let attention_state = match self.attention_state {
            AttentionState::Closed => AttentionState::Closed,
            _ => AttentionState::InProgress,
        };
        AckUpdate {
            ack_status: AckStatus::Acked,
            acked_by: actor,
            acked_at: self.acked_at.unwrap_or(now),
            attention_state,
        }
    }

    pub fn apply_ai(&mut self, u: &AiStateUpdate, now: DateTime<Utc>) {
        self.ai_status = u.ai_status;
        self.ai_error = u.ai_error.clone();
        self.verdict = u.verdict.clone();
        self.likelihood = u.likelihood.clone();
        self.confidence = u.confidence;
        self.reasoning = u.reasoning.clone();
        self.ai_message = u.ai_message.clone();
        self.dedupe_key = u.dedupe_key.clone();
        self.risk_escalation = u.risk_escalation;
        self.investigation_count = u.investigation_count;
        self.next_check_minutes = u.next_check_minutes;
        self.last_investigated_at = u.last_investigated_at;
        self.updated_at = now;
    }

    pub fn apply_human(&mut self, u: &HumanStatusUpdate) {
        self.human_status = u.human_status;
        self.reviewed_by = u.reviewed_by;
        self.reviewed_at = Some(u.reviewed_at);
        self.attention_state = u.attention_state;
        self.resolved_at = u.resolved_at;
        if u.attention_state == AttentionState::Closed {
            self.next_escalation_at = None;
        }
        self.updated_at = u.reviewed_at;
    }

    pub fn apply_ack(&mut self, u: &AckUpdate) {
        self.ack_status = u.ack_status;
        self.acked_by = u.acked_by;
        self.acked_at = Some(u.acked_at);
        self.attention_state = u.attention_state;
        self.next_escalation_at = None;
        self.updated_at = u.acked_at;
    }

    pub fn apply_escalation(&mut self, u: &EscalationUpdate, now: DateTime<Utc>) {
        self.escalation_level = u.escalation_level;
        self.escalation_count = u.escalation_count;
        self.risk_escalation = u.risk_escalation;
        self.next_escalation_at = u.next_escalation_at;
        self.last_escalated_at = u.last_escalated_at;
        self.updated_at = now;
    }

    pub fn apply_notification(&mut self, u: &NotificationStamp) {
        self.notification_channels = u.channels.clone();
        self.notification_sent_at = Some(u.sent_at);
        self.attention_state = u.attention_state;
        self.ack_due_at = u.ack_due_at;
        self.resolve_due_at = u.resolve_due_at;
        self.next_escalation_at = u.next_escalation_at;
        self.updated_at = u.sent_at;
    }

    pub fn subject_label(&self) -> String {
        match (&self.vehicle_name, &self.driver_name) {
            (Some(v), Some(d)) => format!("{} ({})", v, d),
            (Some(v), None) => v.clone(),
            (None, Some(d)) => d.clone(),
            (None, None) => self
                .vehicle_id
                .clone()
                .unwrap_or_else(|| "unknown vehicle".to_string()),
        }
    }
}

/// Assessment values overwrite the alert's own dedupe key and risk tier only when present.
fn apply_assessment(update: &mut AiStateUpdate, assessment: &Assessment, message: Option<String>) {
    update.verdict = assessment.verdict.clone();
    update.likelihood = assessment.likelihood.clone();
    update.confidence = assessment.confidence;
    update.reasoning = assessment.reasoning.clone();
    if message.is_some() {
        update.ai_message = message;
    }
    if let Some(key) = assessment.dedupe_key.as_ref().filter(|k| !k.trim().is_empty()) {
        update.dedupe_key = Some(key.clone());
    }
    if let Some(tier) = assessment.risk_escalation {
        update.risk_escalation = tier;
    }
}

/// Sorts alerts into attention-queue order.
pub fn sort_by_priority(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| b.priority_key().cmp(&a.priority_key()));
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AlertSource {
    pub alert_id: Uuid,
    pub signal_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: SourceRole,
}

/// Append-only audit trail; `actor_user_id` is `None` for system actions.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActivityEntry {
    pub activity_id: Uuid,
    pub alert_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        alert_id: Uuid,
        actor_user_id: Option<Uuid>,
        action: &str,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            activity_id: Uuid::new_v4(),
            alert_id,
            actor_user_id,
            action: action.to_string(),
            metadata: Json(metadata),
            created_at: now,
        }
    }
}

/// Ack and resolution deadlines from the severity SLA, relative to `now`.
pub fn sla_deadlines(
    ack_minutes: i64,
    resolve_minutes: i64,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        now + Duration::minutes(ack_minutes),
        now + Duration::minutes(resolve_minutes),
    )
}
