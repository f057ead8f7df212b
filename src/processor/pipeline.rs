use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::assessor::{AssessmentOutcome, Assessor};
use super::lifecycle::{self, InvestigationOutcome};
use crate::db::Store;
use crate::gates::{dedup, throttle};
use crate::models::alert::{
    sla_deadlines, ActivityEntry, AckStatus, AiStatus, Alert, AlertSource, Assessment,
    AttentionState, NotificationStamp, RiskEscalation, SourceRole,
};
use crate::models::notification::NotificationDecision;
use crate::models::signal::Signal;
use crate::notify::channels::ChannelProvider;
use crate::notify::decision::build_decision;
use crate::notify::dispatcher::{DispatchReport, Dispatcher};
use crate::policy::TenantPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The provider event was already stored; nothing else happened.
    Duplicate,
    Created { alert_id: Uuid, processed: ProcessOutcome },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Notified(DispatchReport),
    Suppressed(String),
    Investigating,
    Failed,
}

/// Shared handles for everything that touches alerts.
pub struct Engine {
    pub store: Arc<dyn Store>,
    pub dispatcher: Dispatcher,
    pub assessor: Arc<dyn Assessor>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ChannelProvider>,
        assessor: Arc<dyn Assessor>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone(), provider),
            store,
            assessor,
        }
    }

    pub async fn policy(&self, tenant_id: Uuid) -> Result<TenantPolicy> {
        Ok(match self.store.get_tenant(tenant_id).await? {
            Some(tenant) => TenantPolicy::load_or_default(tenant.tenant_id, &tenant.settings.0),
            None => TenantPolicy::default(),
        })
    }

    /// Stores the signal and opens an alert for it. Returns `None` when the provider
    /// event was already stored.
    pub async fn record_signal(&self, signal: &Signal, now: DateTime<Utc>) -> Result<Option<Alert>> {
        if !self.store.insert_signal(signal).await? {
            info!(
                "Event {} for tenant {} already ingested, skipping",
                signal.provider_event_id, signal.tenant_id
            );
            return Ok(None);
        }

        let alert = Alert::from_signal(signal, now);
        self.store.insert_alert(&alert).await?;
        self.store
            .link_alert_source(&AlertSource {
                alert_id: alert.alert_id,
                signal_id: signal.signal_id,
                role: SourceRole::Primary,
            })
            .await?;
        self.store
            .append_activity(&ActivityEntry::new(
                alert.alert_id,
                None,
                "alert_created",
                json!({
                    "signal_id": signal.signal_id,
                    "provider_event_id": signal.provider_event_id,
                }),
                now,
            ))
            .await?;

        info!(
            "Alert {} opened for {} ({}, {})",
            alert.alert_id,
            alert.subject_label(),
            alert.behavior,
            alert.severity
        );
        Ok(Some(alert))
    }

    pub async fn ingest_signal(&self, signal: &Signal, now: DateTime<Utc>) -> Result<IngestOutcome> {
        let Some(alert) = self.record_signal(signal, now).await? else {
            return Ok(IngestOutcome::Duplicate);
        };
        let alert_id = alert.alert_id;
        let processed = self.process_alert(alert, now).await?;
        Ok(IngestOutcome::Created { alert_id, processed })
    }

    /// Runs one assessment round for `alert` and notifies when the verdict calls for it.
    pub async fn process_alert(&self, mut alert: Alert, now: DateTime<Utc>) -> Result<ProcessOutcome> {
        let store = self.store.as_ref();

        // 1. Claim the alert
        lifecycle::mark_as_processing(store, &mut alert, now).await?;

        // 2. Gather evidence and tenant policy
        let signals = store.signals_for_alert(alert.alert_id).await?;
        let policy = self.policy(alert.tenant_id).await?;

        // 3. Assess
        let assessment = match self.assessor.assess(&alert, &signals).await {
            Ok(AssessmentOutcome::Complete {
                assessment,
                message,
            }) => {
                lifecycle::mark_as_completed(store, &mut alert, &assessment, message, now).await?;
                assessment
            }
            Ok(AssessmentOutcome::Investigate {
                assessment,
                message,
                next_check_minutes,
            }) => {
                let outcome = lifecycle::mark_as_investigating(
                    store,
                    &mut alert,
                    &assessment,
                    message,
                    next_check_minutes,
                    policy.max_investigations,
                    now,
                )
                .await?;
                match outcome {
                    InvestigationOutcome::Scheduled { next_check_minutes } => {
                        info!(
                            "Alert {} under investigation, next check in {} min",
                            alert.alert_id, next_check_minutes
                        );
                        return Ok(ProcessOutcome::Investigating);
                    }
                    InvestigationOutcome::LimitReached => assessment,
                }
            }
            Err(e) => {
                error!("Assessment of alert {} failed: {:#}", alert.alert_id, e);
                lifecycle::mark_as_failed(store, &mut alert, &format!("{:#}", e), now).await?;
                return Ok(ProcessOutcome::Failed);
            }
        };

        // 4. Decide, gate and notify
        self.notify_alert(&mut alert, Some(&assessment), &policy, now)
            .await
    }

    /// Resumes an alert whose earlier run stopped part way. A completed alert goes
    /// straight to notification with its stored verdict; anything else is reassessed.
    pub async fn retry_alert(&self, mut alert: Alert, now: DateTime<Utc>) -> Result<ProcessOutcome> {
        if alert.ai_status != AiStatus::Completed {
            return self.process_alert(alert, now).await;
        }
        let policy = self.policy(alert.tenant_id).await?;
        let assessment = Assessment::from_alert(&alert);
        self.notify_alert(&mut alert, Some(&assessment), &policy, now)
            .await
    }

    /// Builds and persists a decision at `tier` and dispatches it. No gates apply here.
    pub async fn decide_and_dispatch(
        &self,
        alert: &Alert,
        assessment: Option<&Assessment>,
        tier: RiskEscalation,
        policy: &TenantPolicy,
        now: DateTime<Utc>,
    ) -> Result<(NotificationDecision, DispatchReport)> {
        let contacts = self.store.list_contacts(alert.tenant_id).await?;
        let decision = build_decision(alert, assessment, tier, policy, &contacts, now);
        self.store.insert_decision(&decision).await?;
        let report = self.dispatcher.dispatch(&decision, now).await;
        Ok((decision, report))
    }

    /// Gated notification for a freshly assessed alert: dedupe first, then throttle.
    /// Stamps SLA deadlines and the first escalation slot once something went out.
    pub async fn notify_alert(
        &self,
        alert: &mut Alert,
        assessment: Option<&Assessment>,
        policy: &TenantPolicy,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        let store = self.store.as_ref();
        let contacts = store.list_contacts(alert.tenant_id).await?;
        let mut decision =
            build_decision(alert, assessment, alert.risk_escalation, policy, &contacts, now);

        if decision.should_notify {
            if let Some(key) = alert.dedupe_key.as_deref() {
                if dedup::is_duplicate(store, key, policy.dedupe.ttl_hours, now).await? {
                    decision.suppress(format!("duplicate of '{}'", key));
                }
            }
        }

        let throttle_key =
            throttle::throttle_key(alert.vehicle_id.as_deref(), alert.driver_id.as_deref());
        if decision.should_notify {
            let verdict = throttle::should_throttle(
                store,
                &throttle_key,
                policy.throttle.window_minutes,
                policy.throttle.max_count,
                now,
            )
            .await?;
            if verdict.throttled {
                decision.suppress(verdict.reason.unwrap_or_else(|| "throttled".into()));
            }
        }

        store.insert_decision(&decision).await?;
        if !decision.should_notify {
            info!(
                "Alert {} not notified: {}",
                alert.alert_id, decision.reason
            );
            return Ok(ProcessOutcome::Suppressed(decision.reason));
        }

        // The decision is on record from here on; nothing below may skip the stamp.
        if let Err(e) = throttle::record(store, &throttle_key, now).await {
            warn!("Throttle entry for alert {} not recorded: {:#}", alert.alert_id, e);
        }
        let report = self.dispatcher.dispatch(&decision, now).await;
        if let Err(e) = report.outcome() {
            warn!("Alert {}: {}", alert.alert_id, e);
        }
        if report.unrecorded > 0 {
            warn!(
                "Alert {}: {} notification results could not be stored",
                alert.alert_id, report.unrecorded
            );
        }

        let sla = policy.sla.for_severity(alert.severity);
        let (ack_due_at, resolve_due_at) = sla_deadlines(sla.ack_minutes, sla.resolve_minutes, now);
        let acked = alert.ack_status == AckStatus::Acked;
        let stamp = NotificationStamp {
            channels: decision.channel_names(),
            sent_at: now,
            attention_state: if acked {
                alert.attention_state
            } else {
                AttentionState::NeedsAttention
            },
            ack_due_at: Some(ack_due_at),
            resolve_due_at: Some(resolve_due_at),
            next_escalation_at: if acked || policy.escalation.max_escalations == 0 {
                None
            } else {
                Some(now + Duration::minutes(policy.escalation.interval_minutes))
            },
        };
        store.update_notification(alert.alert_id, &stamp).await?;
        alert.apply_notification(&stamp);

        store
            .append_activity(&ActivityEntry::new(
                alert.alert_id,
                None,
                "notified",
                json!({
                    "decision_id": decision.decision_id,
                    "tier": decision.risk_escalation.as_str(),
                    "attempted": report.attempted,
                    "succeeded": report.succeeded,
                }),
                now,
            ))
            .await?;
        Ok(ProcessOutcome::Notified(report))
    }
}
