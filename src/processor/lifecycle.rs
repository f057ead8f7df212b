//! Alert state transitions.
//!
//! Every function here loads nothing and guesses nothing: callers pass the current
//! alert, the transition is validated against it, and only the fields owned by that
//! transition are written. The in-memory `alert` is updated to match what was stored.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::error::LifecycleError;
use crate::models::alert::{ActivityEntry, Alert, Assessment, AttentionState, HumanStatus};

pub async fn load(store: &dyn Store, alert_id: Uuid) -> Result<Alert> {
    store
        .get_alert(alert_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound(alert_id).into())
}

pub async fn mark_as_processing(
    store: &dyn Store,
    alert: &mut Alert,
    now: DateTime<Utc>,
) -> Result<()> {
    let update = alert.processing()?;
    store.update_ai_state(alert.alert_id, &update, now).await?;
    alert.apply_ai(&update, now);
    Ok(())
}

pub async fn mark_as_completed(
    store: &dyn Store,
    alert: &mut Alert,
    assessment: &Assessment,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let update = alert.completed(assessment, message)?;
    store.update_ai_state(alert.alert_id, &update, now).await?;
    alert.apply_ai(&update, now);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationOutcome {
    Scheduled { next_check_minutes: i32 },
    /// Too many investigation rounds; the alert was completed for a human to look at.
    LimitReached,
}

/// Schedules another look at the alert, unless it already used `max_investigations`
/// rounds, in which case it is completed and flagged for attention instead.
pub async fn mark_as_investigating(
    store: &dyn Store,
    alert: &mut Alert,
    assessment: &Assessment,
    message: Option<String>,
    next_check_minutes: i32,
    max_investigations: i32,
    now: DateTime<Utc>,
) -> Result<InvestigationOutcome> {
    if alert.investigation_count >= max_investigations {
        warn!(
            "Alert {} reached {} investigations, completing it for review",
            alert.alert_id, alert.investigation_count
        );
        mark_as_completed(store, alert, assessment, message, now).await?;
        store
            .set_attention_state(alert.alert_id, AttentionState::NeedsAttention, now)
            .await?;
        alert.attention_state = AttentionState::NeedsAttention;
        store
            .append_activity(&ActivityEntry::new(
                alert.alert_id,
                None,
                "investigation_limit_reached",
                json!({ "investigations": alert.investigation_count }),
                now,
            ))
            .await?;
        return Ok(InvestigationOutcome::LimitReached);
    }

    let update = alert.investigating(assessment, message, next_check_minutes, now)?;
    store.update_ai_state(alert.alert_id, &update, now).await?;
    alert.apply_ai(&update, now);
    Ok(InvestigationOutcome::Scheduled {
        next_check_minutes: update.next_check_minutes.unwrap_or(0),
    })
}

/// Records a terminal processing failure. The alert surfaces through the attention
/// predicate while its human status is still pending.
pub async fn mark_as_failed(
    store: &dyn Store,
    alert: &mut Alert,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let update = alert.failed(error)?;
    store.update_ai_state(alert.alert_id, &update, now).await?;
    alert.apply_ai(&update, now);
    store
        .append_activity(&ActivityEntry::new(
            alert.alert_id,
            None,
            "ai_failed",
            json!({ "error": error }),
            now,
        ))
        .await?;
    Ok(())
}

pub async fn set_human_status(
    store: &dyn Store,
    alert: &mut Alert,
    status: HumanStatus,
    actor: Option<Uuid>,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let previous = alert.human_status;
    let update = alert.human_status_change(status, actor, now);
    store.update_human_status(alert.alert_id, &update).await?;
    alert.apply_human(&update);
    store
        .append_activity(&ActivityEntry::new(
            alert.alert_id,
            actor,
            "human_status_changed",
            json!({
                "from": previous.as_str(),
                "to": status.as_str(),
                "note": note,
            }),
            now,
        ))
        .await?;
    info!(
        "Alert {} human status {} -> {}",
        alert.alert_id, previous, status
    );
    Ok(())
}

/// Acknowledging twice keeps the first `acked_at`.
pub async fn acknowledge(
    store: &dyn Store,
    alert: &mut Alert,
    actor: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<()> {
    let update = alert.acknowledgement(actor, now);
    store.update_ack(alert.alert_id, &update).await?;
    alert.apply_ack(&update);
    store
        .append_activity(&ActivityEntry::new(
            alert.alert_id,
            actor,
            "acknowledged",
            json!({ "acked_at": update.acked_at }),
            now,
        ))
        .await?;
    Ok(())
}

pub async fn assign_owner(
    store: &dyn Store,
    alert: &mut Alert,
    owner_user_id: Option<Uuid>,
    owner_contact_id: Option<Uuid>,
    actor: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<()> {
    store
        .update_owner(alert.alert_id, owner_user_id, owner_contact_id, now)
        .await?;
    alert.owner_user_id = owner_user_id;
    alert.owner_contact_id = owner_contact_id;
    alert.updated_at = now;
    store
        .append_activity(&ActivityEntry::new(
            alert.alert_id,
            actor,
            "owner_assigned",
            json!({ "user_id": owner_user_id, "contact_id": owner_contact_id }),
            now,
        ))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::alert::{AckStatus, AiStatus};
    use crate::testing::{alert_fixture, at};

    async fn stored_alert(store: &MemoryStore) -> Alert {
        let alert = alert_fixture();
        store.insert_alert(&alert).await.unwrap();
        alert
    }

    #[tokio::test]
    async fn test_load_missing_alert_is_not_found() {
        let store = MemoryStore::new();
        let err = load(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_investigation_is_bounded() {
        let store = MemoryStore::new();
        let mut alert = stored_alert(&store).await;
        mark_as_processing(&store, &mut alert, at(12, 0)).await.unwrap();

        let assessment = Assessment::default();
        for round in 1..=3 {
            let outcome = mark_as_investigating(
                &store,
                &mut alert,
                &assessment,
                None,
                10,
                3,
                at(12, round),
            )
            .await
            .unwrap();
            assert_eq!(
                outcome,
                InvestigationOutcome::Scheduled {
                    next_check_minutes: 10
                }
            );
            mark_as_processing(&store, &mut alert, at(12, round)).await.unwrap();
        }

        let outcome =
            mark_as_investigating(&store, &mut alert, &assessment, None, 10, 3, at(12, 30))
                .await
                .unwrap();
        assert_eq!(outcome, InvestigationOutcome::LimitReached);

        let stored = store.alert(alert.alert_id).await;
        assert_eq!(stored.ai_status, AiStatus::Completed);
        assert_eq!(stored.investigation_count, 3);
        assert_eq!(stored.attention_state, AttentionState::NeedsAttention);
        assert!(stored.needs_attention());
    }

    #[tokio::test]
    async fn test_failure_surfaces_in_attention_queue() {
        let store = MemoryStore::new();
        let mut alert = stored_alert(&store).await;
        alert.attention_state = AttentionState::InProgress;
        store.insert_alert(&alert).await.unwrap();

        mark_as_processing(&store, &mut alert, at(12, 0)).await.unwrap();
        mark_as_failed(&store, &mut alert, "upstream timeout", at(12, 1))
            .await
            .unwrap();

        let stored = store.alert(alert.alert_id).await;
        assert_eq!(stored.ai_status, AiStatus::Failed);
        assert_eq!(stored.ai_error.as_deref(), Some("upstream timeout"));
        assert!(stored.needs_attention());
    }

    #[tokio::test]
    async fn test_human_status_change_is_logged_and_scoped() {
        let store = MemoryStore::new();
        let mut alert = stored_alert(&store).await;
        alert.dedupe_key = Some("k".into());
        store.insert_alert(&alert).await.unwrap();

        // a concurrent ai write lands first
        let mut other = alert.clone();
        mark_as_processing(&store, &mut other, at(12, 0)).await.unwrap();

        let reviewer = Uuid::new_v4();
        set_human_status(
            &store,
            &mut alert,
            HumanStatus::Resolved,
            Some(reviewer),
            Some("driver called in".into()),
            at(12, 5),
        )
        .await
        .unwrap();

        let stored = store.alert(alert.alert_id).await;
        assert_eq!(stored.ai_status, AiStatus::Processing);
        assert_eq!(stored.human_status, HumanStatus::Resolved);
        assert_eq!(stored.attention_state, AttentionState::Closed);
        assert_eq!(stored.resolved_at, Some(at(12, 5)));

        let activity = store.list_activity(alert.alert_id).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, "human_status_changed");
        assert_eq!(activity[0].actor_user_id, Some(reviewer));
        assert_eq!(activity[0].metadata.0["to"], "resolved");
    }

    #[tokio::test]
    async fn test_acknowledge_sets_both_fields_and_stops_escalation() {
        let store = MemoryStore::new();
        let mut alert = alert_fixture();
        alert.next_escalation_at = Some(at(12, 10));
        store.insert_alert(&alert).await.unwrap();

        acknowledge(&store, &mut alert, None, at(12, 3)).await.unwrap();
        acknowledge(&store, &mut alert, None, at(12, 7)).await.unwrap();

        let stored = store.alert(alert.alert_id).await;
        assert_eq!(stored.ack_status, AckStatus::Acked);
        assert_eq!(stored.acked_at, Some(at(12, 3)));
        assert!(stored.ack_consistent());
        assert_eq!(stored.next_escalation_at, None);
        assert_eq!(stored.attention_state, AttentionState::InProgress);
    }

    #[tokio::test]
    async fn test_assign_owner() {
        let store = MemoryStore::new();
        let mut alert = stored_alert(&store).await;
        let owner = Uuid::new_v4();
        assign_owner(&store, &mut alert, Some(owner), None, None, at(12, 0))
            .await
            .unwrap();
        assert_eq!(store.alert(alert.alert_id).await.owner_user_id, Some(owner));
        assert_eq!(
            store.list_activity(alert.alert_id).await.unwrap()[0].action,
            "owner_assigned"
        );
    }
}
