use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::models::alert::{
    AckUpdate, ActivityEntry, AiStateUpdate, Alert, AlertSource, AttentionState, EscalationUpdate,
    HumanStatusUpdate, NotificationStamp,
};
use crate::models::incident::{Incident, IncidentSignal};
use crate::models::notification::{
    Contact, DeliveryEvent, NotificationDecision, NotificationResult,
};
use crate::models::signal::Signal;
use crate::models::stale_asset::{StaleAssetAlert, VehicleStat};
use crate::models::tenant::{StreamCursor, Tenant};

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod queries;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32, run_migrations: bool) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    if run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations applied");
    }
    Ok(pool)
}

/// Persistence seam for the engine.
///
/// Methods that insert under a uniqueness constraint return `false` when the row
/// already existed instead of failing; callers treat that as "someone else won".
/// Update methods write only the fields named by their argument type.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>>;
    async fn list_contacts(&self, tenant_id: Uuid) -> Result<Vec<Contact>>;

    async fn insert_signal(&self, signal: &Signal) -> Result<bool>;
    async fn signals_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Signal>>;
    async fn signals_for_alert(&self, alert_id: Uuid) -> Result<Vec<Signal>>;

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;
    async fn link_alert_source(&self, source: &AlertSource) -> Result<()>;
    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>>;
    async fn list_open_alerts(&self, tenant_id: Uuid) -> Result<Vec<Alert>>;
    async fn list_investigating_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>>;
    /// Alerts untouched since `stuck_before` that are still pending or processing, or
    /// that completed without any notification decision being recorded.
    async fn alerts_needing_retry(
        &self,
        tenant_id: Option<Uuid>,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;
    async fn alerts_due_for_escalation(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;
    async fn update_ai_state(
        &self,
        alert_id: Uuid,
        update: &AiStateUpdate,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn update_human_status(&self, alert_id: Uuid, update: &HumanStatusUpdate) -> Result<()>;
    async fn update_ack(&self, alert_id: Uuid, update: &AckUpdate) -> Result<()>;
    async fn update_escalation(
        &self,
        alert_id: Uuid,
        update: &EscalationUpdate,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn update_notification(&self, alert_id: Uuid, stamp: &NotificationStamp) -> Result<()>;
    async fn set_attention_state(
        &self,
        alert_id: Uuid,
        state: AttentionState,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn update_owner(
        &self,
        alert_id: Uuid,
        owner_user_id: Option<Uuid>,
        owner_contact_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn append_activity(&self, entry: &ActivityEntry) -> Result<()>;
    async fn list_activity(&self, alert_id: Uuid) -> Result<Vec<ActivityEntry>>;

    async fn purge_dedupe(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn bump_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn insert_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn delete_dedupe(&self, key: &str) -> Result<()>;

    async fn purge_throttle(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn count_throttle(&self, key: &str, since: DateTime<Utc>) -> Result<i64>;
    async fn insert_throttle(&self, key: &str, now: DateTime<Utc>) -> Result<()>;

    async fn insert_decision(&self, decision: &NotificationDecision) -> Result<()>;
    async fn insert_result(&self, result: &NotificationResult) -> Result<()>;
    async fn find_result_by_provider_id(&self, provider_id: &str)
        -> Result<Option<NotificationResult>>;
    async fn insert_delivery_event(&self, event: &DeliveryEvent) -> Result<()>;
    async fn set_delivery_status(&self, result_id: Uuid, status: &str) -> Result<()>;

    async fn upsert_vehicle_stat(&self, stat: &VehicleStat) -> Result<()>;
    async fn list_vehicle_stats(&self, tenant_id: Uuid) -> Result<Vec<VehicleStat>>;
    async fn open_stale_alert(
        &self,
        tenant_id: Uuid,
        vehicle_id: &str,
    ) -> Result<Option<StaleAssetAlert>>;
    async fn list_open_stale_alerts(&self, tenant_id: Uuid) -> Result<Vec<StaleAssetAlert>>;
    async fn insert_stale_alert(&self, alert: &StaleAssetAlert) -> Result<bool>;
    async fn refresh_stale_alert(&self, alert: &StaleAssetAlert) -> Result<()>;
    /// Drops an open record that never got its notification out.
    async fn discard_stale_alert(&self, stale_alert_id: Uuid) -> Result<()>;
    async fn resolve_stale_alert(&self, stale_alert_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn insert_incident(&self, incident: &Incident) -> Result<bool>;
    async fn link_incident_signals(&self, links: &[IncidentSignal]) -> Result<()>;
    async fn list_incidents(&self, tenant_id: Uuid) -> Result<Vec<Incident>>;
    async fn incident_signals(&self, incident_id: Uuid) -> Result<Vec<IncidentSignal>>;

    async fn load_cursor(&self, tenant_id: Uuid) -> Result<Option<StreamCursor>>;
    async fn save_cursor(&self, cursor: &StreamCursor, now: DateTime<Utc>) -> Result<()>;
    async fn clear_cursor(&self, tenant_id: Uuid) -> Result<()>;
}
