use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::{queries, DbPool, Store};
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

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(queries::SELECT_TENANTS)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(queries::SELECT_TENANT)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_contacts(&self, tenant_id: Uuid) -> Result<Vec<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(queries::SELECT_CONTACTS)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<bool> {
        let res = sqlx::query(queries::INSERT_SIGNAL)
            .bind(signal.signal_id)
            .bind(signal.tenant_id)
            .bind(&signal.provider_event_id)
            .bind(&signal.vehicle_id)
            .bind(&signal.vehicle_name)
            .bind(&signal.driver_id)
            .bind(&signal.driver_name)
            .bind(&signal.behavior_labels)
            .bind(signal.severity.as_str())
            .bind(signal.lat)
            .bind(signal.lon)
            .bind(signal.occurred_at)
            .bind(signal.received_at)
            .bind(&signal.raw_payload)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn signals_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        Ok(sqlx::query_as::<_, Signal>(&queries::select_signals_since())
            .bind(tenant_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn signals_for_alert(&self, alert_id: Uuid) -> Result<Vec<Signal>> {
        Ok(sqlx::query_as::<_, Signal>(&queries::select_signals_for_alert())
            .bind(alert_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_alert(&self, a: &Alert) -> Result<()> {
        sqlx::query(queries::INSERT_ALERT)
            .bind(a.alert_id)
            .bind(a.tenant_id)
            .bind(&a.vehicle_id)
            .bind(&a.vehicle_name)
            .bind(&a.driver_id)
            .bind(&a.driver_name)
            .bind(&a.behavior)
            .bind(a.severity.as_str())
            .bind(a.occurred_at)
            .bind(a.ai_status.as_str())
            .bind(&a.ai_error)
            .bind(&a.verdict)
            .bind(&a.likelihood)
            .bind(a.confidence)
            .bind(&a.reasoning)
            .bind(&a.ai_message)
            .bind(&a.dedupe_key)
            .bind(a.risk_escalation.as_str())
            .bind(a.investigation_count)
            .bind(a.next_check_minutes)
            .bind(a.last_investigated_at)
            .bind(a.human_status.as_str())
            .bind(a.reviewed_by)
            .bind(a.reviewed_at)
            .bind(a.attention_state.as_str())
            .bind(a.ack_status.as_str())
            .bind(a.acked_by)
            .bind(a.acked_at)
            .bind(a.ack_due_at)
            .bind(a.resolve_due_at)
            .bind(a.resolved_at)
            .bind(a.escalation_level)
            .bind(a.escalation_count)
            .bind(a.next_escalation_at)
            .bind(a.last_escalated_at)
            .bind(a.owner_user_id)
            .bind(a.owner_contact_id)
            .bind(&a.notification_channels)
            .bind(a.notification_sent_at)
            .bind(a.created_at)
            .bind(a.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_alert_source(&self, source: &AlertSource) -> Result<()> {
        sqlx::query(queries::INSERT_ALERT_SOURCE)
            .bind(source.alert_id)
            .bind(source.signal_id)
            .bind(source.role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        Ok(sqlx::query_as::<_, Alert>(queries::SELECT_ALERT)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_open_alerts(&self, tenant_id: Uuid) -> Result<Vec<Alert>> {
        Ok(sqlx::query_as::<_, Alert>(queries::SELECT_OPEN_ALERTS)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_investigating_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>> {
        Ok(sqlx::query_as::<_, Alert>(queries::SELECT_INVESTIGATING_ALERTS)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn alerts_needing_retry(
        &self,
        tenant_id: Option<Uuid>,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        Ok(sqlx::query_as::<_, Alert>(queries::SELECT_ALERTS_NEEDING_RETRY)
            .bind(tenant_id)
            .bind(stuck_before)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn alerts_due_for_escalation(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        Ok(sqlx::query_as::<_, Alert>(queries::SELECT_ALERTS_DUE_FOR_ESCALATION)
            .bind(tenant_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_ai_state(
        &self,
        alert_id: Uuid,
        u: &AiStateUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(queries::UPDATE_AI_STATE)
            .bind(alert_id)
            .bind(u.ai_status.as_str())
            .bind(&u.ai_error)
            .bind(&u.verdict)
            .bind(&u.likelihood)
            .bind(u.confidence)
            .bind(&u.reasoning)
            .bind(&u.ai_message)
            .bind(&u.dedupe_key)
            .bind(u.risk_escalation.as_str())
            .bind(u.investigation_count)
            .bind(u.next_check_minutes)
            .bind(u.last_investigated_at)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_human_status(&self, alert_id: Uuid, u: &HumanStatusUpdate) -> Result<()> {
        sqlx::query(queries::UPDATE_HUMAN_STATUS)
            .bind(alert_id)
            .bind(u.human_status.as_str())
            .bind(u.reviewed_by)
            .bind(u.reviewed_at)
            .bind(u.attention_state.as_str())
            .bind(u.resolved_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_ack(&self, alert_id: Uuid, u: &AckUpdate) -> Result<()> {
        sqlx::query(queries::UPDATE_ACK)
            .bind(alert_id)
            .bind(u.ack_status.as_str())
            .bind(u.acked_by)
            .bind(u.acked_at)
            .bind(u.attention_state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_escalation(
        &self,
        alert_id: Uuid,
        u: &EscalationUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(queries::UPDATE_ESCALATION)
            .bind(alert_id)
            .bind(u.escalation_level)
            .bind(u.escalation_count)
            .bind(u.risk_escalation.as_str())
            .bind(u.next_escalation_at)
            .bind(u.last_escalated_at)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_notification(&self, alert_id: Uuid, s: &NotificationStamp) -> Result<()> {
        sqlx::query(queries::UPDATE_NOTIFICATION)
            .bind(alert_id)
            .bind(&s.channels)
            .bind(s.sent_at)
            .bind(s.attention_state.as_str())
            .bind(s.ack_due_at)
            .bind(s.resolve_due_at)
            .bind(s.next_escalation_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_attention_state(
        &self,
        alert_id: Uuid,
        state: AttentionState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(queries::UPDATE_ATTENTION_STATE)
            .bind(alert_id)
            .bind(state.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_owner(
        &self,
        alert_id: Uuid,
        owner_user_id: Option<Uuid>,
        owner_contact_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(queries::UPDATE_OWNER)
            .bind(alert_id)
            .bind(owner_user_id)
            .bind(owner_contact_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_activity(&self, e: &ActivityEntry) -> Result<()> {
        sqlx::query(queries::INSERT_ACTIVITY)
            .bind(e.activity_id)
            .bind(e.alert_id)
            .bind(e.actor_user_id)
            .bind(&e.action)
            .bind(&e.metadata)
            .bind(e.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_activity(&self, alert_id: Uuid) -> Result<Vec<ActivityEntry>> {
        Ok(sqlx::query_as::<_, ActivityEntry>(queries::SELECT_ACTIVITY)
            .bind(alert_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn purge_dedupe(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(queries::PURGE_DEDUPE)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn bump_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(queries::BUMP_DEDUPE)
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(queries::INSERT_DEDUPE)
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_dedupe(&self, key: &str) -> Result<()> {
        sqlx::query(queries::DELETE_DEDUPE)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_throttle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(queries::PURGE_THROTTLE)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn count_throttle(&self, key: &str, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(queries::COUNT_THROTTLE)
            .bind(key)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn insert_throttle(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(queries::INSERT_THROTTLE)
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_decision(&self, d: &NotificationDecision) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::INSERT_DECISION)
            .bind(d.decision_id)
            .bind(d.tenant_id)
            .bind(d.alert_id)
            .bind(d.should_notify)
            .bind(d.escalation_level.as_str())
            .bind(d.risk_escalation.as_str())
            .bind(d.channel_names())
            .bind(&d.message)
            .bind(&d.voice_script)
            .bind(&d.reason)
            .bind(d.created_at)
            .execute(&mut *tx)
            .await?;

        for r in &d.recipients {
            sqlx::query(queries::INSERT_RECIPIENT)
                .bind(d.decision_id)
                .bind(r.contact_id)
                .bind(&r.recipient_type)
                .bind(&r.name)
                .bind(&r.phone)
                .bind(&r.whatsapp)
                .bind(r.priority)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_result(&self, r: &NotificationResult) -> Result<()> {
        sqlx::query(queries::INSERT_RESULT)
            .bind(r.result_id)
            .bind(r.decision_id)
            .bind(&r.channel)
            .bind(&r.recipient_name)
            .bind(&r.destination)
            .bind(r.success)
            .bind(&r.error)
            .bind(&r.provider_id)
            .bind(&r.delivery_status)
            .bind(r.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_result_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<NotificationResult>> {
        Ok(
            sqlx::query_as::<_, NotificationResult>(queries::SELECT_RESULT_BY_PROVIDER_ID)
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn insert_delivery_event(&self, e: &DeliveryEvent) -> Result<()> {
        sqlx::query(queries::INSERT_DELIVERY_EVENT)
            .bind(e.event_id)
            .bind(e.result_id)
            .bind(&e.status)
            .bind(&e.provider_code)
            .bind(&e.provider_message)
            .bind(e.received_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_delivery_status(&self, result_id: Uuid, status: &str) -> Result<()> {
        sqlx::query(queries::UPDATE_DELIVERY_STATUS)
            .bind(result_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_vehicle_stat(&self, s: &VehicleStat) -> Result<()> {
        sqlx::query(queries::UPSERT_VEHICLE_STAT)
            .bind(s.tenant_id)
            .bind(&s.vehicle_id)
            .bind(&s.vehicle_name)
            .bind(s.last_stat_at)
            .bind(s.lat)
            .bind(s.lon)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_vehicle_stats(&self, tenant_id: Uuid) -> Result<Vec<VehicleStat>> {
        Ok(sqlx::query_as::<_, VehicleStat>(queries::SELECT_VEHICLE_STATS)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn open_stale_alert(
        &self,
        tenant_id: Uuid,
        vehicle_id: &str,
    ) -> Result<Option<StaleAssetAlert>> {
        Ok(
            sqlx::query_as::<_, StaleAssetAlert>(&queries::select_open_stale_alert())
                .bind(tenant_id)
                .bind(vehicle_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_open_stale_alerts(&self, tenant_id: Uuid) -> Result<Vec<StaleAssetAlert>> {
        Ok(
            sqlx::query_as::<_, StaleAssetAlert>(&queries::select_open_stale_alerts())
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_stale_alert(&self, a: &StaleAssetAlert) -> Result<bool> {
        let res = sqlx::query(queries::INSERT_STALE_ALERT)
            .bind(a.stale_alert_id)
            .bind(a.tenant_id)
            .bind(&a.vehicle_id)
            .bind(&a.vehicle_name)
            .bind(a.last_stat_at)
            .bind(a.alerted_at)
            .bind(&a.channels)
            .bind(&a.recipients)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn refresh_stale_alert(&self, a: &StaleAssetAlert) -> Result<()> {
        sqlx::query(queries::REFRESH_STALE_ALERT)
            .bind(a.stale_alert_id)
            .bind(a.last_stat_at)
            .bind(a.alerted_at)
            .bind(&a.channels)
            .bind(&a.recipients)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn discard_stale_alert(&self, stale_alert_id: Uuid) -> Result<()> {
        sqlx::query(queries::DISCARD_STALE_ALERT)
            .bind(stale_alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_stale_alert(&self, stale_alert_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(queries::RESOLVE_STALE_ALERT)
            .bind(stale_alert_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_incident(&self, i: &Incident) -> Result<bool> {
        let res = sqlx::query(queries::INSERT_INCIDENT)
            .bind(i.incident_id)
            .bind(i.tenant_id)
            .bind(&i.incident_type)
            .bind(i.priority.as_str())
            .bind(i.status.as_str())
            .bind(i.subject_type.as_str())
            .bind(&i.subject_id)
            .bind(&i.subject_name)
            .bind(&i.behavior)
            .bind(&i.dedupe_key)
            .bind(&i.title)
            .bind(&i.summary)
            .bind(i.created_at)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn link_incident_signals(&self, links: &[IncidentSignal]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for link in links {
            sqlx::query(queries::INSERT_INCIDENT_SIGNAL)
                .bind(link.incident_id)
                .bind(link.signal_id)
                .bind(link.role.as_str())
                .bind(link.relevance)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_incidents(&self, tenant_id: Uuid) -> Result<Vec<Incident>> {
        Ok(sqlx::query_as::<_, Incident>(queries::SELECT_INCIDENTS)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn incident_signals(&self, incident_id: Uuid) -> Result<Vec<IncidentSignal>> {
        Ok(sqlx::query_as::<_, IncidentSignal>(queries::SELECT_INCIDENT_SIGNALS)
            .bind(incident_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn load_cursor(&self, tenant_id: Uuid) -> Result<Option<StreamCursor>> {
        Ok(sqlx::query_as::<_, StreamCursor>(queries::SELECT_CURSOR)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_cursor(&self, c: &StreamCursor, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(queries::UPSERT_CURSOR)
            .bind(c.tenant_id)
            .bind(&c.cursor)
            .bind(c.start_time)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_cursor(&self, tenant_id: Uuid) -> Result<()> {
        sqlx::query(queries::DELETE_CURSOR)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
