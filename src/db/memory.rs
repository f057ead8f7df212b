//! In-process `Store` used by the unit tests. Mirrors the unique constraints of the schema.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
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

#[derive(Debug, Clone)]
pub struct DedupeRow {
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub count: i32,
}

#[derive(Default)]
pub struct MemoryState {
    pub tenants: Vec<Tenant>,
    pub contacts: Vec<Contact>,
    pub signals: Vec<Signal>,
    pub alerts: HashMap<Uuid, Alert>,
    pub sources: Vec<AlertSource>,
    pub activity: Vec<ActivityEntry>,
    pub dedupe: HashMap<String, DedupeRow>,
    pub throttle: Vec<(String, DateTime<Utc>)>,
    pub decisions: Vec<NotificationDecision>,
    pub results: Vec<NotificationResult>,
    pub delivery_events: Vec<DeliveryEvent>,
    pub vehicle_stats: Vec<VehicleStat>,
    pub stale_alerts: Vec<StaleAssetAlert>,
    pub incidents: Vec<Incident>,
    pub incident_signals: Vec<IncidentSignal>,
    pub cursors: HashMap<Uuid, StreamCursor>,
    /// Remaining simulated failures per store operation.
    pub failures: HashMap<&'static str, u32>,
    /// Keys another writer inserts between our lookup and our insert.
    pub racing_dedupe: HashSet<String>,
}

impl MemoryState {
    fn fail_if_armed(&mut self, op: &'static str) -> Result<()> {
        match self.failures.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(anyhow!("simulated {} failure", op))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.push(tenant);
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.state.lock().await.contacts.push(contact);
    }

    /// Makes the next `times` calls of `op` fail.
    pub async fn fail_next(&self, op: &'static str, times: u32) {
        self.state.lock().await.failures.insert(op, times);
    }

    /// The next lookup of `key` misses while a concurrent writer inserts it.
    pub async fn race_dedupe_insert(&self, key: &str) {
        self.state.lock().await.racing_dedupe.insert(key.to_string());
    }

    pub async fn alert(&self, alert_id: Uuid) -> Alert {
        self.state.lock().await.alerts[&alert_id].clone()
    }
}

fn alert_mut<'a>(state: &'a mut MemoryState, alert_id: Uuid) -> Result<&'a mut Alert> {
    state
        .alerts
        .get_mut(&alert_id)
        .ok_or_else(|| anyhow!("alert {} not found", alert_id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let s = self.state.lock().await;
        Ok(s.tenants.iter().filter(|t| t.active).cloned().collect())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("get_tenant")?;
        Ok(s.tenants.iter().find(|t| t.tenant_id == tenant_id).cloned())
    }

    async fn list_contacts(&self, tenant_id: Uuid) -> Result<Vec<Contact>> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("list_contacts")?;
        let mut contacts: Vec<Contact> = s
            .contacts
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.active)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        Ok(contacts)
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<bool> {
        let mut s = self.state.lock().await;
        let exists = s.signals.iter().any(|x| {
            x.tenant_id == signal.tenant_id && x.provider_event_id == signal.provider_event_id
        });
        if exists {
            return Ok(false);
        }
        s.signals.push(signal.clone());
        Ok(true)
    }

    async fn signals_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        let s = self.state.lock().await;
        let mut out: Vec<Signal> = s
            .signals
            .iter()
            .filter(|x| x.tenant_id == tenant_id && x.occurred_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|x| (x.occurred_at, x.signal_id));
        Ok(out)
    }

    async fn signals_for_alert(&self, alert_id: Uuid) -> Result<Vec<Signal>> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("signals_for_alert")?;
        let ids: Vec<Uuid> = s
            .sources
            .iter()
            .filter(|src| src.alert_id == alert_id)
            .map(|src| src.signal_id)
            .collect();
        Ok(s.signals
            .iter()
            .filter(|x| ids.contains(&x.signal_id))
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let mut s = self.state.lock().await;
        s.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn link_alert_source(&self, source: &AlertSource) -> Result<()> {
        let mut s = self.state.lock().await;
        s.sources
            .retain(|x| !(x.alert_id == source.alert_id && x.signal_id == source.signal_id));
        s.sources.push(source.clone());
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        Ok(self.state.lock().await.alerts.get(&alert_id).cloned())
    }

    async fn list_open_alerts(&self, tenant_id: Uuid) -> Result<Vec<Alert>> {
        let s = self.state.lock().await;
        Ok(s.alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.attention_state != AttentionState::Closed)
            .cloned()
            .collect())
    }

    async fn list_investigating_alerts(&self, tenant_id: Option<Uuid>) -> Result<Vec<Alert>> {
        let s = self.state.lock().await;
        Ok(s.alerts
            .values()
            .filter(|a| a.ai_status == crate::models::alert::AiStatus::Investigating)
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect())
    }

    async fn alerts_needing_retry(
        &self,
        tenant_id: Option<Uuid>,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        use crate::models::alert::AiStatus;
        let s = self.state.lock().await;
        let decided: HashSet<Uuid> = s.decisions.iter().filter_map(|d| d.alert_id).collect();
        let mut out: Vec<Alert> = s
            .alerts
            .values()
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t) && a.updated_at < stuck_before)
            .filter(|a| match a.ai_status {
                AiStatus::Pending | AiStatus::Processing => true,
                AiStatus::Completed => {
                    a.attention_state != AttentionState::Closed && !decided.contains(&a.alert_id)
                }
                _ => false,
            })
            .cloned()
            .collect();
        out.sort_by_key(|a| a.created_at);
        Ok(out)
    }

    async fn alerts_due_for_escalation(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let s = self.state.lock().await;
        let mut out: Vec<Alert> = s
            .alerts
            .values()
            .filter(|a| {
                a.attention_state == AttentionState::NeedsAttention
                    && a.ack_status == crate::models::alert::AckStatus::Pending
                    && a.next_escalation_at.is_some_and(|at| at <= now)
                    && tenant_id.map_or(true, |t| a.tenant_id == t)
            })
            .cloned()
            .collect();
        out.sort_by_key(|a| a.next_escalation_at);
        Ok(out)
    }

    async fn update_ai_state(
        &self,
        alert_id: Uuid,
        update: &AiStateUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        alert_mut(&mut s, alert_id)?.apply_ai(update, now);
        Ok(())
    }

    async fn update_human_status(&self, alert_id: Uuid, update: &HumanStatusUpdate) -> Result<()> {
        let mut s = self.state.lock().await;
        alert_mut(&mut s, alert_id)?.apply_human(update);
        Ok(())
    }

    async fn update_ack(&self, alert_id: Uuid, update: &AckUpdate) -> Result<()> {
        let mut s = self.state.lock().await;
        alert_mut(&mut s, alert_id)?.apply_ack(update);
        Ok(())
    }

    async fn update_escalation(
        &self,
        alert_id: Uuid,
        update: &EscalationUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("update_escalation")?;
        let alert = alert_mut(&mut s, alert_id)?;
        let mut merged = update.clone();
        merged.escalation_level = merged.escalation_level.max(alert.escalation_level);
        merged.escalation_count = merged.escalation_count.max(alert.escalation_count);
        alert.apply_escalation(&merged, now);
        Ok(())
    }

    async fn update_notification(&self, alert_id: Uuid, stamp: &NotificationStamp) -> Result<()> {
        let mut s = self.state.lock().await;
        alert_mut(&mut s, alert_id)?.apply_notification(stamp);
        Ok(())
    }

    async fn set_attention_state(
        &self,
        alert_id: Uuid,
        state: AttentionState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        let alert = alert_mut(&mut s, alert_id)?;
        alert.attention_state = state;
        alert.updated_at = now;
        Ok(())
    }

    async fn update_owner(
        &self,
        alert_id: Uuid,
        owner_user_id: Option<Uuid>,
        owner_contact_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        let alert = alert_mut(&mut s, alert_id)?;
        alert.owner_user_id = owner_user_id;
        alert.owner_contact_id = owner_contact_id;
        alert.updated_at = now;
        Ok(())
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> Result<()> {
        self.state.lock().await.activity.push(entry.clone());
        Ok(())
    }

    async fn list_activity(&self, alert_id: Uuid) -> Result<Vec<ActivityEntry>> {
        let s = self.state.lock().await;
        Ok(s.activity
            .iter()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn purge_dedupe(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut s = self.state.lock().await;
        let before = s.dedupe.len();
        s.dedupe.retain(|_, row| row.last_seen_at >= cutoff);
        Ok((before - s.dedupe.len()) as u64)
    }

    async fn bump_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut s = self.state.lock().await;
        if s.racing_dedupe.remove(key) {
            s.dedupe.insert(
                key.to_string(),
                DedupeRow {
                    first_seen_at: now,
                    last_seen_at: now,
                    count: 1,
                },
            );
            return Ok(false);
        }
        match s.dedupe.get_mut(key) {
            Some(row) => {
                row.count += 1;
                row.last_seen_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_dedupe(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut s = self.state.lock().await;
        if s.dedupe.contains_key(key) {
            return Ok(false);
        }
        s.dedupe.insert(
            key.to_string(),
            DedupeRow {
                first_seen_at: now,
                last_seen_at: now,
                count: 1,
            },
        );
        Ok(true)
    }

    async fn delete_dedupe(&self, key: &str) -> Result<()> {
        self.state.lock().await.dedupe.remove(key);
        Ok(())
    }

    async fn purge_throttle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut s = self.state.lock().await;
        let before = s.throttle.len();
        s.throttle.retain(|(_, at)| *at >= cutoff);
        Ok((before - s.throttle.len()) as u64)
    }

    async fn count_throttle(&self, key: &str, since: DateTime<Utc>) -> Result<i64> {
        let s = self.state.lock().await;
        Ok(s.throttle
            .iter()
            .filter(|(k, at)| k == key && *at > since)
            .count() as i64)
    }

    async fn insert_throttle(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        self.state
            .lock()
            .await
            .throttle
            .push((key.to_string(), now));
        Ok(())
    }

    async fn insert_decision(&self, decision: &NotificationDecision) -> Result<()> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("insert_decision")?;
        s.decisions.push(decision.clone());
        Ok(())
    }

    async fn insert_result(&self, result: &NotificationResult) -> Result<()> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("insert_result")?;
        s.results.push(result.clone());
        Ok(())
    }

    async fn find_result_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<NotificationResult>> {
        let s = self.state.lock().await;
        Ok(s.results
            .iter()
            .rev()
            .find(|r| r.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    async fn insert_delivery_event(&self, event: &DeliveryEvent) -> Result<()> {
        self.state.lock().await.delivery_events.push(event.clone());
        Ok(())
    }

    async fn set_delivery_status(&self, result_id: Uuid, status: &str) -> Result<()> {
        let mut s = self.state.lock().await;
        if let Some(r) = s.results.iter_mut().find(|r| r.result_id == result_id) {
            if !r.is_terminal() {
                r.delivery_status = Some(status.to_string());
            }
        }
        Ok(())
    }

    async fn upsert_vehicle_stat(&self, stat: &VehicleStat) -> Result<()> {
        let mut s = self.state.lock().await;
        match s
            .vehicle_stats
            .iter_mut()
            .find(|v| v.tenant_id == stat.tenant_id && v.vehicle_id == stat.vehicle_id)
        {
            Some(existing) => {
                if stat.vehicle_name.is_some() {
                    existing.vehicle_name = stat.vehicle_name.clone();
                }
                if stat.last_stat_at >= existing.last_stat_at {
                    existing.last_stat_at = stat.last_stat_at;
                    existing.lat = stat.lat;
                    existing.lon = stat.lon;
                }
            }
            None => s.vehicle_stats.push(stat.clone()),
        }
        Ok(())
    }

    async fn list_vehicle_stats(&self, tenant_id: Uuid) -> Result<Vec<VehicleStat>> {
        let s = self.state.lock().await;
        Ok(s.vehicle_stats
            .iter()
            .filter(|v| v.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn open_stale_alert(
        &self,
        tenant_id: Uuid,
        vehicle_id: &str,
    ) -> Result<Option<StaleAssetAlert>> {
        let mut s = self.state.lock().await;
        s.fail_if_armed("open_stale_alert")?;
        Ok(s.stale_alerts
            .iter()
            .find(|a| {
                a.tenant_id == tenant_id && a.vehicle_id == vehicle_id && a.resolved_at.is_none()
            })
            .cloned())
    }

    async fn list_open_stale_alerts(&self, tenant_id: Uuid) -> Result<Vec<StaleAssetAlert>> {
        let s = self.state.lock().await;
        Ok(s.stale_alerts
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.resolved_at.is_none())
            .cloned()
            .collect())
    }

    async fn insert_stale_alert(&self, alert: &StaleAssetAlert) -> Result<bool> {
        let mut s = self.state.lock().await;
        let open_exists = s.stale_alerts.iter().any(|a| {
            a.tenant_id == alert.tenant_id
                && a.vehicle_id == alert.vehicle_id
                && a.resolved_at.is_none()
        });
        if open_exists {
            return Ok(false);
        }
        s.stale_alerts.push(alert.clone());
        Ok(true)
    }

    async fn refresh_stale_alert(&self, alert: &StaleAssetAlert) -> Result<()> {
        let mut s = self.state.lock().await;
        if let Some(existing) = s
            .stale_alerts
            .iter_mut()
            .find(|a| a.stale_alert_id == alert.stale_alert_id && a.resolved_at.is_none())
        {
            existing.last_stat_at = alert.last_stat_at;
            existing.alerted_at = alert.alerted_at;
            existing.channels = alert.channels.clone();
            existing.recipients = alert.recipients.clone();
        }
        Ok(())
    }

    async fn discard_stale_alert(&self, stale_alert_id: Uuid) -> Result<()> {
        self.state
            .lock()
            .await
            .stale_alerts
            .retain(|a| !(a.stale_alert_id == stale_alert_id && a.resolved_at.is_none()));
        Ok(())
    }

    async fn resolve_stale_alert(&self, stale_alert_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut s = self.state.lock().await;
        match s
            .stale_alerts
            .iter_mut()
            .find(|a| a.stale_alert_id == stale_alert_id && a.resolved_at.is_none())
        {
            Some(a) => {
                a.resolved_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_incident(&self, incident: &Incident) -> Result<bool> {
        let mut s = self.state.lock().await;
        let exists = s.incidents.iter().any(|i| {
            i.tenant_id == incident.tenant_id && i.dedupe_key == incident.dedupe_key
        });
        if exists {
            return Ok(false);
        }
        s.incidents.push(incident.clone());
        Ok(true)
    }

    async fn link_incident_signals(&self, links: &[IncidentSignal]) -> Result<()> {
        let mut s = self.state.lock().await;
        for link in links {
            let exists = s
                .incident_signals
                .iter()
                .any(|l| l.incident_id == link.incident_id && l.signal_id == link.signal_id);
            if !exists {
                s.incident_signals.push(link.clone());
            }
        }
        Ok(())
    }

    async fn list_incidents(&self, tenant_id: Uuid) -> Result<Vec<Incident>> {
        let s = self.state.lock().await;
        Ok(s.incidents
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn incident_signals(&self, incident_id: Uuid) -> Result<Vec<IncidentSignal>> {
        let s = self.state.lock().await;
        Ok(s.incident_signals
            .iter()
            .filter(|l| l.incident_id == incident_id)
            .cloned()
            .collect())
    }

    async fn load_cursor(&self, tenant_id: Uuid) -> Result<Option<StreamCursor>> {
        Ok(self.state.lock().await.cursors.get(&tenant_id).cloned())
    }

    async fn save_cursor(&self, cursor: &StreamCursor, _now: DateTime<Utc>) -> Result<()> {
        self.state
            .lock()
            .await
            .cursors
            .insert(cursor.tenant_id, cursor.clone());
        Ok(())
    }

    async fn clear_cursor(&self, tenant_id: Uuid) -> Result<()> {
        self.state.lock().await.cursors.remove(&tenant_id);
        Ok(())
    }
}
