use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::TelematicsSource;
use crate::config::AppConfig;
use crate::error::ProviderError;
use crate::models::payload::{parse_timestamp, SafetyEventData};
use crate::models::stale_asset::VehicleStat;
use crate::models::tenant::{StreamCursor, Tenant};
use crate::processor::pipeline::Engine;

/// Upper bound on pages fetched per feed per cycle.
const MAX_PAGES_PER_CYCLE: usize = 50;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub lookback_minutes: i64,
    pub max_retries: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl From<&AppConfig> for PollerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval_secs: config.poll_interval_secs,
            lookback_minutes: config.poll_lookback_minutes,
            max_retries: config.poll_max_retries,
            circuit_breaker_cooldown_secs: config.poll_circuit_breaker_cooldown,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PollSummary {
    pub tenants: usize,
    pub failed_tenants: usize,
    pub rejected_tenants: usize,
    pub events: usize,
    pub created: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub vehicle_stats: usize,
}

pub struct Poller {
    engine: Arc<Engine>,
    source: Arc<dyn TelematicsSource>,
    config: PollerConfig,
}

/// Errors other than provider outages (bad token, bad request) stay with their tenant.
fn is_outage(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ProviderError>()
        .map(|p| p.is_transient())
        .unwrap_or(true)
}

fn is_invalid_cursor(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ProviderError>(),
        Some(ProviderError::InvalidCursor(_))
    )
}

impl Poller {
    pub fn new(engine: Arc<Engine>, source: Arc<dyn TelematicsSource>, config: PollerConfig) -> Self {
        Self {
            engine,
            source,
            config,
        }
    }

    /// Polls every tenant on a fixed interval with a circuit breaker around provider
    /// failures. A cancelled token lets the in-flight cycle finish before returning.
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let cooldown = Duration::from_secs(self.config.circuit_breaker_cooldown_secs);
        let mut consecutive_failures = 0u32;

        info!(
            "Poller started (every {}s, lookback {} min)",
            self.config.interval_secs, self.config.lookback_minutes
        );

        loop {
            // Circuit breaker check
            if consecutive_failures >= self.config.max_retries {
                warn!(
                    "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                    consecutive_failures, self.config.circuit_breaker_cooldown_secs
                );
                tokio::select! {
                    _ = sleep(cooldown) => {}
                    _ = cancel_token.cancelled() => break,
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset. Resuming polling.");
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once(Utc::now()).await {
                        Ok(summary) => {
                            consecutive_failures = 0;
                            if summary.events > 0 {
                                info!(
                                    "Poll cycle: {} events, {} new, {} duplicates, {} rejected",
                                    summary.events, summary.created, summary.duplicates, summary.rejected
                                );
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                "Poll cycle failed: {:#}. Failure count ({} / {})",
                                e, consecutive_failures, self.config.max_retries
                            );
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Poller stopped");
    }

    /// One cycle over all active tenants. Fails only when no tenant could be polled.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        let tenants = self.engine.store.list_tenants().await?;

        for tenant in &tenants {
            let Some(token) = tenant.provider_api_token.as_deref().filter(|t| !t.is_empty())
            else {
                debug!("Tenant {} has no provider token, skipping", tenant.tenant_id);
                continue;
            };
            summary.tenants += 1;

            match self.poll_tenant(tenant, token, now, &mut summary).await {
                Ok(()) => {}
                Err(e) if is_outage(&e) => {
                    error!("Polling tenant {} failed: {:#}", tenant.tenant_id, e);
                    summary.failed_tenants += 1;
                }
                Err(e) => {
                    warn!("Provider rejected tenant {}: {:#}", tenant.tenant_id, e);
                    summary.rejected_tenants += 1;
                }
            }
        }

        if summary.failed_tenants > 0 && summary.failed_tenants == summary.tenants {
            return Err(anyhow!("all {} tenants failed to poll", summary.tenants));
        }
        Ok(summary)
    }

    async fn poll_tenant(
        &self,
        tenant: &Tenant,
        token: &str,
        now: DateTime<Utc>,
        summary: &mut PollSummary,
    ) -> Result<()> {
        let store = self.engine.store.as_ref();
        let cursor = store.load_cursor(tenant.tenant_id).await?;
        let had_cursor = cursor.is_some();

        match self.pull_events(tenant, token, cursor, now, summary).await {
            Err(e) if had_cursor && is_invalid_cursor(&e) => {
                warn!(
                    "Stored cursor for tenant {} rejected ({:#}), restarting from lookback window",
                    tenant.tenant_id, e
                );
                store.clear_cursor(tenant.tenant_id).await?;
                self.pull_events(tenant, token, None, now, summary).await?;
            }
            other => other?,
        }

        summary.vehicle_stats += self.sync_vehicle_stats(tenant, token).await?;
        Ok(())
    }

    async fn pull_events(
        &self,
        tenant: &Tenant,
        token: &str,
        cursor: Option<StreamCursor>,
        now: DateTime<Utc>,
        summary: &mut PollSummary,
    ) -> Result<()> {
        let store = self.engine.store.as_ref();
        let start_time = cursor
            .as_ref()
            .map(|c| c.start_time)
            .unwrap_or_else(|| now - ChronoDuration::minutes(self.config.lookback_minutes));
        let mut after = cursor.map(|c| c.cursor);

        for _ in 0..MAX_PAGES_PER_CYCLE {
            let page = self
                .source
                .safety_events(token, start_time, after.as_deref())
                .await?;

            for raw in page.data {
                summary.events += 1;
                let signal = match serde_json::from_value::<SafetyEventData>(raw.clone())
                    .map_err(|e| e.to_string())
                    .and_then(|data| {
                        data.into_signal(tenant.tenant_id, raw, now)
                            .map_err(|e| e.to_string())
                    }) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Skipping event for tenant {}: {}", tenant.tenant_id, e);
                        summary.rejected += 1;
                        continue;
                    }
                };

                match self.engine.record_signal(&signal, now).await? {
                    None => summary.duplicates += 1,
                    Some(alert) => {
                        summary.created += 1;
                        let alert_id = alert.alert_id;
                        if let Err(e) = self.engine.process_alert(alert, now).await {
                            error!("Processing alert {} failed: {:#}", alert_id, e);
                        }
                    }
                }
            }

            // cursor and the start time it belongs to are stored together
            if !page.pagination.end_cursor.is_empty() {
                store
                    .save_cursor(
                        &StreamCursor {
                            tenant_id: tenant.tenant_id,
                            cursor: page.pagination.end_cursor.clone(),
                            start_time,
                        },
                        now,
                    )
                    .await?;
                after = Some(page.pagination.end_cursor);
            }

            if !page.pagination.has_next_page {
                break;
            }
        }
        Ok(())
    }

    async fn sync_vehicle_stats(&self, tenant: &Tenant, token: &str) -> Result<usize> {
        let store = self.engine.store.as_ref();
        let mut after: Option<String> = None;
        let mut synced = 0;

        for _ in 0..MAX_PAGES_PER_CYCLE {
            let page = self.source.vehicle_stats(token, after.as_deref()).await?;
            for record in page.data {
                let gps = record.gps;
                let stat = VehicleStat {
                    tenant_id: tenant.tenant_id,
                    vehicle_id: record.id,
                    vehicle_name: record.name,
                    last_stat_at: gps
                        .as_ref()
                        .and_then(|g| g.time.as_deref())
                        .and_then(parse_timestamp),
                    lat: gps.as_ref().and_then(|g| g.latitude),
                    lon: gps.as_ref().and_then(|g| g.longitude),
                };
                store.upsert_vehicle_stat(&stat).await?;
                synced += 1;
            }
            if !page.pagination.has_next_page || page.pagination.end_cursor.is_empty() {
                break;
            }
            after = Some(page.pagination.end_cursor);
        }
        Ok(synced)
    }
}
