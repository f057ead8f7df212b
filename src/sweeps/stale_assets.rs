use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{tenants_in_scope, SweepOptions, SweepSummary};
use crate::gates::dedup;
use crate::models::notification::Contact;
use crate::models::stale_asset::{StaleAssetAlert, VehicleStat};
use crate::models::tenant::Tenant;
use crate::notify::decision::build_stale_asset_decision;
use crate::policy::TenantPolicy;
use crate::processor::pipeline::Engine;

/// Flags vehicles whose telemetry went quiet, then resolves open records for vehicles
/// that are reporting again. Both passes work off the same snapshot of vehicle stats.
pub async fn run(engine: &Engine, opts: SweepOptions, now: DateTime<Utc>) -> Result<SweepSummary> {
    let mut summary = SweepSummary::new("stale_assets", &opts);

    for tenant in tenants_in_scope(engine.store.as_ref(), &opts).await? {
        let policy = TenantPolicy::load_or_default(tenant.tenant_id, &tenant.settings.0);
        if !policy.stale.enabled {
            continue;
        }
        if let Err(e) = sweep_tenant(engine, &tenant, &policy, &opts, now, &mut summary).await {
            error!(
                "Stale asset sweep failed for tenant {}: {:#}",
                tenant.tenant_id, e
            );
            summary.failed += 1;
        }
    }

    info!(
        "Stale asset sweep: {} vehicles, {} alerted, {} re-alerted, {} resolved",
        summary.examined, summary.created, summary.updated, summary.resolved
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Created,
    Realerted,
    Skipped,
}

async fn sweep_tenant(
    engine: &Engine,
    tenant: &Tenant,
    policy: &TenantPolicy,
    opts: &SweepOptions,
    now: DateTime<Utc>,
    summary: &mut SweepSummary,
) -> Result<()> {
    let store = engine.store.as_ref();
    let stats = store.list_vehicle_stats(tenant.tenant_id).await?;
    let contacts = store.list_contacts(tenant.tenant_id).await?;
    let threshold = policy.stale.threshold_minutes;

    // Detection
    for stat in stats.iter().filter(|s| s.is_stale(threshold, now)) {
        summary.examined += 1;
        match flag_vehicle(engine, tenant, stat, policy, &contacts, opts.dry_run, now).await {
            Ok(Flag::Created) => summary.created += 1,
            Ok(Flag::Realerted) => summary.updated += 1,
            Ok(Flag::Skipped) => summary.skipped += 1,
            Err(e) => {
                error!("Stale check for vehicle {} failed: {:#}", stat.vehicle_id, e);
                summary.failed += 1;
            }
        }
    }

    // Recovery
    for open in store.list_open_stale_alerts(tenant.tenant_id).await? {
        let Some(stat) = stats.iter().find(|s| s.vehicle_id == open.vehicle_id) else {
            continue;
        };
        if stat.is_stale(threshold, now) {
            continue;
        }
        if opts.dry_run {
            info!("[dry-run] Vehicle {} would be resolved", open.vehicle_id);
            summary.resolved += 1;
            continue;
        }
        match store.resolve_stale_alert(open.stale_alert_id, now).await {
            Ok(true) => {
                info!("Vehicle {} reporting again, stale alert resolved", open.vehicle_id);
                summary.resolved += 1;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Could not resolve stale alert for vehicle {}: {:#}", open.vehicle_id, e);
                summary.failed += 1;
            }
        }
    }
    Ok(())
}

async fn flag_vehicle(
    engine: &Engine,
    tenant: &Tenant,
    stat: &VehicleStat,
    policy: &TenantPolicy,
    contacts: &[Contact],
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<Flag> {
    let store = engine.store.as_ref();
    let open = store
        .open_stale_alert(tenant.tenant_id, &stat.vehicle_id)
        .await?;

    match open {
        Some(existing) if !existing.cooldown_elapsed(policy.stale.cooldown_minutes, now) => {
            Ok(Flag::Skipped)
        }
        Some(existing) => {
            if dry_run {
                info!("[dry-run] Vehicle {} would be re-alerted", stat.vehicle_id);
                return Ok(Flag::Realerted);
            }
            let claim = format!(
                "stale:{}:{}:{}",
                tenant.tenant_id,
                stat.vehicle_id,
                existing.alerted_at.timestamp()
            );
            if dedup::is_duplicate(store, &claim, policy.dedupe.ttl_hours, now).await? {
                return Ok(Flag::Skipped);
            }
            let mut refreshed = existing.clone();
            let sent = match notify(engine, &mut refreshed, stat, policy, contacts, now).await {
                Ok(()) => store.refresh_stale_alert(&refreshed).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                if let Err(release_err) = dedup::release(store, &claim).await {
                    warn!("Could not release {}: {:#}", claim, release_err);
                }
                return Err(e);
            }
            Ok(Flag::Realerted)
        }
        None => {
            if dry_run {
                info!("[dry-run] Vehicle {} would be flagged stale", stat.vehicle_id);
                return Ok(Flag::Created);
            }
            let mut record = StaleAssetAlert {
                stale_alert_id: Uuid::new_v4(),
                tenant_id: tenant.tenant_id,
                vehicle_id: stat.vehicle_id.clone(),
                vehicle_name: stat.vehicle_name.clone(),
                last_stat_at: stat.last_stat_at,
                alerted_at: now,
                resolved_at: None,
                channels: Vec::new(),
                recipients: Vec::new(),
            };
            // The open-record constraint decides which sweep owns the vehicle.
            if !store.insert_stale_alert(&record).await? {
                return Ok(Flag::Skipped);
            }
            // An open record whose notification never went out would mute the vehicle
            // until the cooldown; drop it so the next sweep starts over.
            if let Err(e) = notify(engine, &mut record, stat, policy, contacts, now).await {
                if let Err(discard_err) = store.discard_stale_alert(record.stale_alert_id).await {
                    warn!(
                        "Could not discard stale record for vehicle {}: {:#}",
                        stat.vehicle_id, discard_err
                    );
                }
                return Err(e);
            }
            store.refresh_stale_alert(&record).await?;
            Ok(Flag::Created)
        }
    }
}

async fn notify(
    engine: &Engine,
    record: &mut StaleAssetAlert,
    stat: &VehicleStat,
    policy: &TenantPolicy,
    contacts: &[Contact],
    now: DateTime<Utc>,
) -> Result<()> {
    let decision = build_stale_asset_decision(record.tenant_id, stat, policy, contacts, now);
    engine.store.insert_decision(&decision).await?;
    let report = engine.dispatcher.dispatch(&decision, now).await;
    if let Err(e) = report.outcome() {
        warn!("Stale alert for vehicle {}: {}", stat.vehicle_id, e);
    }
    record.alerted_at = now;
    record.last_stat_at = stat.last_stat_at;
    record.channels = decision.channel_names();
    record.recipients = decision.recipients.iter().map(|r| r.name.clone()).collect();
    Ok(())
}
