use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

use super::{SweepOptions, SweepSummary};
use crate::processor::pipeline::{Engine, ProcessOutcome};

/// Alerts left mid-pipeline for this long are picked up again.
pub const RETRY_GRACE_MINUTES: i64 = 5;

/// Gives investigating alerts another assessment round once their check interval passed,
/// then resumes alerts whose earlier run stopped before a decision was recorded.
pub async fn run(engine: &Engine, opts: SweepOptions, now: DateTime<Utc>) -> Result<SweepSummary> {
    let mut summary = SweepSummary::new("revalidation", &opts);
    let alerts = engine
        .store
        .list_investigating_alerts(opts.tenant_id)
        .await?;

    for alert in alerts {
        summary.examined += 1;
        if !alert.should_revalidate(now) {
            summary.skipped += 1;
            continue;
        }
        if opts.dry_run {
            info!(
                "[dry-run] Alert {} would be revalidated (round {})",
                alert.alert_id,
                alert.investigation_count + 1
            );
            summary.updated += 1;
            continue;
        }

        let alert_id = alert.alert_id;
        match engine.process_alert(alert, now).await {
            Ok(ProcessOutcome::Investigating) => summary.skipped += 1,
            Ok(ProcessOutcome::Failed) => summary.failed += 1,
            Ok(_) => summary.resolved += 1,
            Err(e) => {
                error!("Revalidation of alert {} failed: {:#}", alert_id, e);
                summary.failed += 1;
            }
        }
    }

    let stuck_before = now - Duration::minutes(RETRY_GRACE_MINUTES);
    let stalled = engine
        .store
        .alerts_needing_retry(opts.tenant_id, stuck_before)
        .await?;
    for alert in stalled {
        summary.examined += 1;
        if opts.dry_run {
            info!(
                "[dry-run] Alert {} stuck at {} would be resumed",
                alert.alert_id, alert.ai_status
            );
            summary.updated += 1;
            continue;
        }

        let alert_id = alert.alert_id;
        let stuck_at = alert.ai_status;
        match engine.retry_alert(alert, now).await {
            Ok(ProcessOutcome::Investigating) => summary.skipped += 1,
            Ok(ProcessOutcome::Failed) => summary.failed += 1,
            Ok(_) => {
                info!("Alert {} resumed from {}", alert_id, stuck_at);
                summary.resolved += 1;
            }
            Err(e) => {
                error!("Resuming alert {} failed: {:#}", alert_id, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Revalidation sweep: {} examined, {} concluded, {} still open, {} failed",
        summary.examined, summary.resolved, summary.skipped, summary.failed
    );
    Ok(summary)
}
