use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{escalation, patterns, revalidation, stale_assets, SweepOptions};
use crate::config::AppConfig;
use crate::processor::pipeline::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Escalation,
    StaleAssets,
    Patterns,
    Revalidation,
}

impl SweepKind {
    pub fn name(&self) -> &'static str {
        match self {
            SweepKind::Escalation => "escalation",
            SweepKind::StaleAssets => "stale-assets",
            SweepKind::Patterns => "patterns",
            SweepKind::Revalidation => "revalidation",
        }
    }

    pub fn from_name(name: &str) -> Option<SweepKind> {
        match name {
            "escalation" => Some(SweepKind::Escalation),
            "stale-assets" => Some(SweepKind::StaleAssets),
            "patterns" => Some(SweepKind::Patterns),
            "revalidation" => Some(SweepKind::Revalidation),
            _ => None,
        }
    }
}

pub async fn run_sweep(
    engine: &Engine,
    kind: SweepKind,
    opts: SweepOptions,
) -> anyhow::Result<super::SweepSummary> {
    let now = Utc::now();
    match kind {
        SweepKind::Escalation => escalation::run(engine, opts, now).await,
        SweepKind::StaleAssets => stale_assets::run(engine, opts, now).await,
        SweepKind::Patterns => patterns::run(engine, opts, now).await,
        SweepKind::Revalidation => revalidation::run(engine, opts, now).await,
    }
}

/// Starts one ticking task per sweep. A tick that is still running when the next is due
/// is skipped rather than queued.
pub fn spawn_sweeps(
    engine: Arc<Engine>,
    config: &AppConfig,
    cancel_token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    [
        (SweepKind::Escalation, config.escalation_sweep_secs),
        (SweepKind::StaleAssets, config.stale_sweep_secs),
        (SweepKind::Patterns, config.pattern_sweep_secs),
        (SweepKind::Revalidation, config.revalidation_sweep_secs),
    ]
    .into_iter()
    .filter(|(_, secs)| *secs > 0)
    .map(|(kind, secs)| {
        let engine = engine.clone();
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move { sweep_loop(engine, kind, secs, cancel_token).await })
    })
    .collect()
}

async fn sweep_loop(
    engine: Arc<Engine>,
    kind: SweepKind,
    every_secs: u64,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(Duration::from_secs(every_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Sweep '{}' scheduled every {}s", kind.name(), every_secs);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_sweep(&engine, kind, SweepOptions::all()).await {
                    error!("Sweep '{}' failed: {:#}", kind.name(), e);
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Sweep '{}' stopped", kind.name());
                break;
            }
        }
    }
}
