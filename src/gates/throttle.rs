use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::db::Store;

pub const DEFAULT_WINDOW_MINUTES: i64 = 30;
pub const DEFAULT_MAX_COUNT: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleVerdict {
    pub throttled: bool,
    pub reason: Option<String>,
}

/// `v:<vehicle>` and/or `d:<driver>` joined with `:`; `global` when neither is known.
pub fn throttle_key(vehicle_id: Option<&str>, driver_id: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(v) = vehicle_id.map(str::trim).filter(|v| !v.is_empty()) {
        parts.push(format!("v:{}", v));
    }
    if let Some(d) = driver_id.map(str::trim).filter(|d| !d.is_empty()) {
        parts.push(format!("d:{}", d));
    }
    if parts.is_empty() {
        "global".to_string()
    } else {
        parts.join(":")
    }
}

/// Checks whether `key` already hit `max_count` notifications inside the window.
/// Does not record anything; call [`record`] once the notification is decided.
pub async fn should_throttle(
    store: &dyn Store,
    key: &str,
    window_minutes: i64,
    max_count: i64,
    now: DateTime<Utc>,
) -> Result<ThrottleVerdict> {
    store
        .purge_throttle(now - Duration::minutes(window_minutes * 2))
        .await?;

    let count = store
        .count_throttle(key, now - Duration::minutes(window_minutes))
        .await?;

    if count >= max_count {
        return Ok(ThrottleVerdict {
            throttled: true,
            reason: Some(format!(
                "{} already received {} notifications in the last {} minutes (limit {})",
                key, count, window_minutes, max_count
            )),
        });
    }

    Ok(ThrottleVerdict {
        throttled: false,
        reason: None,
    })
}

pub async fn record(store: &dyn Store, key: &str, now: DateTime<Utc>) -> Result<()> {
    store.insert_throttle(key, now).await
}
