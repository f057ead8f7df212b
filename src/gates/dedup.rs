use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::Store;

pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Answers "was this key seen within `ttl_hours`?" and records the sighting.
///
/// A blank key is never a duplicate. Lookup and insert are separate statements, so a
/// concurrent caller may insert the key first; the unique constraint turns that race
/// into `true` here.
pub async fn is_duplicate(
    store: &dyn Store,
    key: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let key = key.trim();
    if key.is_empty() {
        return Ok(false);
    }

    let purged = store.purge_dedupe(now - Duration::hours(ttl_hours)).await?;
    if purged > 0 {
        debug!("Purged {} expired dedupe entries", purged);
    }

    if store.bump_dedupe(key, now).await? {
        return Ok(true);
    }

    let inserted = store.insert_dedupe(key, now).await?;
    if !inserted {
        debug!("Dedupe key '{}' inserted concurrently, treating as duplicate", key);
    }
    Ok(!inserted)
}

/// Gives a claimed key back so the work it guarded can be retried.
pub async fn release(store: &dyn Store, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Ok(());
    }
    store.delete_dedupe(key).await
}
