use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Latest telemetry timestamp known for a vehicle.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VehicleStat {
    pub tenant_id: Uuid,
    pub vehicle_id: String,
    pub vehicle_name: Option<String>,
    pub last_stat_at: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl VehicleStat {
    pub fn is_stale(&self, threshold_minutes: i64, now: DateTime<Utc>) -> bool {
        match self.last_stat_at {
            None => true,
            Some(at) => (now - at).num_minutes() > threshold_minutes,
        }
    }
}

/// Open while `resolved_at` is `None`; at most one open record per (tenant, vehicle).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StaleAssetAlert {
    pub stale_alert_id: Uuid,
    pub tenant_id: Uuid,
    pub vehicle_id: String,
    pub vehicle_name: Option<String>,
    pub last_stat_at: Option<DateTime<Utc>>,
    pub alerted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub channels: Vec<String>,
    pub recipients: Vec<String>,
}

impl StaleAssetAlert {
    pub fn cooldown_elapsed(&self, cooldown_minutes: i64, now: DateTime<Utc>) -> bool {
        (now - self.alerted_at).num_minutes() >= cooldown_minutes
    }
}
