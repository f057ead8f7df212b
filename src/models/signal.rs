use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum!(
    /// Severity classification shared by signals and alerts.
    Severity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
);

impl Severity {
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }
}

/// Behaviors that always warrant a critical classification.
const CRITICAL_BEHAVIORS: &[&str] = &[
    "crash",
    "collision",
    "near_collision",
    "panic_button",
    "rollover",
];

const WARNING_BEHAVIORS: &[&str] = &[
    "harsh_brake",
    "harsh_acceleration",
    "harsh_turn",
    "speeding",
    "severe_speeding",
    "distracted_driving",
    "drowsiness",
    "mobile_usage",
    "following_distance",
    "rolling_stop",
    "obstructed_camera",
];

/// Lowercases a provider behavior label and joins words with underscores,
/// so "Harsh Brake", "harsh-brake" and "harshBrake" land on the same key.
pub fn normalize_behavior(label: &str) -> String {
    let mut out = String::with_capacity(label.len() + 4);
    let mut prev_lower = false;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
            prev_lower = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    match out.as_str() {
        "harsh_braking" => "harsh_brake".to_string(),
        "harsh_accel" => "harsh_acceleration".to_string(),
        "harsh_turning" | "harsh_cornering" => "harsh_turn".to_string(),
        "panic" | "panic_alert" => "panic_button".to_string(),
        _ => out,
    }
}

pub fn classify_severity(behaviors: &[String]) -> Severity {
    let normalized: Vec<String> = behaviors.iter().map(|b| normalize_behavior(b)).collect();
    if normalized
        .iter()
        .any(|b| CRITICAL_BEHAVIORS.contains(&b.as_str()))
    {
        Severity::Critical
    } else if normalized
        .iter()
        .any(|b| WARNING_BEHAVIORS.contains(&b.as_str()))
    {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Immutable record of one inbound safety or panic event.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub tenant_id: Uuid,
    pub provider_event_id: String,
    pub vehicle_id: Option<String>,
    pub vehicle_name: Option<String>,
    pub driver_id: Option<String>,
    pub driver_name: Option<String>,
    pub behavior_labels: Vec<String>,
    #[sqlx(try_from = "String")]
    pub severity: Severity,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub raw_payload: Json<Value>,
}

impl Signal {
    /// Signal ids are derived from (tenant, provider event id) so replays map to the same row.
    pub fn derive_id(tenant_id: Uuid, provider_event_id: &str) -> Uuid {
        Uuid::new_v5(&tenant_id, provider_event_id.as_bytes())
    }

    pub fn primary_behavior(&self) -> String {
        self.behavior_labels
            .first()
            .map(|b| normalize_behavior(b))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_panic(&self) -> bool {
        self.behavior_labels
            .iter()
            .any(|b| normalize_behavior(b) == "panic_button")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_behavior_variants() {
        assert_eq!(normalize_behavior("Harsh Brake"), "harsh_brake");
        assert_eq!(normalize_behavior("harsh-braking"), "harsh_brake");
        assert_eq!(normalize_behavior("harshBrake"), "harsh_brake");
        assert_eq!(normalize_behavior("  Crash "), "crash");
        assert_eq!(normalize_behavior("PanicButton"), "panic_button");
        assert_eq!(normalize_behavior("__"), "");
    }

    #[test]
    fn test_classify_severity() {
        assert_eq!(classify_severity(&["Crash".into()]), Severity::Critical);
        assert_eq!(
            classify_severity(&["Speeding".into(), "Other".into()]),
            Severity::Warning
        );
        assert_eq!(classify_severity(&["Seatbelt".into()]), Severity::Info);
        assert_eq!(classify_severity(&[]), Severity::Info);
    }

    #[test]
    fn test_signal_id_is_stable_per_tenant() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(Signal::derive_id(tenant, "evt-1"), Signal::derive_id(tenant, "evt-1"));
        assert_ne!(Signal::derive_id(tenant, "evt-1"), Signal::derive_id(other, "evt-1"));
    }
}
