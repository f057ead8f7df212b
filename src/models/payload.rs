use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

use super::signal::{classify_severity, Signal};

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("event is missing its provider id")]
    MissingEventId,
    #[error("event {0} is missing a vehicle id")]
    MissingVehicleId(String),
    #[error("event {0} has an invalid timestamp '{1}'")]
    InvalidTimestamp(String, String),
}

/// Webhook envelope posted by the telematics provider.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub event_time: Option<String>,
    pub data: SafetyEventData,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafetyEventData {
    pub id: Option<String>,
    pub time: Option<String>,
    pub vehicle: Option<NamedRef>,
    pub driver: Option<NamedRef>,
    pub location: Option<Location>,
    #[serde(default)]
    pub behavior_labels: Vec<BehaviorLabel>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamedRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Location {
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BehaviorLabel {
    pub label: String,
    pub source: Option<String>,
}

/// One page of the provider's safety-event feed.
#[derive(Debug, Deserialize)]
pub struct FeedPage<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub end_cursor: String,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
pub struct VehicleStatRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: Option<String>,
    pub gps: Option<GpsStat>,
}

#[derive(Debug, Deserialize)]
pub struct GpsStat {
    pub time: Option<String>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
}

const PANIC_EVENT_TYPES: &[&str] = &["panicbutton", "panic_button", "panicbuttonpressed"];

impl WebhookEnvelope {
    pub fn into_signal(
        self,
        tenant_id: Uuid,
        raw: Value,
        now: DateTime<Utc>,
    ) -> Result<Signal, PayloadError> {
        let is_panic = self
            .event_type
            .as_deref()
            .map(|t| PANIC_EVENT_TYPES.contains(&t.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        let mut data = self.data;
        if data.id.is_none() {
            data.id = self.event_id;
        }
        if data.time.is_none() {
            data.time = self.event_time;
        }
        if is_panic && !data.behavior_labels.iter().any(|b| b.label == "panic_button") {
            data.behavior_labels.insert(
                0,
                BehaviorLabel {
                    label: "panic_button".to_string(),
                    source: Some("event_type".to_string()),
                },
            );
        }
        data.into_signal(tenant_id, raw, now)
    }
}

impl SafetyEventData {
    pub fn into_signal(
        self,
        tenant_id: Uuid,
        raw: Value,
        now: DateTime<Utc>,
    ) -> Result<Signal, PayloadError> {
        let provider_event_id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(PayloadError::MissingEventId)?;

        let vehicle = self
            .vehicle
            .filter(|v| !v.id.trim().is_empty())
            .ok_or_else(|| PayloadError::MissingVehicleId(provider_event_id.clone()))?;

        let occurred_at = match self.time.as_deref() {
            Some(t) => parse_timestamp(t).ok_or_else(|| {
                PayloadError::InvalidTimestamp(provider_event_id.clone(), t.to_string())
            })?,
            None => now,
        };

        let behavior_labels: Vec<String> = self
            .behavior_labels
            .into_iter()
            .map(|b| b.label)
            .filter(|l| !l.trim().is_empty())
            .collect();
        let severity = classify_severity(&behavior_labels);
        let location = self.location.unwrap_or_default();
        let driver = self.driver.filter(|d| !d.id.trim().is_empty());

        Ok(Signal {
            signal_id: Signal::derive_id(tenant_id, &provider_event_id),
            tenant_id,
            provider_event_id,
            vehicle_id: Some(vehicle.id),
            vehicle_name: vehicle.name,
            driver_id: driver.as_ref().map(|d| d.id.clone()),
            driver_name: driver.and_then(|d| d.name),
            behavior_labels,
            severity,
            lat: location.latitude,
            lon: location.longitude,
            occurred_at,
            received_at: now,
            raw_payload: Json(raw),
        })
    }
}

/// Accepts RFC 3339 plus the naive formats some devices still report (taken as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Int(i64),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Ok(s),
        StringOrNumber::Int(i) => Ok(i.to_string()),
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::Severity;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2026-03-01T12:00:00Z").unwrap()
    }

    #[test]
    fn test_parsing_safety_event_payload() {
        let payload = r#"
        {
            "eventId": "wh-991",
            "eventType": "SafetyEvent",
            "eventTime": "2026-03-01T11:58:00Z",
            "data": {
                "id": "se-123",
                "time": "2026-03-01T11:57:30Z",
                "vehicle": { "id": 281474977, "name": "Unidad 12" },
                "driver": { "id": "d-7", "name": "Luis" },
                "location": { "latitude": "+20.652494", "longitude": -100.391404 },
                "behaviorLabels": [
                    { "label": "Crash", "source": "automated" },
                    { "label": "HarshBrake", "source": "automated" }
                ]
            }
        }
        "#;

        let raw: Value = serde_json::from_str(payload).unwrap();
        let env: WebhookEnvelope = serde_json::from_value(raw.clone()).unwrap();
        let tenant = Uuid::new_v4();
        let signal = env.into_signal(tenant, raw, now()).unwrap();

        assert_eq!(signal.provider_event_id, "se-123");
        assert_eq!(signal.vehicle_id.as_deref(), Some("281474977"));
        assert_eq!(signal.driver_id.as_deref(), Some("d-7"));
        assert_eq!(signal.lat, Some(20.652494));
        assert_eq!(signal.lon, Some(-100.391404));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.primary_behavior(), "crash");
        assert_eq!(
            signal.occurred_at,
            parse_timestamp("2026-03-01T11:57:30Z").unwrap()
        );
        assert_eq!(signal.signal_id, Signal::derive_id(tenant, "se-123"));
    }

    #[test]
    fn test_panic_event_type_adds_behavior() {
        let payload = r#"
        {
            "eventId": "panic-1",
            "eventType": "PanicButton",
            "data": { "vehicle": { "id": "v-1" }, "time": "2026-03-01 11:00:00" }
        }
        "#;
        let raw: Value = serde_json::from_str(payload).unwrap();
        let env: WebhookEnvelope = serde_json::from_value(raw.clone()).unwrap();
        let signal = env.into_signal(Uuid::new_v4(), raw, now()).unwrap();

        assert_eq!(signal.provider_event_id, "panic-1");
        assert!(signal.is_panic());
        assert_eq!(signal.severity, Severity::Critical);
    }

    #[test]
    fn test_missing_vehicle_is_rejected() {
        let data = SafetyEventData {
            id: Some("se-1".into()),
            ..Default::default()
        };
        let err = data
            .into_signal(Uuid::new_v4(), Value::Null, now())
            .unwrap_err();
        assert_eq!(err, PayloadError::MissingVehicleId("se-1".into()));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let data = SafetyEventData {
            id: Some("se-2".into()),
            time: Some("yesterday".into()),
            vehicle: Some(NamedRef {
                id: "v".into(),
                name: None,
            }),
            ..Default::default()
        };
        assert!(matches!(
            data.into_signal(Uuid::new_v4(), Value::Null, now()),
            Err(PayloadError::InvalidTimestamp(_, _))
        ));
    }
}
