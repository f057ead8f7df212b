//! Fixtures and fakes shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::alert::{
    AckStatus, AiStatus, Alert, AttentionState, HumanStatus, RiskEscalation,
};
use crate::models::notification::{Channel, Contact};
use crate::models::signal::{classify_severity, Signal};
use crate::models::tenant::Tenant;
use crate::notify::channels::{ChannelProvider, OutboundMessage, ProviderReceipt};

/// 2026-03-01 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0)
        .single()
        .expect("valid fixture time")
}

pub fn minutes_before(t: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    t - Duration::minutes(minutes)
}

pub fn tenant(settings: Value) -> Tenant {
    Tenant {
        tenant_id: Uuid::new_v4(),
        name: "Acme Freight".into(),
        provider_api_token: Some("token".into()),
        settings: Json(settings),
        active: true,
    }
}

pub fn contact(tenant_id: Uuid, name: &str, recipient_type: &str, priority: i32) -> Contact {
    Contact {
        contact_id: Uuid::new_v4(),
        tenant_id,
        name: name.into(),
        recipient_type: recipient_type.into(),
        phone: Some(format!("+1555{:04}", priority * 100 + name.len() as i32)),
        whatsapp: Some(format!("+1666{:04}", priority * 100 + name.len() as i32)),
        priority,
        active: true,
    }
}

pub struct SignalBuilder {
    signal: Signal,
}

impl SignalBuilder {
    pub fn new(tenant_id: Uuid, event_id: &str) -> Self {
        Self {
            signal: Signal {
                signal_id: Signal::derive_id(tenant_id, event_id),
                tenant_id,
                provider_event_id: event_id.into(),
                vehicle_id: Some("veh-1".into()),
                vehicle_name: Some("Truck 1".into()),
                driver_id: None,
                driver_name: None,
                behavior_labels: vec!["harsh_brake".into()],
                severity: classify_severity(&["harsh_brake".to_string()]),
                lat: Some(19.43),
                lon: Some(-99.13),
                occurred_at: at(12, 0),
                received_at: at(12, 0),
                raw_payload: Json(json!({ "id": event_id })),
            },
        }
    }

    pub fn vehicle(mut self, id: &str) -> Self {
        self.signal.vehicle_id = Some(id.into());
        self.signal.vehicle_name = Some(format!("Unit {}", id));
        self
    }

    pub fn driver(mut self, id: &str) -> Self {
        self.signal.driver_id = Some(id.into());
        self.signal.driver_name = Some(format!("Driver {}", id));
        self
    }

    pub fn behaviors(mut self, labels: &[&str]) -> Self {
        self.signal.behavior_labels = labels.iter().map(|l| l.to_string()).collect();
        self.signal.severity = classify_severity(&self.signal.behavior_labels);
        self
    }

    pub fn occurred_at(mut self, t: DateTime<Utc>) -> Self {
        self.signal.occurred_at = t;
        self.signal.received_at = t;
        self
    }

    pub fn build(self) -> Signal {
        self.signal
    }
}

pub fn alert_fixture() -> Alert {
    let signal = SignalBuilder::new(Uuid::new_v4(), "evt-fixture").build();
    let mut alert = Alert::from_signal(&signal, at(12, 0));
    alert.ai_status = AiStatus::Pending;
    alert.human_status = HumanStatus::Pending;
    alert.attention_state = AttentionState::NeedsAttention;
    alert.ack_status = AckStatus::Pending;
    alert.acked_at = None;
    alert.risk_escalation = RiskEscalation::Warn;
    alert
}

/// Channel provider that records every send and fails for configured destinations.
#[derive(Default)]
pub struct RecordingProvider {
    fail_for: Vec<String>,
    sent: Mutex<Vec<(Channel, String)>>,
    counter: AtomicUsize,
}

impl RecordingProvider {
    pub fn failing_for(destinations: &[&str]) -> Self {
        Self {
            fail_for: destinations.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    pub async fn sent(&self) -> Vec<(Channel, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChannelProvider for RecordingProvider {
    async fn send(&self, message: &OutboundMessage<'_>) -> Result<ProviderReceipt, ProviderError> {
        self.sent
            .lock()
            .await
            .push((message.channel, message.to.to_string()));
        if self.fail_for.iter().any(|d| d == message.to) {
            return Err(ProviderError::Status {
                status: 400,
                body: "unreachable destination".into(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderReceipt {
            provider_id: format!("msg-{}", n),
            status: None,
        })
    }
}
