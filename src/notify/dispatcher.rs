use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::channels::{ChannelProvider, OutboundMessage};
use crate::db::Store;
use crate::error::DispatchError;
use crate::models::notification::{
    Channel, DeliveryEvent, DeliveryStatus, NotificationDecision, NotificationRecipient,
    NotificationResult,
};

/// Provider calls in flight per decision.
const MAX_PARALLEL_SENDS: usize = 4;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub channels: Vec<String>,
    pub recipients: Vec<String>,
    /// Attempts whose result row could not be written.
    pub unrecorded: usize,
}

impl DispatchReport {
    /// Only a total failure fails the job; partial delivery counts as success.
    pub fn outcome(&self) -> Result<(), DispatchError> {
        if self.attempted > 0 && self.succeeded == 0 {
            Err(DispatchError::AllFailed {
                attempts: self.attempted,
            })
        } else {
            Ok(())
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    provider: Arc<dyn ChannelProvider>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn ChannelProvider>) -> Self {
        Self { store, provider }
    }

    async fn send_one(
        &self,
        decision: &NotificationDecision,
        recipient: &NotificationRecipient,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> NotificationResult {
        let mut result = NotificationResult {
            result_id: Uuid::new_v4(),
            decision_id: decision.decision_id,
            channel: channel.as_str().to_string(),
            recipient_name: recipient.name.clone(),
            destination: None,
            success: false,
            error: None,
            provider_id: None,
            delivery_status: None,
            created_at: now,
        };

        let Some(to) = recipient.destination(channel) else {
            result.error = Some(format!("{} has no address for {}", recipient.name, channel));
            return result;
        };
        result.destination = Some(to.to_string());

        let message = OutboundMessage {
            channel,
            to,
            body: &decision.message,
            voice_script: decision.voice_script.as_deref(),
        };

        match self.provider.send(&message).await {
            Ok(receipt) => {
                result.success = true;
                result.provider_id = Some(receipt.provider_id);
                result.delivery_status =
                    Some(receipt.status.unwrap_or_else(|| DeliveryStatus::Queued.to_string()));
            }
            Err(e) => {
                warn!(
                    "Notification via {} to {} failed: {}",
                    channel, recipient.name, e
                );
                result.error = Some(e.to_string());
            }
        }
        result
    }

    /// One pair: send, then write its result right away.
    async fn attempt(
        &self,
        decision: &NotificationDecision,
        recipient: &NotificationRecipient,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> (NotificationResult, bool) {
        let result = self.send_one(decision, recipient, channel, now).await;
        let recorded = match self.store.insert_result(&result).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Result for {} via {} (provider id {:?}) not stored: {:#}",
                    result.recipient_name, result.channel, result.provider_id, e
                );
                false
            }
        };
        (result, recorded)
    }

    /// Sends the decision over every recipient × channel pair and stores one result per pair.
    /// Store failures are counted in the report and never stop the remaining sends.
    pub async fn dispatch(
        &self,
        decision: &NotificationDecision,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        if !decision.should_notify {
            return DispatchReport::default();
        }

        let pairs: Vec<(&NotificationRecipient, Channel)> = decision
            .recipients
            .iter()
            .flat_map(|r| decision.channels.iter().map(move |c| (r, *c)))
            .collect();

        let attempts: Vec<_> = pairs
            .into_iter()
            .map(|(recipient, channel)| self.attempt(decision, recipient, channel, now))
            .collect();
        let results: Vec<(NotificationResult, bool)> = stream::iter(attempts)
            .buffer_unordered(MAX_PARALLEL_SENDS)
            .collect()
            .await;

        let mut report = DispatchReport {
            attempted: results.len(),
            ..Default::default()
        };
        for (result, recorded) in &results {
            if !recorded {
                report.unrecorded += 1;
            }
            if result.success {
                report.succeeded += 1;
                if !report.channels.contains(&result.channel) {
                    report.channels.push(result.channel.clone());
                }
                if !report.recipients.contains(&result.recipient_name) {
                    report.recipients.push(result.recipient_name.clone());
                }
            } else {
                report.failed += 1;
            }
        }

        info!(
            "Decision {} dispatched: {} attempted, {} ok, {} failed",
            decision.decision_id, report.attempted, report.succeeded, report.failed
        );
        report
    }
}

/// Asynchronous status callback from a channel provider.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryCallback {
    pub provider_id: String,
    pub status: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Appends the callback to the matching result. Returns `false` for unknown provider ids.
pub async fn record_delivery_status(
    store: &dyn Store,
    callback: &DeliveryCallback,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(result) = store.find_result_by_provider_id(&callback.provider_id).await? else {
        warn!(
            "Delivery callback for unknown provider id {}",
            callback.provider_id
        );
        return Ok(false);
    };

    let status = callback.status.trim().to_ascii_lowercase();
    store
        .insert_delivery_event(&DeliveryEvent {
            event_id: Uuid::new_v4(),
            result_id: result.result_id,
            status: status.clone(),
            provider_code: callback.code.clone(),
            provider_message: callback.message.clone(),
            received_at: now,
        })
        .await?;

    if result.is_terminal() {
        info!(
            "Result {} already terminal ({:?}), keeping status",
            result.result_id, result.delivery_status
        );
    } else {
        store.set_delivery_status(result.result_id, &status).await?;
    }
    Ok(true)
}
