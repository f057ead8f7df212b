use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::notification::Channel;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage<'a> {
    pub channel: Channel,
    pub to: &'a str,
    pub body: &'a str,
    pub voice_script: Option<&'a str>,
}

/// Provider acknowledgement of an accepted message or call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderReceipt {
    pub provider_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Outbound SMS / WhatsApp / voice transport.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn send(&self, message: &OutboundMessage<'_>) -> Result<ProviderReceipt, ProviderError>;
}

/// Posts messages to an HTTP messaging gateway that fronts the carrier APIs.
pub struct HttpChannelGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChannelGateway {
    pub fn new(base_url: &str, token: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn endpoint(&self, channel: Channel) -> String {
        match channel {
            Channel::Sms => format!("{}/v1/sms", self.base_url),
            Channel::Whatsapp => format!("{}/v1/whatsapp", self.base_url),
            Channel::Voice => format!("{}/v1/calls", self.base_url),
        }
    }
}

#[async_trait]
impl ChannelProvider for HttpChannelGateway {
    async fn send(&self, message: &OutboundMessage<'_>) -> Result<ProviderReceipt, ProviderError> {
        let resp = self
            .client
            .post(self.endpoint(message.channel))
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json::<ProviderReceipt>().await?)
    }
}
