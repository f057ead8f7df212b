use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProviderError;
use crate::models::payload::{FeedPage, VehicleStatRecord};

/// Read side of the telematics provider API.
#[async_trait]
pub trait TelematicsSource: Send + Sync {
    /// One page of safety events at or after `start_time`, continuing from `after`.
    async fn safety_events(
        &self,
        api_token: &str,
        start_time: DateTime<Utc>,
        after: Option<&str>,
    ) -> Result<FeedPage<Value>, ProviderError>;

    async fn vehicle_stats(
        &self,
        api_token: &str,
        after: Option<&str>,
    ) -> Result<FeedPage<VehicleStatRecord>, ProviderError>;
}

/// True when a provider error message is about the pagination cursor.
pub fn is_cursor_error(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("cursor")
        && ["invalid", "expired", "not valid", "malformed", "parameters"]
            .iter()
            .any(|hint| m.contains(hint))
}

pub struct TelematicsClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelematicsClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        api_token: &str,
        query: &[(&str, String)],
    ) -> Result<FeedPage<T>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(api_token)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.is_client_error() && is_cursor_error(&body) {
                return Err(ProviderError::InvalidCursor(body));
            }
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<FeedPage<T>>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TelematicsSource for TelematicsClient {
    async fn safety_events(
        &self,
        api_token: &str,
        start_time: DateTime<Utc>,
        after: Option<&str>,
    ) -> Result<FeedPage<Value>, ProviderError> {
        let mut query = vec![(
            "startTime",
            start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )];
        if let Some(cursor) = after.filter(|c| !c.is_empty()) {
            query.push(("after", cursor.to_string()));
        }
        self.get_page("/fleet/safety-events/stream", api_token, &query)
            .await
    }

    async fn vehicle_stats(
        &self,
        api_token: &str,
        after: Option<&str>,
    ) -> Result<FeedPage<VehicleStatRecord>, ProviderError> {
        let mut query = vec![("types", "gps".to_string())];
        if let Some(cursor) = after.filter(|c| !c.is_empty()) {
            query.push(("after", cursor.to_string()));
        }
        self.get_page("/fleet/vehicles/stats", api_token, &query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_errors_are_recognised_by_message() {
        assert!(is_cursor_error("Invalid cursor provided"));
        assert!(is_cursor_error(
            r#"{"message":"Parameters differ from those used to generate the cursor"}"#
        ));
        assert!(is_cursor_error("cursor has expired"));
        assert!(!is_cursor_error("invalid startTime"));
        assert!(!is_cursor_error("rate limit exceeded"));
    }
}
