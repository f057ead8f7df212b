use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// A text column held a value outside the closed set of its enum.
#[derive(Debug, Error)]
#[error("invalid {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Failures talking to the telematics API or a channel gateway.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider rejected pagination cursor: {0}")]
    InvalidCursor(String),
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Network level failures are retried by re-queueing the work, never inline.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("invalid ai_status transition {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("all {attempts} notification attempts failed")]
    AllFailed { attempts: usize },
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("missing or invalid webhook secret")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(e) => match e.downcast_ref::<LifecycleError>() {
                Some(LifecycleError::NotFound(_)) => StatusCode::NOT_FOUND,
                Some(LifecycleError::InvalidTransition { .. }) => StatusCode::CONFLICT,
                None => {
                    error!("Request failed: {:#}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
