use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub name: String,
    pub provider_api_token: Option<String>,
    pub settings: Json<Value>,
    pub active: bool,
}

/// Provider pagination state. The cursor is only valid together with the
/// `start_time` that produced it, so both are stored and cleared together.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StreamCursor {
    pub tenant_id: Uuid,
    pub cursor: String,
    pub start_time: DateTime<Utc>,
}
