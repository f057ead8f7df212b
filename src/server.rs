//! HTTP surface: provider webhooks, operator actions on alerts and manual sweep triggers.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::alert::{sort_by_priority, ActivityEntry, Alert, HumanStatus};
use crate::models::incident::Incident;
use crate::models::payload::WebhookEnvelope;
use crate::notify::dispatcher::{record_delivery_status, DeliveryCallback};
use crate::processor::lifecycle;
use crate::processor::pipeline::Engine;
use crate::sweeps::scheduler::{run_sweep, SweepKind};
use crate::sweeps::{SweepOptions, SweepSummary};

const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub webhook_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:tenant_id/safety-events", post(safety_event_webhook))
        .route("/webhooks/delivery-status", post(delivery_status_webhook))
        .route("/ops/sweeps/:sweep", post(trigger_sweep))
        .route("/tenants/:tenant_id/alerts/attention", get(attention_queue))
        .route("/tenants/:tenant_id/incidents", get(list_incidents))
        .route("/alerts/:alert_id/ack", post(ack_alert))
        .route("/alerts/:alert_id/human-status", post(change_human_status))
        .route("/alerts/:alert_id/owner", post(assign_owner))
        .route("/alerts/:alert_id/activity", get(alert_activity))
        .with_state(state)
}

/// Serves until `cancel_token` fires, then drains in-flight requests.
pub async fn serve(bind: &str, state: AppState, cancel_token: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding HTTP listener on {}", bind))?;
    info!("HTTP server listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    "OK"
}

fn check_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    match headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn ignored(reason: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ignored", "reason": reason.to_string() })),
    )
}

/// POST /webhooks/:tenant_id/safety-events
///
/// Malformed payloads are acknowledged with 200 so the provider does not retry them.
/// Assessment and notification continue in the background after the 202.
async fn safety_event_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_secret(&state, &headers)?;
    let now = Utc::now();

    if state.engine.store.get_tenant(tenant_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("tenant {}", tenant_id)));
    }

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Webhook for tenant {} is not JSON: {}", tenant_id, e);
            return Ok(ignored(e));
        }
    };
    let envelope: WebhookEnvelope = match serde_json::from_value(raw.clone()) {
        Ok(env) => env,
        Err(e) => {
            warn!("Webhook for tenant {} has an unexpected shape: {}", tenant_id, e);
            return Ok(ignored(e));
        }
    };
    let signal = match envelope.into_signal(tenant_id, raw, now) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("Webhook for tenant {} rejected: {}", tenant_id, e);
            return Ok(ignored(e));
        }
    };

    let Some(alert) = state.engine.record_signal(&signal, now).await? else {
        return Ok((StatusCode::OK, Json(json!({ "status": "duplicate" }))));
    };

    let alert_id = alert.alert_id;
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.process_alert(alert, Utc::now()).await {
            error!("Processing alert {} failed: {:#}", alert_id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "alert_id": alert_id })),
    ))
}

/// POST /webhooks/delivery-status
async fn delivery_status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<DeliveryCallback>,
) -> Result<Json<Value>, ApiError> {
    check_secret(&state, &headers)?;
    let recorded =
        record_delivery_status(state.engine.store.as_ref(), &callback, Utc::now()).await?;
    Ok(Json(json!({ "recorded": recorded })))
}

/// POST /ops/sweeps/:sweep?tenant_id=&dry_run=
async fn trigger_sweep(
    State(state): State<AppState>,
    Path(sweep): Path<String>,
    Query(opts): Query<SweepOptions>,
) -> Result<Json<SweepSummary>, ApiError> {
    let kind = SweepKind::from_name(&sweep)
        .ok_or_else(|| ApiError::NotFound(format!("unknown sweep '{}'", sweep)))?;
    info!(
        "Manual '{}' sweep requested (tenant {:?}, dry_run {})",
        kind.name(),
        opts.tenant_id,
        opts.dry_run
    );
    Ok(Json(run_sweep(&state.engine, kind, opts).await?))
}

#[derive(Debug, Serialize)]
pub struct AttentionItem {
    #[serde(flatten)]
    pub alert: Alert,
    pub ack_overdue: bool,
    pub resolve_overdue: bool,
}

pub fn attention_items(mut alerts: Vec<Alert>, now: DateTime<Utc>) -> Vec<AttentionItem> {
    alerts.retain(Alert::needs_attention);
    sort_by_priority(&mut alerts);
    alerts
        .into_iter()
        .map(|alert| AttentionItem {
            ack_overdue: alert.is_ack_overdue(now),
            resolve_overdue: alert.is_resolve_overdue(now),
            alert,
        })
        .collect()
}

/// GET /tenants/:tenant_id/alerts/attention
async fn attention_queue(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<AttentionItem>>, ApiError> {
    let alerts = state.engine.store.list_open_alerts(tenant_id).await?;
    Ok(Json(attention_items(alerts, Utc::now())))
}

/// GET /tenants/:tenant_id/incidents
async fn list_incidents(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<Incident>>, ApiError> {
    Ok(Json(state.engine.store.list_incidents(tenant_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorRequest {
    pub actor_user_id: Option<Uuid>,
}

/// POST /alerts/:alert_id/ack
async fn ack_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<Alert>, ApiError> {
    let store = state.engine.store.as_ref();
    let actor = body.and_then(|Json(b)| b.actor_user_id);
    let mut alert = lifecycle::load(store, alert_id).await?;
    lifecycle::acknowledge(store, &mut alert, actor, Utc::now()).await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct HumanStatusRequest {
    pub status: HumanStatus,
    pub actor_user_id: Option<Uuid>,
    pub note: Option<String>,
}

/// POST /alerts/:alert_id/human-status
async fn change_human_status(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<HumanStatusRequest>,
) -> Result<Json<Alert>, ApiError> {
    let store = state.engine.store.as_ref();
    let mut alert = lifecycle::load(store, alert_id).await?;
    lifecycle::set_human_status(
        store,
        &mut alert,
        req.status,
        req.actor_user_id,
        req.note,
        Utc::now(),
    )
    .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct OwnerRequest {
    pub owner_user_id: Option<Uuid>,
    pub owner_contact_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
}

/// POST /alerts/:alert_id/owner
async fn assign_owner(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<OwnerRequest>,
) -> Result<Json<Alert>, ApiError> {
    if req.owner_user_id.is_none() && req.owner_contact_id.is_none() {
        return Err(ApiError::BadRequest(
            "owner_user_id or owner_contact_id is required".to_string(),
        ));
    }
    let store = state.engine.store.as_ref();
    let mut alert = lifecycle::load(store, alert_id).await?;
    lifecycle::assign_owner(
        store,
        &mut alert,
        req.owner_user_id,
        req.owner_contact_id,
        req.actor_user_id,
        Utc::now(),
    )
    .await?;
    Ok(Json(alert))
}

/// GET /alerts/:alert_id/activity
async fn alert_activity(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let store = state.engine.store.as_ref();
    lifecycle::load(store, alert_id).await?;
    Ok(Json(store.list_activity(alert_id).await?))
}
