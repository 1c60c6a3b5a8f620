//! Operator routes: `/admin/devices/*`
//!
//! Mounted only when an admin token is configured; every request passes
//! through [`crate::middleware::admin_auth`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dm_core::audit::DeviceConnection;
use dm_core::provisioning::ProvisioningRecord;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/admin` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices/{client_uuid}", get(device_status))
        .route("/devices/{client_uuid}/accept", post(accept_device))
        .route("/devices/{client_uuid}/revoke", post(revoke_device))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatusResponse {
    pub record: ProvisioningRecord,
    pub recent: Vec<DeviceConnection>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub record: ProvisioningRecord,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn device_status(
    State(state): State<Arc<AppState>>,
    Path(client_uuid): Path<String>,
) -> Result<Json<DeviceStatusResponse>, AppError> {
    let client_uuid = parse_client(&client_uuid)?;
    let status = state
        .enrollment
        .status(client_uuid, state.history_limit)
        .await?;
    Ok(Json(DeviceStatusResponse {
        record: status.record,
        recent: status.recent,
    }))
}

async fn accept_device(
    State(state): State<Arc<AppState>>,
    Path(client_uuid): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, AppError> {
    let client_uuid = parse_client(&client_uuid)?;
    let request = parse_action(&body)?;
    let record = state.enrollment.accept(client_uuid, request.comment).await?;
    Ok(Json(ActionResponse { ok: true, record }))
}

async fn revoke_device(
    State(state): State<Arc<AppState>>,
    Path(client_uuid): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, AppError> {
    let client_uuid = parse_client(&client_uuid)?;
    let request = parse_action(&body)?;
    let record = state.enrollment.revoke(client_uuid, request.comment).await?;
    Ok(Json(ActionResponse { ok: true, record }))
}

fn parse_client(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation("client_uuid: not a valid UUID".to_owned()))
}

/// An empty body means no comment.
fn parse_action(body: &[u8]) -> Result<ActionRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ActionRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|_| AppError::Validation("body must be a JSON object".to_owned()))
}
