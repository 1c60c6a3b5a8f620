//! Enrollment route: `POST|PUT /enroll`
//!
//! `OPTIONS /enroll` never reaches this module; the CORS layer answers it.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tracing::debug;

use dm_core::enrollment::EnrollmentRequest;
use dm_core::provisioning::ProvisioningStatus;

use crate::error::AppError;
use crate::middleware::ClientSource;
use crate::state::AppState;

/// Build the enrollment router. Bodies above `max_body_bytes` get 413.
pub fn router(max_body_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/enroll", post(enroll).put(enroll))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub ok: bool,
    pub status: ProvisioningStatus,
    pub stored: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failed: BTreeMap<&'static str, &'static str>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn enroll(
    State(state): State<Arc<AppState>>,
    ClientSource(client): ClientSource,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<EnrollResponse>), AppError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(state.max_body_bytes)
        } else {
            debug!(error = %rejection, "failed to read enrollment body");
            AppError::Validation("failed to read request body".to_owned())
        }
    })?;

    let request = EnrollmentRequest::parse(&body)?;
    let outcome = state.enrollment.enroll(request, &client).await?;

    Ok((
        StatusCode::CREATED,
        Json(EnrollResponse {
            ok: true,
            status: outcome.record.status,
            stored: outcome.stored,
            failed: outcome.failed,
        }),
    ))
}
