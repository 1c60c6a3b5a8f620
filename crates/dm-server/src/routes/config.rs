//! Configuration delivery: `/config/config.json`, `/config/{device}/config.json`
//!
//! Responses carry the config version as a strong `ETag`; a matching
//! `If-None-Match` gets `304 Not Modified` without a body.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tracing::debug;

use dm_core::audit::{DeviceAction, DeviceConnection};
use dm_core::enrollment::ClientInfo;

use crate::error::AppError;
use crate::middleware::ClientSource;
use crate::state::AppState;

/// Build the config router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/config/config.json", get(generic_config))
        .route("/config/{device}/config.json", get(device_config))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigQuery {
    pub profile: Option<String>,
    pub device: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn generic_config(
    State(state): State<Arc<AppState>>,
    ClientSource(client): ClientSource,
    headers: HeaderMap,
    Query(query): Query<ConfigQuery>,
) -> Result<Response, AppError> {
    serve(
        &state,
        client,
        &headers,
        query.profile.as_deref(),
        query.device.as_deref(),
    )
    .await
}

async fn device_config(
    State(state): State<Arc<AppState>>,
    ClientSource(client): ClientSource,
    headers: HeaderMap,
    Path(device): Path<String>,
    Query(query): Query<ConfigQuery>,
) -> Result<Response, AppError> {
    serve(&state, client, &headers, query.profile.as_deref(), Some(device.as_str())).await
}

async fn serve(
    state: &AppState,
    client: ClientInfo,
    headers: &HeaderMap,
    profile: Option<&str>,
    device: Option<&str>,
) -> Result<Response, AppError> {
    let resolved = state.resolver.resolve(profile, device).await?;
    let etag = format!("\"{}\"", resolved.version);

    state
        .audit
        .record_best_effort(
            &DeviceConnection::anonymous(DeviceAction::ConfigGet)
                .with_source(client.source_ip, client.user_agent),
        )
        .await;

    let etag_header =
        HeaderValue::from_str(&etag).map_err(|e| AppError::Internal(e.to_string()))?;
    let not_modified = headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| etag_matches(v, &etag));

    if not_modified {
        debug!(profile = %resolved.profile, version = %resolved.version, "config not modified");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (ETAG, etag_header),
                (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            ],
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (ETAG, etag_header),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        resolved.body,
    )
        .into_response())
}

/// `If-None-Match` semantics: `*` or any listed tag, weak or strong.
fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

#[cfg(test)]
mod tests {
    use super::etag_matches;

    #[test]
    fn if_none_match_forms() {
        let tag = "\"abc\"";
        assert!(etag_matches("\"abc\"", tag));
        assert!(etag_matches("W/\"abc\"", tag));
        assert!(etag_matches("\"old\", \"abc\"", tag));
        assert!(etag_matches("*", tag));
        assert!(!etag_matches("\"abd\"", tag));
        assert!(!etag_matches("abc", tag));
    }
}
