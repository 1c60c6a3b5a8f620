//! Binary delivery: `GET /binaries/{*path}`
//!
//! Redirects to a presigned URL or streams the object, depending on the
//! gateway chosen at startup.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::io::ReaderStream;

use dm_core::audit::{DeviceAction, DeviceConnection};
use dm_core::gateway::BinaryResponse;
use dm_storage::DEFAULT_CONTENT_TYPE;

use crate::error::AppError;
use crate::middleware::ClientSource;
use crate::state::AppState;

/// Build the binaries router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/binaries/{*path}", get(fetch_binary))
}

async fn fetch_binary(
    State(state): State<Arc<AppState>>,
    ClientSource(client): ClientSource,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let fetched = state.gateway.fetch(&path).await?;

    state
        .audit
        .record_best_effort(
            &DeviceConnection::anonymous(DeviceAction::BinaryGet)
                .with_source(client.source_ip, client.user_agent),
        )
        .await;

    match fetched {
        BinaryResponse::Redirect { location } => {
            let location = HeaderValue::from_str(&location)
                .map_err(|e| AppError::Internal(format!("presigned URL is not a header value: {e}")))?;
            Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
        }
        BinaryResponse::Stream(object) => {
            let content_type = object
                .meta
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
                .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

            let mut response =
                Body::from_stream(ReaderStream::new(object.body)).into_response();
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, content_type);
            if let Some(size) = object.meta.size {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
            }
            Ok(response)
        }
    }
}
