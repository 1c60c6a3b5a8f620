//! HTTP error types for the device management server.
//!
//! Maps domain errors from `dm-core` into HTTP responses. Every error
//! produces `{"ok": false, "error": <code>, "message": <detail>}`; details
//! that could reveal filesystem layout or credentials are logged and replaced
//! with a generic message.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use dm_core::error::{EnrollError, GatewayError, ProvisioningError, TemplateError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    Validation(String),
    /// Missing or wrong admin token.
    Unauthorized,
    /// Requested resource not found.
    NotFound(String),
    /// The request conflicts with the current state.
    Conflict(String),
    /// Body exceeds the configured limit.
    PayloadTooLarge(usize),
    /// Configuration cannot be served.
    ConfigUnavailable(String),
    /// Storage could not be reached. `failed` maps sink names to reasons.
    StorageUnavailable {
        message: String,
        failed: Option<BTreeMap<&'static str, &'static str>>,
    },
    /// Anything else. The detail is logged, never returned.
    Internal(String),
}

impl AppError {
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
            failed: None,
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<BTreeMap<&'static str, &'static str>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut failed = None;
        let (status, error_type, message) = match self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid admin token".to_owned(),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                format!("body exceeds {limit} bytes"),
            ),
            Self::ConfigUnavailable(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_unavailable",
                msg,
            ),
            Self::StorageUnavailable {
                message,
                failed: sinks,
            } => {
                failed = sinks;
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    message,
                )
            }
            Self::Internal(detail) => {
                error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            ok: false,
            error: error_type,
            message,
            failed,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::UnknownDevice { .. } => Self::NotFound(err.to_string()),
            TemplateError::NotFound { .. } => Self::ConfigUnavailable(err.to_string()),
            TemplateError::Read { .. } | TemplateError::InvalidJson { .. } => {
                error!(error = %err, "configuration template unusable");
                Self::ConfigUnavailable("configuration unavailable".to_owned())
            }
        }
    }
}

impl From<ProvisioningError> for AppError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::NotFound { .. } | ProvisioningError::RecordNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            ProvisioningError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            ProvisioningError::Backend { .. } => {
                error!(error = %err, "provisioning backend failed");
                Self::storage("database unavailable")
            }
            ProvisioningError::Corrupt { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<EnrollError> for AppError {
    fn from(err: EnrollError) -> Self {
        match err {
            EnrollError::Validation(msg) => Self::Validation(msg),
            EnrollError::NoSinkEnabled => Self::ConfigUnavailable(err.to_string()),
            EnrollError::AllSinksFailed { failures } => Self::StorageUnavailable {
                message: "all enrollment storage sinks failed".to_owned(),
                failed: Some(failures),
            },
            EnrollError::Provisioning(inner) => inner.into(),
            EnrollError::Audit(inner) => Self::Internal(inner.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { .. } => Self::NotFound("not found".to_owned()),
            GatewayError::Unavailable { .. } => Self::storage(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_error_shape() {
        let (status, body) =
            body_json(EnrollError::Validation("missing required field: email".into()).into())
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "missing required field: email");
        assert!(body.get("failed").is_none());
    }

    #[tokio::test]
    async fn template_read_errors_hide_paths() {
        let err = TemplateError::Read {
            path: "/etc/dm/config/prod/config.json".into(),
            reason: "permission denied".into(),
        };
        let (status, body) = body_json(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "config_unavailable");
        assert!(!body["message"].as_str().unwrap().contains("/etc"));
    }

    #[tokio::test]
    async fn all_sinks_failed_lists_failures() {
        let failures = BTreeMap::from([("local", "write failed"), ("s3", "timed out")]);
        let (status, body) = body_json(EnrollError::AllSinksFailed { failures }.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["failed"]["local"], "write failed");
        assert_eq!(body["failed"]["s3"], "timed out");
    }

    #[tokio::test]
    async fn internal_detail_is_not_returned() {
        let (status, body) = body_json(AppError::Internal("pool exhausted at 10.0.0.3".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");
    }

    #[tokio::test]
    async fn provisioning_errors_map_to_status() {
        let (status, _) = body_json(
            ProvisioningError::NotFound {
                client_uuid: Uuid::nil(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = body_json(
            ProvisioningError::Backend {
                reason: "connection refused".into(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "database unavailable");
    }
}
