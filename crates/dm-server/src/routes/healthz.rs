//! Health route: `GET /healthz`
//!
//! Answers with an RFC 7807 problem document either way; `200` when every
//! enabled dependency is reachable, `412` otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tracing::warn;

use dm_core::health::{CheckResult, HealthReport};

use crate::state::AppState;

const PROBLEM_TYPE: &str = "https://example.com/problems/dependency-check";

/// Concurrent health checks allowed; each one fans out to every dependency.
const MAX_CONCURRENT_CHECKS: usize = 8;

/// Build the health router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(tower::limit::ConcurrencyLimitLayer::new(MAX_CONCURRENT_CHECKS))
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    #[serde(rename = "type")]
    pub problem_type: &'static str,
    pub title: &'static str,
    pub status: u16,
    pub detail: String,
    pub checks: BTreeMap<&'static str, CheckResult>,
    pub errors: Vec<String>,
}

impl HealthBody {
    #[must_use]
    pub fn from_report(report: HealthReport) -> (StatusCode, Self) {
        let errors = report.errors();
        let (status, title, detail) = if errors.is_empty() {
            (
                StatusCode::OK,
                "OK",
                "all dependency checks passed".to_owned(),
            )
        } else {
            (
                StatusCode::PRECONDITION_FAILED,
                "Dependency check failed",
                errors.join("; "),
            )
        };
        (
            status,
            Self {
                problem_type: PROBLEM_TYPE,
                title,
                status: status.as_u16(),
                detail,
                checks: report.checks,
                errors,
            },
        )
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health.check().await;
    let (status, body) = HealthBody::from_report(report);
    if status != StatusCode::OK {
        warn!(errors = ?body.errors, "dependency check failed");
    }

    let json = match serde_json::to_vec(&body) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize health report");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        status,
        [(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        )],
        json,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_report_is_412_with_errors() {
        let mut report = HealthReport::default();
        report.checks.insert("local_storage", CheckResult::ok());
        report.checks.insert("s3", CheckResult::error("storage unreachable"));
        report.checks.insert("db", CheckResult::skipped());

        let (status, body) = HealthBody::from_report(report);
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body.status, 412);
        assert_eq!(body.title, "Dependency check failed");
        assert_eq!(body.errors, vec!["s3: storage unreachable".to_owned()]);
        assert_eq!(body.detail, "s3: storage unreachable");
    }

    #[test]
    fn skipped_checks_stay_healthy() {
        let mut report = HealthReport::default();
        report.checks.insert("db", CheckResult::skipped());

        let (status, body) = HealthBody::from_report(report);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.title, "OK");
        assert!(body.errors.is_empty());
    }
}
