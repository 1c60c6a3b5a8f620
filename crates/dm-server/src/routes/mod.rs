//! HTTP routes and router assembly.

pub mod admin;
pub mod binaries;
pub mod config;
pub mod enroll;
pub mod healthz;

use std::sync::Arc;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, IF_NONE_MATCH};
use axum::http::{HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::middleware::{admin_auth, preflight_no_content};
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(config::router())
        .merge(enroll::router(state.max_body_bytes))
        .merge(binaries::router())
        .merge(healthz::router());

    if state.admin_token_digest.is_some() {
        app = app.nest(
            "/admin",
            admin::router().route_layer(axum_mw::from_fn_with_state(
                Arc::clone(&state),
                admin_auth,
            )),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors(&state.allow_origins))
        .layer(axum_mw::from_fn(preflight_no_content))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, IF_NONE_MATCH])
        .expose_headers([header::ETAG]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
