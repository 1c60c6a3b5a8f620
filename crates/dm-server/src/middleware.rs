//! Request middleware and extractors.
//!
//! - [`admin_auth`] guards the `/admin` routes with the static bearer token.
//! - [`preflight_no_content`] answers CORS preflights with `204`.
//! - [`ClientSource`] pulls the caller's address and user agent for audit
//!   rows.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use dm_core::enrollment::ClientInfo;

use crate::error::AppError;
use crate::state::{AppState, digest};

/// Reject requests without `Authorization: Bearer <admin token>`.
///
/// Both tokens are hashed before a constant-time comparison, so neither
/// their content nor their length leaks through timing.
pub async fn admin_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token_digest else {
        return AppError::NotFound("not found".to_owned()).into_response();
    };

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let authorized = presented.is_some_and(|token| {
        bool::from(digest(token).as_slice().ct_eq(expected.as_slice()))
    });
    if !authorized {
        warn!(path = %req.uri().path(), "admin request rejected");
        return AppError::Unauthorized.into_response();
    }

    next.run(req).await
}

/// The CORS layer answers every `OPTIONS` request itself with an empty
/// `200`; clients expect `204 No Content`.
pub async fn preflight_no_content(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut resp = next.run(req).await;
    if preflight && resp.status() == StatusCode::OK {
        *resp.status_mut() = StatusCode::NO_CONTENT;
    }
    resp
}

/// Caller address and user agent.
///
/// The address is the first `X-Forwarded-For` entry when the header is
/// trusted and present, else the peer address from the listener. Any client
/// can set the header, so trust it only behind a proxy that rewrites it
/// (`DM_TRUST_FORWARDED_FOR`). Never rejects.
#[derive(Debug, Clone, Default)]
pub struct ClientSource(pub ClientInfo);

impl ClientSource {
    /// Build from request headers and the optional peer address.
    #[must_use]
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_forwarded_for: bool,
    ) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .filter(|_| trust_forwarded_for)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Self(ClientInfo {
            source_ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
            user_agent,
        })
    }
}

impl FromRequestParts<Arc<AppState>> for ClientSource {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_headers(
            &parts.headers,
            peer,
            state.trust_forwarded_for,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("matisse/1.4"));
        let peer = Some(SocketAddr::from(([10, 0, 0, 9], 4711)));

        let ClientSource(info) = ClientSource::from_headers(&headers, peer, true);
        assert_eq!(info.source_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("matisse/1.4"));
    }

    #[test]
    fn untrusted_forwarded_for_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let peer = Some(SocketAddr::from(([10, 0, 0, 9], 4711)));

        let ClientSource(info) = ClientSource::from_headers(&headers, peer, false);
        assert_eq!(info.source_ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn peer_address_is_the_fallback() {
        let peer = Some(SocketAddr::from(([192, 0, 2, 1], 5000)));
        let ClientSource(info) = ClientSource::from_headers(&HeaderMap::new(), peer, true);
        assert_eq!(info.source_ip.as_deref(), Some("192.0.2.1"));
        assert!(info.user_agent.is_none());

        let ClientSource(info) = ClientSource::from_headers(&HeaderMap::new(), None, true);
        assert!(info.source_ip.is_none());
    }
}
