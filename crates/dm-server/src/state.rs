//! Shared application state.
//!
//! A single [`AppState`] is built at startup and shared across all Axum
//! handlers via `Arc`. Every component is either immutable or internally
//! synchronized, so handlers never take a lock on the state itself.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use dm_core::audit::AuditTrail;
use dm_core::enrollment::{DEFAULT_HISTORY_LIMIT, EnrollmentService};
use dm_core::gateway::BinaryGateway;
use dm_core::health::HealthReporter;
use dm_core::resolver::ConfigResolver;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Template lookup and substitution.
    pub resolver: ConfigResolver,
    /// Enrollment workflow and operator actions.
    pub enrollment: EnrollmentService,
    /// Binary delivery in the configured mode.
    pub gateway: Arc<dyn BinaryGateway>,
    pub health: HealthReporter,
    /// Audit rows for config, binary and health traffic.
    pub audit: AuditTrail,
    /// SHA-256 of the admin token. `None` disables the admin routes.
    pub admin_token_digest: Option<[u8; 32]>,
    /// Upper bound for enrollment bodies.
    pub max_body_bytes: usize,
    /// CORS origins; `*` allows any.
    pub allow_origins: Vec<String>,
    /// Whether `X-Forwarded-For` names the caller. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
    /// Audit rows returned by the device status route.
    pub history_limit: usize,
}

impl AppState {
    #[must_use]
    pub fn new(
        resolver: ConfigResolver,
        enrollment: EnrollmentService,
        gateway: Arc<dyn BinaryGateway>,
        health: HealthReporter,
    ) -> Self {
        let audit = enrollment.audit().clone();
        Self {
            resolver,
            enrollment,
            gateway,
            health,
            audit,
            admin_token_digest: None,
            max_body_bytes: 10 * 1024 * 1024,
            allow_origins: vec!["*".to_owned()],
            trust_forwarded_for: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Enable the admin routes behind `token`.
    #[must_use]
    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token_digest = Some(digest(token));
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    #[must_use]
    pub fn with_allow_origins(mut self, origins: Vec<String>) -> Self {
        self.allow_origins = origins;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

/// SHA-256 of a token. Comparing digests keeps the comparison length-fixed.
#[must_use]
pub fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("resolver", &self.resolver)
            .field("enrollment", &self.enrollment)
            .field("gateway", &self.gateway.mode())
            .field("health", &self.health)
            .field("admin_routes", &self.admin_token_digest.is_some())
            .field("max_body_bytes", &self.max_body_bytes)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish_non_exhaustive()
    }
}
