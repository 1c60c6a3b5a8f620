//! Device connection audit trail.
//!
//! Every enrollment, config read and binary download produces one
//! [`DeviceConnection`] row. Rows are append-only: backends expose `append`
//! and read queries, nothing that updates or deletes.
//!
//! The trail fans each row out to every configured backend. Auditing is
//! best-effort from the caller's point of view (a failed audit never fails
//! the request), but the trail still reports [`AuditError::AllBackendsFailed`]
//! so callers can log it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuditError;
use crate::provisioning::UNKNOWN_KEY;

/// Email recorded for anonymous actions.
pub const ANONYMOUS_EMAIL: &str = "system@local";

/// What a client did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceAction {
    Enroll,
    ConfigGet,
    BinaryGet,
    Healthz,
    Unknown,
}

impl DeviceAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enroll => "ENROLL",
            Self::ConfigGet => "CONFIG_GET",
            Self::BinaryGet => "BINARY_GET",
            Self::Healthz => "HEALTHZ",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENROLL" => Ok(Self::Enroll),
            "CONFIG_GET" => Ok(Self::ConfigGet),
            "BINARY_GET" => Ok(Self::BinaryGet),
            "HEALTHZ" => Ok(Self::Healthz),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown device action: {other}")),
        }
    }
}

/// Whether the audited action succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Failed,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// One audited client interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub client_uuid: Uuid,
    pub action: DeviceAction,
    pub encryption_key_fingerprint: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: Outcome,
}

impl DeviceConnection {
    #[must_use]
    pub fn new(action: DeviceAction, email: impl Into<String>, client_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            email: email.into(),
            client_uuid,
            action,
            encryption_key_fingerprint: UNKNOWN_KEY.to_owned(),
            connected_at: now,
            disconnected_at: None,
            source_ip: None,
            user_agent: None,
            outcome: Outcome::Ok,
        }
    }

    /// A row for an unauthenticated action (`system@local`, nil UUID).
    #[must_use]
    pub fn anonymous(action: DeviceAction) -> Self {
        Self::new(action, ANONYMOUS_EMAIL, Uuid::nil())
    }

    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.encryption_key_fingerprint = fingerprint.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source_ip: Option<String>, user_agent: Option<String>) -> Self {
        self.source_ip = source_ip;
        self.user_agent = user_agent;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// A sink for audit rows.
#[async_trait::async_trait]
pub trait AuditBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Persist one row. Must not silently drop it.
    ///
    /// # Errors
    ///
    /// Returns an error if the row could not be persisted.
    async fn append(&self, entry: &DeviceConnection) -> Result<(), AuditError>;

    /// The most recent rows for a client, newest first.
    ///
    /// Returns `Ok(None)` for write-only backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn recent(
        &self,
        client_uuid: Uuid,
        limit: usize,
    ) -> Result<Option<Vec<DeviceConnection>>, AuditError> {
        let _ = (client_uuid, limit);
        Ok(None)
    }
}

/// Fans audit rows out to every configured backend.
#[derive(Clone, Default)]
pub struct AuditTrail {
    backends: Vec<Arc<dyn AuditBackend>>,
}

impl AuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn AuditBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    #[must_use]
    pub fn has_backends(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Append a row to every backend.
    ///
    /// `HEALTHZ` rows are dropped. With no backends configured this is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::AllBackendsFailed`] if every backend fails.
    pub async fn record(&self, entry: &DeviceConnection) -> Result<(), AuditError> {
        if entry.action == DeviceAction::Healthz || self.backends.is_empty() {
            return Ok(());
        }

        let mut any_success = false;
        for backend in &self.backends {
            match backend.append(entry).await {
                Ok(()) => any_success = true,
                Err(e) => {
                    warn!(
                        backend = backend.name(),
                        action = %entry.action,
                        error = %e,
                        "audit backend failed"
                    );
                }
            }
        }

        if any_success {
            Ok(())
        } else {
            Err(AuditError::AllBackendsFailed)
        }
    }

    /// Record a row, logging instead of returning a failure.
    pub async fn record_best_effort(&self, entry: &DeviceConnection) {
        if let Err(e) = self.record(entry).await {
            warn!(action = %entry.action, error = %e, "audit row not persisted");
        }
    }

    /// Recent rows for a client from the first queryable backend.
    ///
    /// # Errors
    ///
    /// Returns the first query error encountered.
    pub async fn recent(
        &self,
        client_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<DeviceConnection>, AuditError> {
        for backend in &self.backends {
            if let Some(rows) = backend.recent(client_uuid, limit).await? {
                return Ok(rows);
            }
        }
        Ok(Vec::new())
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("AuditTrail")
            .field("backends", &names)
            .finish()
    }
}

/// In-memory audit backend for tests and development.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditBackend {
    rows: Arc<RwLock<Vec<DeviceConnection>>>,
}

impl MemoryAuditBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, oldest first.
    pub async fn rows(&self) -> Vec<DeviceConnection> {
        self.rows.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditBackend for MemoryAuditBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, entry: &DeviceConnection) -> Result<(), AuditError> {
        self.rows.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent(
        &self,
        client_uuid: Uuid,
        limit: usize,
    ) -> Result<Option<Vec<DeviceConnection>>, AuditError> {
        let rows = self.rows.read().await;
        Ok(Some(
            rows.iter()
                .rev()
                .filter(|r| r.client_uuid == client_uuid)
                .take(limit)
                .cloned()
                .collect(),
        ))
    }
}
