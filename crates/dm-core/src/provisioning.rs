//! Provisioning records and their state machine.
//!
//! A record tracks one enrollment of one client. At most one record per
//! client is *active* (`PENDING` or `ENROLLED`); terminal records
//! (`REVOKED`, `FAILED`) are kept as history and never deleted.
//!
//! ```text
//!            accept             revoke
//! PENDING ────────────► ENROLLED ──────► REVOKED
//!    │  │                                  ▲
//!    │  └──────────── revoke ──────────────┘
//!    └─ all sinks failed ─► FAILED
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ProvisioningError;

/// Lifecycle state of a provisioning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProvisioningStatus {
    Pending,
    Enrolled,
    Revoked,
    Failed,
}

impl ProvisioningStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Enrolled => "ENROLLED",
            Self::Revoked => "REVOKED",
            Self::Failed => "FAILED",
        }
    }

    /// Active records count toward the one-per-client constraint.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Enrolled)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Enrolled | Self::Failed | Self::Revoked)
                | (Self::Enrolled, Self::Revoked)
        )
    }
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvisioningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ENROLLED" => Ok(Self::Enrolled),
            "REVOKED" => Ok(Self::Revoked),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown provisioning status: {other}")),
        }
    }
}

/// The literal stored when a client supplies no key material.
pub const UNKNOWN_KEY: &str = "unknown";

/// One enrollment of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Lowercased.
    pub email: String,
    pub device_name: Option<String>,
    pub client_uuid: Uuid,
    pub status: ProvisioningStatus,
    /// A fingerprint or [`UNKNOWN_KEY`]; never raw key material.
    pub encryption_key: String,
    pub comments: Option<String>,
}

/// Data carried by an enrollment submission into the store.
#[derive(Debug, Clone)]
pub struct Registration {
    pub client_uuid: Uuid,
    pub email: String,
    pub device_name: Option<String>,
    pub encryption_key: String,
    pub comments: Option<String>,
}

/// Outcome of [`ProvisioningStore::register`].
#[derive(Debug, Clone)]
pub struct Registered {
    pub record: ProvisioningRecord,
    /// `true` if a new `PENDING` record was created, `false` if an active
    /// record was refreshed in place.
    pub created: bool,
}

/// Persistence for provisioning records.
///
/// Implementations enforce the active-record uniqueness constraint
/// atomically: concurrent `register` calls for the same client end with
/// exactly one active record.
#[async_trait::async_trait]
pub trait ProvisioningStore: Send + Sync + 'static {
    /// Short backend name for logs and health reports.
    fn name(&self) -> &'static str;

    /// Create a `PENDING` record for the client, or return the active one
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] if the store fails.
    async fn register(&self, registration: Registration) -> Result<Registered, ProvisioningError>;

    /// Apply a re-enrollment to the active record `id`.
    ///
    /// Updates `updated_at`, `email`, `device_name`, `comments` and
    /// `encryption_key` (unless the new key is [`UNKNOWN_KEY`]); the status
    /// is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::RecordNotFound`] if `id` is not an active
    ///   record.
    /// - [`ProvisioningError::Backend`] if the store fails.
    async fn refresh(
        &self,
        id: Uuid,
        registration: &Registration,
    ) -> Result<ProvisioningRecord, ProvisioningError>;

    /// The active record for a client, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] if the store fails.
    async fn find_active(
        &self,
        client_uuid: Uuid,
    ) -> Result<Option<ProvisioningRecord>, ProvisioningError>;

    /// Move a record to `to`, optionally replacing its comment.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::RecordNotFound`] if no record has this `id`.
    /// - [`ProvisioningError::InvalidTransition`] if the state machine
    ///   forbids the change.
    async fn transition(
        &self,
        id: Uuid,
        to: ProvisioningStatus,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, ProvisioningError>;

    /// Every record for a client, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] if the store fails.
    async fn history(
        &self,
        client_uuid: Uuid,
    ) -> Result<Vec<ProvisioningRecord>, ProvisioningError>;

    /// Cheap liveness check.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] if the store is unreachable.
    async fn ping(&self) -> Result<(), ProvisioningError>;
}

/// In-memory provisioning store for development and tests.
///
/// A single write lock serializes registrations, which is what makes the
/// uniqueness check and the insert atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvisioningStore {
    records: Arc<RwLock<HashMap<Uuid, ProvisioningRecord>>>,
}

impl MemoryProvisioningStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProvisioningStore for MemoryProvisioningStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn register(&self, registration: Registration) -> Result<Registered, ProvisioningError> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        if let Some(active) = records
            .values()
            .find(|r| r.client_uuid == registration.client_uuid && r.status.is_active())
        {
            return Ok(Registered {
                record: active.clone(),
                created: false,
            });
        }

        let record = ProvisioningRecord {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            email: registration.email,
            device_name: registration.device_name,
            client_uuid: registration.client_uuid,
            status: ProvisioningStatus::Pending,
            encryption_key: registration.encryption_key,
            comments: registration.comments,
        };
        records.insert(record.id, record.clone());
        Ok(Registered {
            record,
            created: true,
        })
    }

    async fn refresh(
        &self,
        id: Uuid,
        registration: &Registration,
    ) -> Result<ProvisioningRecord, ProvisioningError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .filter(|r| r.status.is_active())
            .ok_or(ProvisioningError::RecordNotFound { id })?;
        record.updated_at = Utc::now().max(record.updated_at);
        record.email.clone_from(&registration.email);
        record.device_name.clone_from(&registration.device_name);
        record.comments.clone_from(&registration.comments);
        if registration.encryption_key != UNKNOWN_KEY {
            record.encryption_key.clone_from(&registration.encryption_key);
        }
        Ok(record.clone())
    }

    async fn find_active(
        &self,
        client_uuid: Uuid,
    ) -> Result<Option<ProvisioningRecord>, ProvisioningError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.client_uuid == client_uuid && r.status.is_active())
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        to: ProvisioningStatus,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, ProvisioningError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(ProvisioningError::RecordNotFound { id })?;
        if !record.status.can_transition_to(to) {
            return Err(ProvisioningError::InvalidTransition {
                from: record.status,
                to,
            });
        }
        record.status = to;
        record.updated_at = Utc::now().max(record.updated_at);
        if comment.is_some() {
            record.comments = comment;
        }
        Ok(record.clone())
    }

    async fn history(
        &self,
        client_uuid: Uuid,
    ) -> Result<Vec<ProvisioningRecord>, ProvisioningError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.client_uuid == client_uuid)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn ping(&self) -> Result<(), ProvisioningError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registration(client_uuid: Uuid, email: &str) -> Registration {
        Registration {
            client_uuid,
            email: email.to_owned(),
            device_name: Some("matisse".to_owned()),
            encryption_key: UNKNOWN_KEY.to_owned(),
            comments: None,
        }
    }

    #[test]
    fn state_machine_table() {
        use ProvisioningStatus::{Enrolled, Failed, Pending, Revoked};
        let allowed = [
            (Pending, Enrolled),
            (Pending, Failed),
            (Pending, Revoked),
            (Enrolled, Revoked),
        ];
        for from in [Pending, Enrolled, Revoked, Failed] {
            for to in [Pending, Enrolled, Revoked, Failed] {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ProvisioningStatus::Enrolled).unwrap(),
            "\"ENROLLED\""
        );
        assert_eq!("FAILED".parse::<ProvisioningStatus>().unwrap(), ProvisioningStatus::Failed);
        assert!("failed".parse::<ProvisioningStatus>().is_err());
    }

    #[tokio::test]
    async fn register_returns_active_record_untouched() {
        let store = MemoryProvisioningStore::new();
        let client = Uuid::new_v4();

        let first = store.register(registration(client, "a@x.io")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.record.status, ProvisioningStatus::Pending);

        let second = store.register(registration(client, "b@x.io")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record, first.record);
    }

    #[tokio::test]
    async fn refresh_updates_active_record_in_place() {
        let store = MemoryProvisioningStore::new();
        let client = Uuid::new_v4();
        let first = store.register(registration(client, "a@x.io")).await.unwrap();

        let mut again = registration(client, "b@x.io");
        again.encryption_key = "sha256:abc".to_owned();
        let refreshed = store.refresh(first.record.id, &again).await.unwrap();
        assert_eq!(refreshed.id, first.record.id);
        assert_eq!(refreshed.email, "b@x.io");
        assert_eq!(refreshed.encryption_key, "sha256:abc");
        assert_eq!(refreshed.status, ProvisioningStatus::Pending);
        assert!(refreshed.updated_at >= first.record.updated_at);

        let unknown_key = store
            .refresh(first.record.id, &registration(client, "b@x.io"))
            .await
            .unwrap();
        assert_eq!(unknown_key.encryption_key, "sha256:abc");

        store
            .transition(first.record.id, ProvisioningStatus::Revoked, None)
            .await
            .unwrap();
        let err = store
            .refresh(first.record.id, &registration(client, "c@x.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_one_active_record() {
        let store = MemoryProvisioningStore::new();
        let client = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .register(registration(client, &format!("u{i}@x.io")))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut created = 0;
        for h in handles {
            if h.await.unwrap().created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.history(client).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_record_allows_new_enrollment() {
        let store = MemoryProvisioningStore::new();
        let client = Uuid::new_v4();

        let first = store.register(registration(client, "a@x.io")).await.unwrap();
        store
            .transition(first.record.id, ProvisioningStatus::Revoked, None)
            .await
            .unwrap();
        assert!(store.find_active(client).await.unwrap().is_none());

        let second = store.register(registration(client, "a@x.io")).await.unwrap();
        assert!(second.created);
        assert_ne!(second.record.id, first.record.id);
        assert_eq!(store.history(client).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn forbidden_transition_is_rejected() {
        let store = MemoryProvisioningStore::new();
        let client = Uuid::new_v4();
        let reg = store.register(registration(client, "a@x.io")).await.unwrap();
        store
            .transition(reg.record.id, ProvisioningStatus::Failed, None)
            .await
            .unwrap();

        let err = store
            .transition(reg.record.id, ProvisioningStatus::Enrolled, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::InvalidTransition {
                from: ProvisioningStatus::Failed,
                to: ProvisioningStatus::Enrolled
            }
        ));

        let missing = store
            .transition(Uuid::new_v4(), ProvisioningStatus::Revoked, None)
            .await
            .unwrap_err();
        assert!(matches!(missing, ProvisioningError::RecordNotFound { .. }));
    }
}
