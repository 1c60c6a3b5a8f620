//! PostgreSQL provisioning store and audit backend.
//!
//! Two tables, created at connect time:
//!
//! - `provisioning`: one row per enrollment. A partial unique index on
//!   `client_uuid` over active statuses makes "at most one active record per
//!   client" a database invariant, and `register` relies on it through
//!   `INSERT ... ON CONFLICT ... DO UPDATE`.
//! - `device_connections`: the append-only audit trail.
//!
//! Feature-gated behind `postgres-backend`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::audit::{AuditBackend, DeviceConnection};
use crate::error::{AuditError, ProvisioningError};
use crate::provisioning::{
    ProvisioningRecord, ProvisioningStatus, ProvisioningStore, Registered, Registration,
};

const MIGRATIONS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS provisioning (
        id             UUID PRIMARY KEY,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        email          TEXT NOT NULL,
        device_name    TEXT,
        client_uuid    UUID NOT NULL,
        status         TEXT NOT NULL,
        encryption_key TEXT NOT NULL DEFAULT 'unknown',
        comments       TEXT
    )",
    r"CREATE UNIQUE INDEX IF NOT EXISTS provisioning_one_active_per_client
        ON provisioning (client_uuid)
        WHERE status IN ('PENDING', 'ENROLLED')",
    r"CREATE INDEX IF NOT EXISTS provisioning_client_created
        ON provisioning (client_uuid, created_at DESC)",
    r"CREATE TABLE IF NOT EXISTS device_connections (
        id                         UUID PRIMARY KEY,
        created_at                 TIMESTAMPTZ NOT NULL DEFAULT now(),
        email                      TEXT NOT NULL,
        client_uuid                UUID NOT NULL,
        action                     TEXT NOT NULL,
        encryption_key_fingerprint TEXT NOT NULL,
        connected_at               TIMESTAMPTZ NOT NULL,
        disconnected_at            TIMESTAMPTZ,
        source_ip                  TEXT,
        user_agent                 TEXT,
        outcome                    TEXT NOT NULL DEFAULT 'ok'
    )",
    r"CREATE INDEX IF NOT EXISTS device_connections_client_created
        ON device_connections (client_uuid, created_at DESC)",
];

#[derive(Debug, sqlx::FromRow)]
struct ProvisioningRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    email: String,
    device_name: Option<String>,
    client_uuid: Uuid,
    status: String,
    encryption_key: String,
    comments: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RegisteredRow {
    #[sqlx(flatten)]
    row: ProvisioningRow,
    inserted: bool,
}

impl TryFrom<ProvisioningRow> for ProvisioningRecord {
    type Error = ProvisioningError;

    fn try_from(row: ProvisioningRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|reason| ProvisioningError::Corrupt { reason })?;
        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            email: row.email,
            device_name: row.device_name,
            client_uuid: row.client_uuid,
            status,
            encryption_key: row.encryption_key,
            comments: row.comments,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConnectionRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    email: String,
    client_uuid: Uuid,
    action: String,
    encryption_key_fingerprint: String,
    connected_at: DateTime<Utc>,
    disconnected_at: Option<DateTime<Utc>>,
    source_ip: Option<String>,
    user_agent: Option<String>,
    outcome: String,
}

impl TryFrom<ConnectionRow> for DeviceConnection {
    type Error = AuditError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| AuditError::BackendFailure {
            name: "postgres".to_owned(),
            reason: format!("corrupt audit row {id}: {reason}"),
        };
        Ok(Self {
            id,
            created_at: row.created_at,
            email: row.email,
            client_uuid: row.client_uuid,
            action: row.action.parse().map_err(corrupt)?,
            encryption_key_fingerprint: row.encryption_key_fingerprint,
            connected_at: row.connected_at,
            disconnected_at: row.disconnected_at,
            source_ip: row.source_ip,
            user_agent: row.user_agent,
            outcome: row.outcome.parse().map_err(corrupt)?,
        })
    }
}

impl From<sqlx::Error> for ProvisioningError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend {
            reason: e.to_string(),
        }
    }
}

fn audit_failure(e: &sqlx::Error) -> AuditError {
    AuditError::BackendFailure {
        name: "postgres".to_owned(),
        reason: e.to_string(),
    }
}

/// Provisioning store and audit backend on one PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PgStore {
    /// Connect and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] if the connection or a
    /// migration fails. The reason never contains the connection URL.
    pub async fn connect(database_url: &str) -> Result<Self, ProvisioningError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| ProvisioningError::Backend {
                reason: format!("connect failed: {e}"),
            })?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::Backend`] naming the failed statement.
    pub async fn migrate(&self) -> Result<(), ProvisioningError> {
        for (i, statement) in MIGRATIONS.iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| ProvisioningError::Backend {
                    reason: format!("migration {i} failed: {e}"),
                })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProvisioningStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn register(&self, registration: Registration) -> Result<Registered, ProvisioningError> {
        let row = sqlx::query_as::<_, RegisteredRow>(
            r"INSERT INTO provisioning
                (id, email, device_name, client_uuid, status, encryption_key, comments)
              VALUES ($1, $2, $3, $4, 'PENDING', $5, $6)
              ON CONFLICT (client_uuid) WHERE status IN ('PENDING', 'ENROLLED')
              DO UPDATE SET status = provisioning.status
              RETURNING *, (xmax = 0) AS inserted",
        )
        .bind(Uuid::new_v4())
        .bind(&registration.email)
        .bind(&registration.device_name)
        .bind(registration.client_uuid)
        .bind(&registration.encryption_key)
        .bind(&registration.comments)
        .fetch_one(&self.pool)
        .await?;

        Ok(Registered {
            created: row.inserted,
            record: row.row.try_into()?,
        })
    }

    async fn refresh(
        &self,
        id: Uuid,
        registration: &Registration,
    ) -> Result<ProvisioningRecord, ProvisioningError> {
        sqlx::query_as::<_, ProvisioningRow>(
            r"UPDATE provisioning
              SET updated_at     = GREATEST(now(), updated_at),
                  email          = $2,
                  device_name    = $3,
                  comments       = $4,
                  encryption_key = CASE WHEN $5 = 'unknown' THEN encryption_key ELSE $5 END
              WHERE id = $1 AND status IN ('PENDING', 'ENROLLED')
              RETURNING *",
        )
        .bind(id)
        .bind(&registration.email)
        .bind(&registration.device_name)
        .bind(&registration.comments)
        .bind(&registration.encryption_key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProvisioningError::RecordNotFound { id })?
        .try_into()
    }

    async fn find_active(
        &self,
        client_uuid: Uuid,
    ) -> Result<Option<ProvisioningRecord>, ProvisioningError> {
        sqlx::query_as::<_, ProvisioningRow>(
            r"SELECT * FROM provisioning
              WHERE client_uuid = $1 AND status IN ('PENDING', 'ENROLLED')",
        )
        .bind(client_uuid)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        to: ProvisioningStatus,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, ProvisioningError> {
        let allowed_from: Vec<&str> = [
            ProvisioningStatus::Pending,
            ProvisioningStatus::Enrolled,
            ProvisioningStatus::Revoked,
            ProvisioningStatus::Failed,
        ]
        .into_iter()
        .filter(|from| from.can_transition_to(to))
        .map(ProvisioningStatus::as_str)
        .collect();

        let updated = sqlx::query_as::<_, ProvisioningRow>(
            r"UPDATE provisioning
              SET status = $2,
                  updated_at = GREATEST(now(), updated_at),
                  comments = COALESCE($3, comments)
              WHERE id = $1 AND status = ANY($4)
              RETURNING *",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(comment)
        .bind(&allowed_from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return row.try_into();
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM provisioning WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            None => Err(ProvisioningError::RecordNotFound { id }),
            Some((status,)) => Err(ProvisioningError::InvalidTransition {
                from: status
                    .parse()
                    .map_err(|reason| ProvisioningError::Corrupt { reason })?,
                to,
            }),
        }
    }

    async fn history(
        &self,
        client_uuid: Uuid,
    ) -> Result<Vec<ProvisioningRecord>, ProvisioningError> {
        sqlx::query_as::<_, ProvisioningRow>(
            "SELECT * FROM provisioning WHERE client_uuid = $1 ORDER BY created_at DESC",
        )
        .bind(client_uuid)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn ping(&self) -> Result<(), ProvisioningError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditBackend for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn append(&self, entry: &DeviceConnection) -> Result<(), AuditError> {
        sqlx::query(
            r"INSERT INTO device_connections
                (id, created_at, email, client_uuid, action, encryption_key_fingerprint,
                 connected_at, disconnected_at, source_ip, user_agent, outcome)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.id)
        .bind(entry.created_at)
        .bind(&entry.email)
        .bind(entry.client_uuid)
        .bind(entry.action.as_str())
        .bind(&entry.encryption_key_fingerprint)
        .bind(entry.connected_at)
        .bind(entry.disconnected_at)
        .bind(&entry.source_ip)
        .bind(&entry.user_agent)
        .bind(entry.outcome.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| audit_failure(&e))?;
        Ok(())
    }

    async fn recent(
        &self,
        client_uuid: Uuid,
        limit: usize,
    ) -> Result<Option<Vec<DeviceConnection>>, AuditError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ConnectionRow>(
            r"SELECT * FROM device_connections
              WHERE client_uuid = $1
              ORDER BY created_at DESC
              LIMIT $2",
        )
        .bind(client_uuid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| audit_failure(&e))?;

        rows.into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_with_unknown_status_is_corrupt() {
        let row = ProvisioningRow {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            email: "a@x.io".to_owned(),
            device_name: None,
            client_uuid: Uuid::new_v4(),
            status: "ACTIVE".to_owned(),
            encryption_key: "unknown".to_owned(),
            comments: None,
        };
        let result: Result<ProvisioningRecord, _> = row.try_into();
        assert!(matches!(result, Err(ProvisioningError::Corrupt { .. })));
    }

    #[test]
    fn migrations_create_the_partial_unique_index() {
        assert!(MIGRATIONS.iter().any(|m| m.contains("UNIQUE INDEX")
            && m.contains("WHERE status IN ('PENDING', 'ENROLLED')")));
    }
}
