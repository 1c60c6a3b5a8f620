//! Error types for `dm-core`.
//!
//! Each error variant carries enough context to diagnose the problem from a
//! log line. Variants that can reach an HTTP response distinguish between
//! what the operator needs (full reason, logged) and what the client may see
//! (the `Display` text of user-correctable errors only).

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::provisioning::ProvisioningStatus;

/// Errors from configuration template lookup and resolution.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The requested device is not in the enumerated device set.
    #[error("unknown device '{device}'")]
    UnknownDevice { device: String },

    /// No template file exists for the profile (and device, if any).
    #[error("no configuration template for profile '{profile}'")]
    NotFound { profile: String },

    /// A template file exists but could not be read.
    #[error("failed to read template '{path}': {reason}")]
    Read { path: String, reason: String },

    /// The template, after substitution, is not valid JSON.
    #[error("template '{path}' does not produce valid JSON: {reason}")]
    InvalidJson { path: String, reason: String },
}

/// Errors from provisioning record persistence.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// No record matches the lookup.
    #[error("no provisioning record for client '{client_uuid}'")]
    NotFound { client_uuid: Uuid },

    /// No record has this id.
    #[error("no provisioning record with id '{id}'")]
    RecordNotFound { id: Uuid },

    /// The requested status change is not allowed by the state machine.
    #[error("cannot move provisioning record from {from} to {to}")]
    InvalidTransition {
        from: ProvisioningStatus,
        to: ProvisioningStatus,
    },

    /// A stored row could not be decoded.
    #[error("corrupt provisioning row: {reason}")]
    Corrupt { reason: String },

    /// The backing store failed or is unreachable.
    #[error("provisioning backend error: {reason}")]
    Backend { reason: String },
}

/// Errors from the connection audit trail.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A single backend failed to persist or query entries.
    #[error("audit backend '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// An entry could not be serialized.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },

    /// Every configured backend failed to persist the entry.
    #[error("all audit backends failed")]
    AllBackendsFailed,
}

/// Errors from the enrollment workflow.
#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    /// The submission is malformed or misses a required field.
    #[error("{0}")]
    Validation(String),

    /// No enrollment storage sink is enabled.
    #[error("no enrollment storage sink is enabled")]
    NoSinkEnabled,

    /// Every enabled sink failed. Keys are sink names, values are
    /// client-safe reasons.
    #[error("all enrollment storage sinks failed")]
    AllSinksFailed {
        failures: BTreeMap<&'static str, &'static str>,
    },

    /// Provisioning state could not be read or updated.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Audit rows could not be queried.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Errors from the binary delivery gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The path is invalid or no object exists under it.
    #[error("binary '{path}' not found")]
    NotFound { path: String },

    /// The backing storage could not be reached or timed out.
    #[error("binary storage unavailable: {reason}")]
    Unavailable { reason: String },
}
