//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger. Reasons come from the backend and may contain
//! filesystem paths or endpoint names, so they belong in logs, not in
//! HTTP response bodies.

/// Errors that can occur during object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to initialize the backend (bad root directory, bad endpoint).
    #[error("failed to open storage at '{location}': {reason}")]
    Open { location: String, reason: String },

    /// Failed to read an object.
    #[error("failed to read object '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Failed to write an object.
    #[error("failed to write object '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Failed to delete an object.
    #[error("failed to delete object '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// The key is empty, absolute, or escapes the backend root.
    #[error("invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A backend call did not complete within the configured timeout.
    #[error("{operation} on '{key}' timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        key: String,
        timeout_secs: u64,
    },

    /// The backend does not support the requested operation.
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// The backend could not be reached at all (probe failure, offline).
    #[error("{backend} backend unreachable: {reason}")]
    Unreachable {
        backend: &'static str,
        reason: String,
    },
}

impl StorageError {
    /// Short, path-free description suitable for client-facing payloads.
    #[must_use]
    pub const fn public_reason(&self) -> &'static str {
        match self {
            Self::Open { .. } | Self::Unreachable { .. } => "storage unreachable",
            Self::Read { .. } => "read failed",
            Self::Write { .. } => "write failed",
            Self::Delete { .. } => "delete failed",
            Self::InvalidKey { .. } => "invalid key",
            Self::Timeout { .. } => "timed out",
            Self::Unsupported { .. } => "operation not supported",
        }
    }
}
