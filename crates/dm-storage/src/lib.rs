//! Object storage abstraction for the device management service.
//!
//! This crate defines the [`ObjectStore`] trait, a flat object interface
//! keyed by `/`-separated strings that knows nothing about enrollments,
//! binaries, or configuration. The core crate decides which prefixes and
//! keys to use; this layer only moves bytes.
//!
//! Three implementations are provided:
//!
//! - [`LocalBackend`]: files under a root directory
//! - [`S3Backend`]: S3-compatible object storage via the AWS SDK (feature `s3-backend`)
//! - [`MemoryBackend`]: in-memory, for testing only

mod error;
mod local;
mod memory;
#[cfg(feature = "s3-backend")]
mod s3_backend;

use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncRead;

pub use error::StorageError;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "s3-backend")]
pub use s3_backend::{S3Backend, S3Settings};

/// Content type used when a backend has no better information.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Streaming body of a stored object. Dropping it stops the backing read.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata the service forwards to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes, when the backend reports it.
    pub size: Option<u64>,
    /// MIME type, when the backend reports it.
    pub content_type: Option<String>,
}

/// An object opened for reading.
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub body: ObjectReader,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// A pluggable object storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g.
/// `enroll/<client_uuid>/<file>.json`, `binaries/matisse/setup.exe`).
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Short backend name used in logs and health reports.
    fn name(&self) -> &'static str;

    /// Store an object, overwriting any existing one.
    ///
    /// Returns a human-readable location (filesystem path or `s3://` URI).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str)
    -> Result<String, StorageError>;

    /// Open an object for streaming.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] or [`StorageError::Timeout`] if the
    /// backend fails.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;

    /// Fetch object metadata without reading the body.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Produce a time-limited URL granting direct read access to `key`.
    ///
    /// Expiry is enforced by the backend's signing scheme; the caller only
    /// supplies the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] for backends without signed
    /// URLs (the default).
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let _ = (key, ttl);
        Err(StorageError::Unsupported {
            backend: self.name(),
            operation: "presigned URLs",
        })
    }

    /// Check that the backend is reachable and usable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unreachable`] describing the failure.
    async fn probe(&self) -> Result<(), StorageError>;
}

/// Join a prefix and a relative path into an object key.
///
/// Trailing slashes on the prefix and leading slashes on the path are
/// collapsed so that `("binaries/", "/a.exe")` and `("binaries", "a.exe")`
/// both yield `binaries/a.exe`. An empty prefix yields the bare path.
#[must_use]
pub fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_owned()
    } else {
        format!("{prefix}/{path}")
    }
}

/// Guess a content type from a key's extension.
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext {
        "json" => "application/json",
        "zip" | "oxt" | "xpi" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "msi" => "application/x-msi",
        "exe" => "application/vnd.microsoft.portable-executable",
        "dmg" => "application/x-apple-diskimage",
        "crx" => "application/x-chrome-extension",
        "txt" => "text/plain; charset=utf-8",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
