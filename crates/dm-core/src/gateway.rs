//! Binary delivery.
//!
//! A logical path such as `matisse/setup.exe` maps to the object key
//! `{prefix}/matisse/setup.exe`. How the bytes reach the client depends on
//! the mode chosen at startup:
//!
//! | mode      | behaviour                                          |
//! |-----------|----------------------------------------------------|
//! | `presign` | `302` to a time-limited URL on the object store    |
//! | `proxy`   | stream the object from the object store            |
//! | `local`   | stream the file from a local directory             |

use std::sync::Arc;
use std::time::Duration;

use dm_storage::{LocalBackend, ObjectStore, StorageError, StoredObject, join_key};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Maximum number of `/`-separated segments in a binary path.
pub const MAX_PATH_SEGMENTS: usize = 16;

/// How binaries are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinariesMode {
    Presign,
    Proxy,
    Local,
}

impl BinariesMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Presign => "presign",
            Self::Proxy => "proxy",
            Self::Local => "local",
        }
    }

    /// Whether this mode reads from the object store.
    #[must_use]
    pub const fn uses_object_store(self) -> bool {
        matches!(self, Self::Presign | Self::Proxy)
    }
}

impl std::fmt::Display for BinariesMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BinariesMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "presign" => Ok(Self::Presign),
            "proxy" => Ok(Self::Proxy),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "invalid binaries mode '{other}' (expected presign, proxy or local)"
            )),
        }
    }
}

/// What the HTTP layer should send back.
#[derive(Debug)]
pub enum BinaryResponse {
    /// Redirect the client to a presigned URL.
    Redirect { location: String },
    /// Stream the object body.
    Stream(StoredObject),
}

/// Normalize and check a requested binary path.
///
/// Leading slashes are stripped. Returns `None` for anything that is empty,
/// climbs out of the prefix, or uses characters outside
/// `[A-Za-z0-9._-/]`.
#[must_use]
pub fn validate_path(raw: &str) -> Option<&str> {
    let path = raw.trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') {
        return None;
    }
    if !path
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'/'))
    {
        return None;
    }
    let mut segments = 0;
    for segment in path.split('/') {
        segments += 1;
        if segment.is_empty() || segment == "." || segment == ".." {
            return None;
        }
    }
    (segments <= MAX_PATH_SEGMENTS).then_some(path)
}

/// Serves binaries in one of the [`BinariesMode`]s.
#[async_trait::async_trait]
pub trait BinaryGateway: Send + Sync + 'static {
    fn mode(&self) -> BinariesMode;

    /// Resolve `path` to a redirect or a stream.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NotFound`] if the path is invalid or no object
    ///   exists under it.
    /// - [`GatewayError::Unavailable`] if storage is unreachable or slow.
    async fn fetch(&self, path: &str) -> Result<BinaryResponse, GatewayError>;
}

fn not_found(path: &str) -> GatewayError {
    GatewayError::NotFound {
        path: path.to_owned(),
    }
}

fn storage_failure(path: &str, e: &StorageError) -> GatewayError {
    if matches!(e, StorageError::InvalidKey { .. }) {
        return not_found(path);
    }
    warn!(path, error = %e, "binary storage call failed");
    GatewayError::Unavailable {
        reason: e.public_reason().to_owned(),
    }
}

fn key_for(prefix: &str, raw: &str) -> Result<(String, String), GatewayError> {
    let path = validate_path(raw).ok_or_else(|| not_found(raw))?;
    Ok((path.to_owned(), join_key(prefix, path)))
}

/// Redirects to presigned object-store URLs.
pub struct PresignGateway {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    ttl: Duration,
    timeout: Duration,
}

impl PresignGateway {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl BinaryGateway for PresignGateway {
    fn mode(&self) -> BinariesMode {
        BinariesMode::Presign
    }

    async fn fetch(&self, raw: &str) -> Result<BinaryResponse, GatewayError> {
        let (path, key) = key_for(&self.prefix, raw)?;

        let head = tokio::time::timeout(self.timeout, self.store.head(&key))
            .await
            .map_err(|_| GatewayError::Unavailable {
                reason: "timed out".to_owned(),
            })?
            .map_err(|e| storage_failure(&path, &e))?;
        if head.is_none() {
            return Err(not_found(&path));
        }

        let location = self
            .store
            .presign_get(&key, self.ttl)
            .await
            .map_err(|e| storage_failure(&path, &e))?;
        debug!(path = %path, ttl_secs = self.ttl.as_secs(), "binary presigned");
        Ok(BinaryResponse::Redirect { location })
    }
}

impl std::fmt::Debug for PresignGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresignGateway")
            .field("backend", &self.store.name())
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Streams objects from the object store through the service.
pub struct ProxyGateway {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    timeout: Duration,
}

impl ProxyGateway {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            timeout,
        }
    }

    async fn open(&self, raw: &str) -> Result<BinaryResponse, GatewayError> {
        let (path, key) = key_for(&self.prefix, raw)?;

        // Only the initial call is bounded; the body streams for as long as
        // the client keeps reading.
        let object = tokio::time::timeout(self.timeout, self.store.get(&key))
            .await
            .map_err(|_| GatewayError::Unavailable {
                reason: "timed out".to_owned(),
            })?
            .map_err(|e| storage_failure(&path, &e))?
            .ok_or_else(|| not_found(&path))?;

        debug!(path = %path, size = ?object.meta.size, "binary streamed");
        Ok(BinaryResponse::Stream(object))
    }
}

#[async_trait::async_trait]
impl BinaryGateway for ProxyGateway {
    fn mode(&self) -> BinariesMode {
        BinariesMode::Proxy
    }

    async fn fetch(&self, raw: &str) -> Result<BinaryResponse, GatewayError> {
        self.open(raw).await
    }
}

impl std::fmt::Debug for ProxyGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyGateway")
            .field("backend", &self.store.name())
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Streams files from `{root}/{prefix}/{path}`.
#[derive(Debug)]
pub struct LocalGateway {
    inner: ProxyGateway,
}

impl LocalGateway {
    #[must_use]
    pub fn new(backend: LocalBackend, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: ProxyGateway::new(Arc::new(backend), prefix, timeout),
        }
    }
}

#[async_trait::async_trait]
impl BinaryGateway for LocalGateway {
    fn mode(&self) -> BinariesMode {
        BinariesMode::Local
    }

    async fn fetch(&self, raw: &str) -> Result<BinaryResponse, GatewayError> {
        self.inner.open(raw).await
    }
}
