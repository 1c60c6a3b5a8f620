//! In-memory object backend for testing.
//!
//! Objects live in a `BTreeMap` behind a `RwLock` and are lost when the
//! process exits. The backend can be switched offline to simulate an
//! unreachable store, and it produces fake presigned URLs that carry their
//! expiry so tests can check TTL handling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::{ObjectMeta, ObjectStore, StorageError, StoredObject};

#[derive(Debug, Clone)]
struct Entry {
    body: Vec<u8>,
    content_type: String,
}

/// An in-memory object backend backed by a `BTreeMap`.
///
/// Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// # use dm_storage::{MemoryBackend, ObjectStore};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("enroll/a.json", b"{}".to_vec(), "application/json").await.unwrap();
/// assert_eq!(backend.bytes("enroll/a.json").await, Some(b"{}".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Entry>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every operation fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Raw bytes of an object, bypassing the streaming interface.
    pub async fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().await.get(key).map(|e| e.body.clone())
    }

    /// All stored keys in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }

    fn check_online(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unreachable {
                backend: "memory",
                reason: "backend is offline".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.check_online().map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        let mut data = self.data.write().await;
        data.insert(
            key.to_owned(),
            Entry {
                body,
                content_type: content_type.to_owned(),
            },
        );
        Ok(format!("memory://{key}"))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        self.check_online()?;
        let data = self.data.read().await;
        Ok(data.get(key).map(|entry| StoredObject {
            meta: ObjectMeta {
                size: u64::try_from(entry.body.len()).ok(),
                content_type: Some(entry.content_type.clone()),
            },
            body: Box::pin(std::io::Cursor::new(entry.body.clone())),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        self.check_online()?;
        let data = self.data.read().await;
        Ok(data.get(key).map(|entry| ObjectMeta {
            size: u64::try_from(entry.body.len()).ok(),
            content_type: Some(entry.content_type.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_online()?;
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.check_online()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: format!("system clock before epoch: {e}"),
            })?;
        let expires = now.saturating_add(ttl).as_secs();
        Ok(format!("memory://objects/{key}?expires={expires}"))
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.check_online()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn get_missing_returns_none() {
        let backend = MemoryBackend::new();
        assert!(backend.get("does/not/exist").await.unwrap().is_none());
        assert!(backend.head("does/not/exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_stream_body() {
        let backend = MemoryBackend::new();
        backend
            .put("bin/a.exe", b"MZ\x90".to_vec(), "application/x-msdownload")
            .await
            .unwrap();

        let mut obj = backend.get("bin/a.exe").await.unwrap().unwrap();
        assert_eq!(obj.meta.size, Some(3));
        assert_eq!(
            obj.meta.content_type.as_deref(),
            Some("application/x-msdownload")
        );
        let mut buf = Vec::new();
        obj.body.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"MZ\x90");
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn offline_backend_fails_everything() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.put("k", vec![], "x").await,
            Err(StorageError::Write { .. })
        ));
        assert!(matches!(
            backend.get("k").await,
            Err(StorageError::Unreachable { .. })
        ));
        assert!(backend.probe().await.is_err());

        backend.set_offline(false);
        assert!(backend.probe().await.is_ok());
    }

    #[tokio::test]
    async fn presigned_url_carries_expiry() {
        let backend = MemoryBackend::new();
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let url = backend
            .presign_get("bin/a.exe", Duration::from_secs(300))
            .await
            .unwrap();
        let expires: u64 = url.rsplit_once("expires=").unwrap().1.parse().unwrap();
        assert!(expires >= before + 300);
        assert!(expires <= before + 302);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("key", b"val".to_vec(), "text/plain").await.unwrap();
        assert_eq!(clone.bytes("key").await, Some(b"val".to_vec()));
    }
}
