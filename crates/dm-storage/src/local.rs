//! Local filesystem object backend.
//!
//! Objects are plain files under a root directory; the object key is the
//! relative path. Used for enrollment payloads written to a mounted volume
//! and for serving binaries when the deployment has no network path to
//! object storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::{ObjectMeta, ObjectStore, StorageError, StoredObject, content_type_for};

/// Name of the throwaway file written by [`LocalBackend::probe`].
const PROBE_FILE: &str = ".write_test";

/// An object backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`. The directory is created lazily
    /// on the first write or probe.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Map a key onto a path under the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_owned(),
            reason: reason.to_owned(),
        };

        if key.is_empty() {
            return Err(invalid("key must not be empty"));
        }
        if key.contains('\0') || key.contains('\\') {
            return Err(invalid("key contains a forbidden character"));
        }

        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                Component::CurDir => return Err(invalid("key contains '.' segment")),
                Component::ParentDir => return Err(invalid("key contains '..' segment")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("key must be relative"));
                }
            }
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        let write_err = |e: std::io::Error| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&path, body).await.map_err(write_err)?;

        debug!(path = %path.display(), "object written to local storage");
        Ok(path.display().to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let path = self.resolve(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Read {
                    key: key.to_owned(),
                    reason: e.to_string(),
                });
            }
        };

        let metadata = file.metadata().await.map_err(|e| StorageError::Read {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(StoredObject {
            meta: ObjectMeta {
                size: Some(metadata.len()),
                content_type: Some(content_type_for(key).to_owned()),
            },
            body: Box::pin(file),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(Some(ObjectMeta {
                size: Some(m.len()),
                content_type: Some(content_type_for(key).to_owned()),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    /// Write-then-delete a throwaway file to prove the root is writable.
    async fn probe(&self) -> Result<(), StorageError> {
        let unreachable = |e: std::io::Error| StorageError::Unreachable {
            backend: "local",
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(unreachable)?;
        let probe = self.root.join(PROBE_FILE);
        tokio::fs::write(&probe, b"ok").await.map_err(unreachable)?;
        self.delete(PROBE_FILE)
            .await
            .map_err(|e| StorageError::Unreachable {
                backend: "local",
                reason: e.to_string(),
            })
    }
}
