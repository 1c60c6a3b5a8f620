//! JSON-lines file audit backend.
//!
//! Each line is one serialized [`DeviceConnection`]. The file is opened in
//! append mode and never rewritten, which keeps it usable as a shipping
//! source for log collectors.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::audit::{AuditBackend, DeviceConnection};
use crate::error::AuditError;

/// Audit backend appending JSON lines to a file.
pub struct FileAuditBackend {
    path: PathBuf,
    /// Opened lazily; the mutex serializes writers so lines never interleave.
    writer: Mutex<Option<File>>,
}

impl FileAuditBackend {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failure(&self, reason: String) -> AuditError {
        AuditError::BackendFailure {
            name: self.name().to_owned(),
            reason,
        }
    }

    async fn writer(&self) -> Result<MutexGuard<'_, Option<File>>, AuditError> {
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    self.failure(format!("cannot create '{}': {e}", parent.display()))
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| {
                    self.failure(format!("cannot open '{}': {e}", self.path.display()))
                })?;
            *guard = Some(file);
        }
        Ok(guard)
    }
}

#[async_trait::async_trait]
impl AuditBackend for FileAuditBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn append(&self, entry: &DeviceConnection) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut guard = self.writer().await?;
        let Some(file) = guard.as_mut() else {
            return Err(self.failure("file handle missing after open".to_owned()));
        };

        if let Err(e) = file.write_all(&line).await {
            // Drop the handle so the next append reopens the file.
            *guard = None;
            return Err(self.failure(format!("write failed: {e}")));
        }
        file.flush()
            .await
            .map_err(|e| self.failure(format!("flush failed: {e}")))
    }
}

impl std::fmt::Debug for FileAuditBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::{DeviceAction, Outcome};

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/connections.jsonl");
        let backend = FileAuditBackend::new(&path);

        backend
            .append(&DeviceConnection::anonymous(DeviceAction::ConfigGet))
            .await
            .unwrap();
        backend
            .append(
                &DeviceConnection::anonymous(DeviceAction::Enroll).with_outcome(Outcome::Failed),
            )
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<DeviceConnection> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, DeviceAction::ConfigGet);
        assert_eq!(rows[1].outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn existing_content_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "previous\n").unwrap();

        FileAuditBackend::new(&path)
            .append(&DeviceConnection::anonymous(DeviceAction::BinaryGet))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("previous\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn unwritable_path_is_a_backend_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = FileAuditBackend::new(blocker.join("audit.jsonl"))
            .append(&DeviceConnection::anonymous(DeviceAction::Enroll))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::BackendFailure { .. }));
    }
}
