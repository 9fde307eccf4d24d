//! Filesystem object store for uploaded documents.
//!
//! Object paths are the relative paths stored on file records, resolved under
//! a single base directory. Paths that would escape the base are rejected.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use bidwise_core::{Error, ObjectStore, Result};

/// Filesystem-backed [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Base directory all objects live under.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if path.trim().is_empty() {
            return Err(Error::Storage("empty object path".to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::Storage(format!(
                        "object path escapes storage root: {}",
                        path
                    )))
                }
            }
        }
        Ok(self.base_path.join(relative))
    }

    /// Write, read back, and delete a probe file so misconfigured storage
    /// fails at startup instead of on the first job.
    pub async fn validate(&self) -> Result<()> {
        let probe = ".health-check/probe.bin";
        let data = b"storage-health-check";
        self.upload(probe, data).await?;
        let read_back = self.download(probe).await?;
        if read_back != data {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }
        let full = self.full_path(probe)?;
        fs::remove_file(&full).await?;
        if let Some(parent) = full.parent() {
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        debug!(
            subsystem = "storage",
            op = "download",
            storage_path = %path,
            "Reading object"
        );
        fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Storage(format!("object not found: {}", path))
            } else {
                warn!(
                    subsystem = "storage",
                    op = "download",
                    full_path = %full_path.display(),
                    error = %e,
                    "Object read failed"
                );
                Error::Storage(format!("failed to read {}: {}", path, e))
            }
        })
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(
            subsystem = "storage",
            op = "upload",
            storage_path = %path,
            size = data.len(),
            "Writing object"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // temp file + rename so readers never see a partial object
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(
                subsystem = "storage",
                op = "upload",
                from = %temp_path.display(),
                to = %full_path.display(),
                error = %e,
                "Object rename failed"
            );
            Error::Storage(format!("failed to write {}: {}", path, e))
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }
}
