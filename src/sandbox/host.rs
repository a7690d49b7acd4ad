//! Host-filesystem backend.

use super::store::{FileStore, StoreError, StoreStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;

/// Stores files on the local filesystem via `tokio::fs`.
///
/// Writes go through a same-directory temp file and a rename, so readers
/// never observe a half-written file.
#[derive(Debug, Default)]
pub struct HostStore;

impl HostStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_datetime(t: std::io::Result<SystemTime>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    t.map(DateTime::<Utc>::from).unwrap_or(fallback)
}

#[async_trait]
impl FileStore for HostStore {
    async fn read(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            return Err(StoreError::IsDirectory);
        }
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let parent = path.parent().ok_or_else(|| {
            StoreError::Io(format!("no parent directory for {}", path.display()))
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn list(&self, path: &Path) -> Result<Vec<String>, StoreError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_dir() {
            return Err(StoreError::NotADirectory);
        }
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            return Err(StoreError::IsDirectory);
        }
        Ok(tokio::fs::remove_file(path).await?)
    }

    async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn stat(&self, path: &Path) -> Result<StoreStat, StoreError> {
        let meta = tokio::fs::metadata(path).await?;
        let modified = to_datetime(meta.modified(), Utc::now());
        // Some filesystems do not track creation time; fall back to mtime.
        let created = to_datetime(meta.created(), modified);
        Ok(StoreStat {
            size: meta.len(),
            is_directory: meta.is_dir(),
            created_at: created,
            modified_at: modified,
        })
    }
}
