//! Backend storage trait behind the sandbox.
//!
//! A store operates on resolved physical paths and knows nothing about
//! zones or policy. `write` and `delete` must be atomic per path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("is a directory")]
    IsDirectory,

    #[error("not a directory")]
    NotADirectory,

    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound,
            _ => StoreError::Io(e.to_string()),
        }
    }
}

/// Metadata for a stored entry, before the sandbox re-attaches the logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStat {
    pub size: u64,
    pub is_directory: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>, StoreError>;

    /// Atomically replace the file contents, creating parent directories.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;

    /// Immediate child names, unsorted; the sandbox sorts.
    async fn list(&self, path: &Path) -> Result<Vec<String>, StoreError>;

    /// Remove a file. Directories are refused with [`StoreError::IsDirectory`].
    async fn delete(&self, path: &Path) -> Result<(), StoreError>;

    async fn exists(&self, path: &Path) -> Result<bool, StoreError>;

    async fn stat(&self, path: &Path) -> Result<StoreStat, StoreError>;
}
