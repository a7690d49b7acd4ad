//! In-memory backend, used by tests and throwaway sandboxes.

use super::store::{FileStore, StoreError, StoreStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// Files keyed by canonicalized path string; directories are implicit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Entry>>,
}

fn key(path: &Path) -> String {
    let joined = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn child_of<'a>(candidate: &'a str, dir: &str) -> Option<&'a str> {
    let rest = if dir == "/" {
        candidate.strip_prefix('/')?
    } else {
        candidate.strip_prefix(dir)?.strip_prefix('/')?
    };
    if rest.is_empty() { None } else { Some(rest) }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        let k = key(path);
        let files = self.files.read().await;
        if let Some(entry) = files.get(&k) {
            return Ok(entry.data.clone());
        }
        if files.keys().any(|f| child_of(f, &k).is_some()) {
            return Err(StoreError::IsDirectory);
        }
        Err(StoreError::NotFound)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let k = key(path);
        let now = Utc::now();
        let mut files = self.files.write().await;
        let created_at = files.get(&k).map_or(now, |e| e.created_at);
        files.insert(
            k,
            Entry {
                data: data.to_vec(),
                created_at,
                modified_at: now,
            },
        );
        Ok(())
    }

    async fn list(&self, path: &Path) -> Result<Vec<String>, StoreError> {
        let k = key(path);
        let files = self.files.read().await;
        if files.contains_key(&k) {
            return Err(StoreError::NotADirectory);
        }
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|f| child_of(f, &k))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() && k != "/" {
            return Err(StoreError::NotFound);
        }
        Ok(names)
    }

    async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        let k = key(path);
        let mut files = self.files.write().await;
        if files.remove(&k).is_some() {
            return Ok(());
        }
        if files.keys().any(|f| child_of(f, &k).is_some()) {
            return Err(StoreError::IsDirectory);
        }
        Err(StoreError::NotFound)
    }

    async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        let k = key(path);
        let files = self.files.read().await;
        Ok(files.contains_key(&k) || files.keys().any(|f| child_of(f, &k).is_some()))
    }

    async fn stat(&self, path: &Path) -> Result<StoreStat, StoreError> {
        let k = key(path);
        let files = self.files.read().await;
        if let Some(entry) = files.get(&k) {
            return Ok(StoreStat {
                size: entry.data.len() as u64,
                is_directory: false,
                created_at: entry.created_at,
                modified_at: entry.modified_at,
            });
        }
        let children: Vec<&Entry> = files
            .iter()
            .filter(|(f, _)| child_of(f, &k).is_some())
            .map(|(_, e)| e)
            .collect();
        if children.is_empty() && k != "/" {
            return Err(StoreError::NotFound);
        }
        let created = children.iter().map(|e| e.created_at).min().unwrap_or_else(Utc::now);
        let modified = children.iter().map(|e| e.modified_at).max().unwrap_or_else(Utc::now);
        Ok(StoreStat {
            size: 0,
            is_directory: true,
            created_at: created,
            modified_at: modified,
        })
    }
}
