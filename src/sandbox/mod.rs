//! Capability-scoped filesystem.
//!
//! All tool file I/O goes through a [`Sandbox`]: logical `/`-rooted paths are
//! normalized, resolved against a zone/mount table, and checked against that
//! zone's access before the backing [`FileStore`] is touched. Reads refuse
//! binary content both by extension (before any I/O) and by content scan.

pub mod host;
pub mod memory;
pub mod path;
pub mod store;

pub use host::HostStore;
pub use memory::MemoryStore;
pub use store::{FileStore, StoreError, StoreStat};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Read-only: '{path}' resolves to read-only zone '{zone}'")]
    ReadOnly { path: String, zone: String },

    #[error("Permission escalation: '{path}': {reason}")]
    PermissionEscalation { path: String, reason: String },

    #[error("Binary file refused: '{path}': {reason}")]
    BinaryRefused { path: String, reason: String },

    #[error("Sandbox io error at '{path}': {message}")]
    Io { path: String, message: String },
}

/// Zone access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

/// Declarative sandbox description, as it appears in worker frontmatter.
///
/// Either a `root` with an optional zone table, or a list of explicit
/// mounts. With a root, paths outside any declared zone fall into an
/// implicit read-write root zone; with explicit mounts there is no
/// fallback and unmatched paths are invalid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ZoneSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneSpec {
    pub prefix: String,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub name: String,
    /// Logical prefix; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub target: PathBuf,
    pub access: Access,
}

/// File metadata with the logical path re-attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Operations a permission check can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxOp {
    Read,
    Write,
    List,
    Delete,
    Stat,
    Exists,
}

impl SandboxOp {
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, SandboxOp::Write | SandboxOp::Delete)
    }
}

/// Result of [`Sandbox::check_permission`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub zone: String,
    pub reason: Option<String>,
}

/// What a mutating tool call must do before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalRequirement {
    /// The zone explicitly grants this; no prompt.
    PreApproved,
    /// Allowed, but a user approval is required first.
    Ask,
    /// Refused outright; executing will fail.
    Blocked,
}

#[derive(Debug, Clone)]
struct Mount {
    name: String,
    prefix: Vec<String>,
    target: PathBuf,
    access: Access,
    /// Implicit root fallback rather than an operator-declared zone.
    implicit: bool,
}

#[derive(Debug, Clone)]
struct Resolved {
    logical: String,
    physical: PathBuf,
    zone: String,
    access: Access,
    implicit: bool,
}

/// Extensions refused before any I/O happens.
static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "pdf", "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "zip", "gz", "tgz", "tar",
        "bz2", "xz", "7z", "rar", "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "jar",
        "wasm", "mp3", "mp4", "avi", "mov", "mkv", "ogg", "wav", "flac", "woff", "woff2", "ttf",
        "otf", "eot", "sqlite", "db",
    ]
    .into_iter()
    .collect()
});

fn binary_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let ext = name.rsplit_once('.')?.1;
    BINARY_EXTENSIONS
        .get(ext.to_ascii_lowercase().as_str())
        .copied()
}

/// Content heuristic: NUL bytes, or more than 10% control characters.
fn looks_binary(data: &[u8]) -> Option<&'static str> {
    if data.contains(&0) {
        return Some("content contains NUL bytes");
    }
    if data.is_empty() {
        return None;
    }
    let control = data
        .iter()
        .filter(|&&b| (b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t') || b == 0x7f)
        .count();
    if control * 10 > data.len() {
        return Some("more than 10% non-printable characters");
    }
    None
}

/// Zone/mount-scoped filesystem facade over a [`FileStore`].
pub struct Sandbox {
    store: Arc<dyn FileStore>,
    mounts: Vec<Mount>,
}

impl Sandbox {
    /// Root-mode sandbox: everything under `root`, implicit read-write.
    pub fn with_root(store: Arc<dyn FileStore>, root: PathBuf) -> Self {
        Self {
            store,
            mounts: vec![Mount {
                name: "root".to_string(),
                prefix: Vec::new(),
                target: root,
                access: Access::ReadWrite,
                implicit: true,
            }],
        }
    }

    /// In-memory sandbox rooted at `/`, for tests and ephemeral workers.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_root(Arc::new(MemoryStore::new()), PathBuf::from("/"))
    }

    /// Build from a worker's declarative spec.
    ///
    /// `default_root` is used in root mode when the spec names no root
    /// (typically the invoking process's working directory).
    pub fn from_spec(
        spec: &SandboxSpec,
        store: Arc<dyn FileStore>,
        default_root: &std::path::Path,
    ) -> Result<Self, SandboxError> {
        let mut mounts = Vec::new();

        if spec.mounts.is_empty() {
            let root = spec
                .root
                .clone()
                .unwrap_or_else(|| default_root.to_path_buf());
            for zone in &spec.zones {
                let prefix = path::normalize(&zone.prefix)?;
                if prefix.is_empty() {
                    return Err(SandboxError::InvalidPath {
                        path: zone.prefix.clone(),
                        reason: "zone prefix must not be the root".to_string(),
                    });
                }
                let target = prefix.iter().fold(root.clone(), |p, seg| p.join(seg));
                mounts.push(Mount {
                    name: zone.prefix.trim_matches('/').to_string(),
                    prefix,
                    target,
                    access: zone.access,
                    implicit: false,
                });
            }
            mounts.push(Mount {
                name: "root".to_string(),
                prefix: Vec::new(),
                target: root,
                access: Access::ReadWrite,
                implicit: true,
            });
        } else {
            for m in &spec.mounts {
                let prefix = path::normalize(m.prefix.as_deref().unwrap_or(&m.name))?;
                if prefix.is_empty() {
                    return Err(SandboxError::InvalidPath {
                        path: m.name.clone(),
                        reason: "mount prefix must not be the root".to_string(),
                    });
                }
                mounts.push(Mount {
                    name: m.name.clone(),
                    prefix,
                    target: m.target.clone(),
                    access: m.access,
                    implicit: false,
                });
            }
        }

        Ok(Self { store, mounts })
    }

    fn resolve(&self, raw: &str) -> Result<Resolved, SandboxError> {
        let segments = path::normalize(raw)?;
        let mount = self
            .mounts
            .iter()
            .filter(|m| path::has_prefix(&segments, &m.prefix))
            .max_by_key(|m| m.prefix.len())
            .ok_or_else(|| SandboxError::InvalidPath {
                path: raw.to_string(),
                reason: "path does not resolve to any mount".to_string(),
            })?;

        let remainder = &segments[mount.prefix.len()..];
        let physical = remainder
            .iter()
            .fold(mount.target.clone(), |p, seg| p.join(seg));

        Ok(Resolved {
            logical: path::join(&segments),
            physical,
            zone: mount.name.clone(),
            access: mount.access,
            implicit: mount.implicit,
        })
    }

    fn map_store(e: StoreError, logical: &str) -> SandboxError {
        match e {
            StoreError::NotFound => SandboxError::NotFound(logical.to_string()),
            StoreError::IsDirectory => SandboxError::InvalidPath {
                path: logical.to_string(),
                reason: "is a directory".to_string(),
            },
            StoreError::NotADirectory => SandboxError::InvalidPath {
                path: logical.to_string(),
                reason: "not a directory".to_string(),
            },
            StoreError::Io(message) => SandboxError::Io {
                path: logical.to_string(),
                message,
            },
        }
    }

    /// Read a text file. Binary files are refused by extension before any
    /// I/O, and by content scan after.
    pub async fn read(&self, raw: &str) -> Result<String, SandboxError> {
        let resolved = self.resolve(raw)?;
        if let Some(ext) = binary_extension(&resolved.logical).map(|ext| ext.to_string()) {
            return Err(SandboxError::BinaryRefused {
                path: resolved.logical,
                reason: format!(".{ext} files are binary; this sandbox serves text only"),
            });
        }
        let data = self
            .store
            .read(&resolved.physical)
            .await
            .map_err(|e| Self::map_store(e, &resolved.logical))?;
        if let Some(reason) = looks_binary(&data) {
            return Err(SandboxError::BinaryRefused {
                path: resolved.logical,
                reason: reason.to_string(),
            });
        }
        String::from_utf8(data).map_err(|_| SandboxError::BinaryRefused {
            path: resolved.logical,
            reason: "content is not valid UTF-8".to_string(),
        })
    }

    /// Atomically write a file, creating parents as needed.
    pub async fn write(&self, raw: &str, data: &[u8]) -> Result<(), SandboxError> {
        let resolved = self.resolve(raw)?;
        if resolved.logical == "/" {
            return Err(SandboxError::InvalidPath {
                path: resolved.logical,
                reason: "cannot write the sandbox root".to_string(),
            });
        }
        if resolved.access == Access::ReadOnly {
            return Err(SandboxError::ReadOnly {
                path: resolved.logical,
                zone: resolved.zone,
            });
        }
        self.store
            .write(&resolved.physical, data)
            .await
            .map_err(|e| Self::map_store(e, &resolved.logical))
    }

    /// Immediate child names in lexicographic order.
    pub async fn list(&self, raw: &str) -> Result<Vec<String>, SandboxError> {
        let resolved = self.resolve(raw)?;
        let mut names = self
            .store
            .list(&resolved.physical)
            .await
            .map_err(|e| Self::map_store(e, &resolved.logical))?;
        names.sort();
        Ok(names)
    }

    /// Remove a file (never a directory).
    pub async fn delete(&self, raw: &str) -> Result<(), SandboxError> {
        let resolved = self.resolve(raw)?;
        if resolved.logical == "/" {
            return Err(SandboxError::InvalidPath {
                path: resolved.logical,
                reason: "cannot delete the sandbox root".to_string(),
            });
        }
        if resolved.access == Access::ReadOnly {
            return Err(SandboxError::ReadOnly {
                path: resolved.logical,
                zone: resolved.zone,
            });
        }
        self.store
            .delete(&resolved.physical)
            .await
            .map_err(|e| Self::map_store(e, &resolved.logical))
    }

    /// Existence check; never leaks content and never reports I/O detail.
    pub async fn exists(&self, raw: &str) -> Result<bool, SandboxError> {
        let resolved = self.resolve(raw)?;
        Ok(self.store.exists(&resolved.physical).await.unwrap_or(false))
    }

    pub async fn stat(&self, raw: &str) -> Result<FileStat, SandboxError> {
        let resolved = self.resolve(raw)?;
        let stat = self
            .store
            .stat(&resolved.physical)
            .await
            .map_err(|e| Self::map_store(e, &resolved.logical))?;
        Ok(FileStat {
            path: resolved.logical,
            size: stat.size,
            is_directory: stat.is_directory,
            created_at: stat.created_at,
            modified_at: stat.modified_at,
        })
    }

    /// Policy-only check, no I/O. Used by the filesystem toolset to decide
    /// whether a mutation needs a prompt.
    #[must_use]
    pub fn check_permission(&self, op: SandboxOp, raw: &str) -> PermissionCheck {
        match self.resolve(raw) {
            Err(e) => PermissionCheck {
                allowed: false,
                zone: String::new(),
                reason: Some(e.to_string()),
            },
            Ok(resolved) => {
                if op.is_mutating() && resolved.access == Access::ReadOnly {
                    PermissionCheck {
                        allowed: false,
                        zone: resolved.zone.clone(),
                        reason: Some(format!("zone '{}' is read-only", resolved.zone)),
                    }
                } else {
                    PermissionCheck {
                        allowed: true,
                        zone: resolved.zone,
                        reason: None,
                    }
                }
            }
        }
    }

    /// Approval requirement for an operation: explicit read-write zones are
    /// pre-approved, the implicit root zone asks, read-only zones and
    /// unresolvable paths are blocked. Non-mutating ops never need approval.
    #[must_use]
    pub fn approval_for(&self, op: SandboxOp, raw: &str) -> ApprovalRequirement {
        if !op.is_mutating() {
            return ApprovalRequirement::PreApproved;
        }
        match self.resolve(raw) {
            Err(_) => ApprovalRequirement::Blocked,
            Ok(resolved) => match resolved.access {
                Access::ReadOnly => ApprovalRequirement::Blocked,
                Access::ReadWrite if resolved.implicit => ApprovalRequirement::Ask,
                Access::ReadWrite => ApprovalRequirement::PreApproved,
            },
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}
