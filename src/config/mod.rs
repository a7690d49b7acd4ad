//! Settings file: defaults the CLI applies and the store for `always`
//! approval grants.
//!
//! The runtime core never touches disk for settings; the binary loads this,
//! seeds the approval controller from `always_allow`, and writes new grants
//! back after a run.

use crate::tool::ApprovalMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Default approval mode: "interactive", "approve_all", or "strict".
    pub approval_mode: Option<String>,

    /// Default `provider:model` when neither the CLI nor the worker names one.
    pub model: Option<String>,

    /// Directories searched for `<name>.worker` files, in order.
    pub worker_paths: Vec<PathBuf>,

    pub max_iterations: Option<u32>,

    /// Approval fingerprints the user granted permanently.
    pub always_allow: Vec<String>,

    /// Tracing filter, e.g. "foreman=debug". RUST_LOG overrides.
    pub log_filter: Option<String>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/foreman/config.toml` (or the platform equivalent).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("foreman").join("config.toml"))
    }

    /// Load from the default location; a missing file means defaults.
    pub fn load() -> anyhow::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path().context("no config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write config at {}", path.display()))
    }

    /// Parse the configured approval mode, defaulting to interactive.
    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        match self
            .approval_mode
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("approve_all") => ApprovalMode::ApproveAll,
            Some("strict") => ApprovalMode::Strict,
            Some("interactive") | None => ApprovalMode::Interactive,
            Some(other) => {
                warn!("Unknown approval mode '{other}', defaulting to interactive");
                ApprovalMode::Interactive
            }
        }
    }

    /// Merge newly granted `always` fingerprints; returns true if changed.
    pub fn absorb_always_grants(&mut self, grants: &[String]) -> bool {
        let mut changed = false;
        for grant in grants {
            if !self.always_allow.contains(grant) {
                self.always_allow.push(grant.clone());
                changed = true;
            }
        }
        if changed {
            self.always_allow.sort();
        }
        changed
    }
}
