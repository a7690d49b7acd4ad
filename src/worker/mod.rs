//! Worker definitions: the declarative unit of prompt + tools + constraints.

pub mod parser;
pub mod registry;
pub mod tree;

pub use parser::{Issue, ParseError, load_worker_file, parse_worker_str, split_frontmatter};
pub use registry::{RegistryError, WorkerRegistry};

use crate::sandbox::SandboxSpec;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-toolset configuration from frontmatter. The named fields cover the
/// built-in toolsets; anything else rides along in `extra` for
/// registry-provided toolsets to interpret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsetConfig {
    /// Workers this worker may delegate to (`workers` toolset).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_workers: Vec<String>,
    /// Restrict the toolset to these tool names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Constraints on the files a caller may attach to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attachments: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_suffixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_suffixes: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("too many attachments: {got} > {limit}")]
    TooMany { got: usize, limit: usize },

    #[error("attachments too large: {got} bytes > {limit}")]
    TooLarge { got: u64, limit: u64 },

    #[error("attachment '{name}' has a denied suffix")]
    SuffixDenied { name: String },

    #[error("attachment '{name}' is not in the allowed suffix list")]
    SuffixNotAllowed { name: String },
}

/// A file the caller attaches to the initial user message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub data: Bytes,
    pub mime_type: String,
}

fn has_suffix(name: &str, suffix: &str) -> bool {
    let normalized = suffix.trim_start_matches('.');
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(normalized))
}

impl AttachmentPolicy {
    /// Enforced before any model call; the first violation wins.
    pub fn check(&self, attachments: &[Attachment]) -> Result<(), PolicyViolation> {
        if let Some(limit) = self.max_attachments
            && attachments.len() > limit
        {
            return Err(PolicyViolation::TooMany {
                got: attachments.len(),
                limit,
            });
        }

        if let Some(limit) = self.max_total_bytes {
            let total: u64 = attachments.iter().map(|a| a.data.len() as u64).sum();
            if total > limit {
                return Err(PolicyViolation::TooLarge { got: total, limit });
            }
        }

        for attachment in attachments {
            if self
                .denied_suffixes
                .iter()
                .any(|s| has_suffix(&attachment.name, s))
            {
                return Err(PolicyViolation::SuffixDenied {
                    name: attachment.name.clone(),
                });
            }
            if !self.allowed_suffixes.is_empty()
                && !self
                    .allowed_suffixes
                    .iter()
                    .any(|s| has_suffix(&attachment.name, s))
            {
                return Err(PolicyViolation::SuffixNotAllowed {
                    name: attachment.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A parsed `.worker` file. Immutable once the parser hands it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerDefinition {
    pub name: String,
    /// Prompt body below the frontmatter, trailing whitespace stripped.
    #[serde(skip)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Preferred `provider:model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Glob allow-list the resolved model must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible_models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
    #[serde(default)]
    pub allow_empty_input: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub toolsets: BTreeMap<String, ToolsetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_policy: Option<AttachmentPolicy>,
}

impl WorkerDefinition {
    /// Minimal definition for programmatic construction (tests, embedding).
    pub fn minimal(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            description: None,
            model: None,
            compatible_models: None,
            max_context_tokens: None,
            allow_empty_input: false,
            locked: false,
            toolsets: BTreeMap::new(),
            sandbox: None,
            attachment_policy: None,
        }
    }

    /// Re-serialize the declared frontmatter fields as YAML.
    pub fn to_frontmatter_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
