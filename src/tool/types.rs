//! The tool contract: what a tool is, what it returns, how it fails.

use crate::provider::Message;
use crate::runtime::InterruptSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One tool invocation, as the runtime hands it to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
}

impl From<crate::provider::ToolCallRequest> for ToolCall {
    fn from(req: crate::provider::ToolCallRequest) -> Self {
        Self {
            tool_call_id: req.tool_call_id,
            tool_name: req.tool_name,
            tool_args: req.input,
        }
    }
}

/// Serializable tool output. Every kind may carry a display `summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultValue {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Diff {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original: Option<String>,
        modified: String,
        is_new: bool,
        bytes_written: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    FileContent {
        path: String,
        content: String,
        size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    FileList {
        path: String,
        files: Vec<String>,
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Json {
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl ToolResultValue {
    pub fn text(content: impl Into<String>) -> Self {
        ToolResultValue::Text {
            content: content.into(),
            summary: None,
        }
    }

    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        match self {
            ToolResultValue::Text { summary, .. }
            | ToolResultValue::Diff { summary, .. }
            | ToolResultValue::FileContent { summary, .. }
            | ToolResultValue::FileList { summary, .. }
            | ToolResultValue::Json { summary, .. } => summary.as_deref(),
        }
    }

    /// Flatten to the plain text the model sees as the tool's output.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            ToolResultValue::Text { content, .. } => content.clone(),
            ToolResultValue::Diff {
                path,
                modified,
                is_new,
                bytes_written,
                ..
            } => {
                if *is_new {
                    format!("Created {path} ({bytes_written} bytes):\n{modified}")
                } else {
                    format!("Wrote {path} ({bytes_written} bytes)")
                }
            }
            ToolResultValue::FileContent { path, content, .. } => {
                format!("{path}:\n{content}")
            }
            ToolResultValue::FileList {
                path,
                files,
                count,
                ..
            } => {
                format!("{path} ({count} entries):\n{}", files.join("\n"))
            }
            ToolResultValue::Json { data, .. } => data.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Interrupted")]
    Interrupted,
}

impl From<crate::sandbox::SandboxError> for ToolError {
    fn from(e: crate::sandbox::SandboxError) -> Self {
        ToolError::ExecutionFailed(e.to_string())
    }
}

/// How prominent a tool call should be in an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Moderate,
    High,
}

/// Which surface can invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ManualMode {
    /// Model-invoked only (the default for tools without manual config).
    #[default]
    Llm,
    /// UI-invoked only; hidden from the model.
    Manual,
    /// Both surfaces.
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualExecution {
    pub mode: ManualMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Per-batch execution context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    pub worker_id: String,
    pub iteration: u32,
    /// Conversation so far, for tools that want to inspect it.
    pub messages: Arc<Vec<Message>>,
    pub interrupt: InterruptSignal,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("worker_id", &self.worker_id)
            .field("iteration", &self.iteration)
            .field("messages", &self.messages.len())
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema shaped declaration of the argument object.
    fn input_schema(&self) -> serde_json::Value;

    /// Whether this particular call needs user approval. Argument-sensitive
    /// tools override this per call.
    async fn needs_approval(&self, _args: &serde_json::Value) -> bool {
        false
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError>;

    fn risk(&self) -> Risk {
        Risk::Moderate
    }

    /// Manual-surface configuration; `None` means model-only.
    fn manual_execution(&self) -> Option<ManualExecution> {
        None
    }
}

/// True when the tool should be offered to the model.
#[must_use]
pub fn llm_visible(tool: &dyn Tool) -> bool {
    match tool.manual_execution() {
        None => true,
        Some(cfg) => matches!(cfg.mode, ManualMode::Llm | ManualMode::Both),
    }
}
