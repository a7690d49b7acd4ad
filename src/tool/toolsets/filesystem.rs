//! Sandbox-backed file tools.
//!
//! Reads are free; writes and deletes defer to the sandbox's zone policy
//! for their approval requirement, so a worker whose spec grants an
//! explicit `rw` zone never prompts for writes inside it.

use super::super::registry::{ToolsetBuildContext, ToolsetError};
use super::super::types::{Risk, Tool, ToolContext, ToolError, ToolResultValue};
use crate::sandbox::{ApprovalRequirement, Sandbox, SandboxOp};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub fn build(ctx: &ToolsetBuildContext) -> Result<Vec<Arc<dyn Tool>>, ToolsetError> {
    let sandbox = ctx
        .shared
        .sandbox
        .clone()
        .ok_or_else(|| ToolsetError::Build {
            toolset: "filesystem".to_string(),
            message: "worker declares the filesystem toolset but no sandbox".to_string(),
        })?;

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool {
            sandbox: sandbox.clone(),
        }),
        Arc::new(WriteFileTool {
            sandbox: sandbox.clone(),
        }),
        Arc::new(ListFilesTool {
            sandbox: sandbox.clone(),
        }),
        Arc::new(DeleteFileTool {
            sandbox: sandbox.clone(),
        }),
        Arc::new(StatFileTool { sandbox }),
    ];
    Ok(ctx.filter_tools(tools))
}

fn path_arg(args: &serde_json::Value) -> Result<&str, ToolError> {
    args.get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("path is required".to_string()))
}

fn mutation_needs_approval(sandbox: &Sandbox, op: SandboxOp, args: &serde_json::Value) -> bool {
    let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
        return true;
    };
    // Blocked paths fail in execute with the zone's reason; prompting the
    // user about them would be noise.
    sandbox.approval_for(op, path) == ApprovalRequirement::Ask
}

struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandbox"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox path of the file to read" }
            },
            "required": ["path"]
        })
    }

    fn risk(&self) -> Risk {
        Risk::Low
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let path = path_arg(&args)?;
        let content = self.sandbox.read(path).await?;
        let size = content.len() as u64;
        Ok(ToolResultValue::FileContent {
            path: path.to_string(),
            content,
            size,
            summary: Some(format!("read {path} ({size} bytes)")),
        })
    }
}

struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the sandbox, creating parents as needed"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox path of the file to write" },
                "content": { "type": "string", "description": "Full new file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn needs_approval(&self, args: &serde_json::Value) -> bool {
        mutation_needs_approval(&self.sandbox, SandboxOp::Write, args)
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let path = path_arg(&args)?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("content is required".to_string()))?;

        let original = self.sandbox.read(path).await.ok();
        let is_new = original.is_none();
        self.sandbox.write(path, content.as_bytes()).await?;

        let summary = if is_new {
            format!("created {path}")
        } else {
            let diff = similar::TextDiff::from_lines(
                original.as_deref().unwrap_or_default(),
                content,
            );
            let (mut added, mut removed) = (0usize, 0usize);
            for change in diff.iter_all_changes() {
                match change.tag() {
                    similar::ChangeTag::Insert => added += 1,
                    similar::ChangeTag::Delete => removed += 1,
                    similar::ChangeTag::Equal => {}
                }
            }
            format!("updated {path} (+{added} -{removed})")
        };

        Ok(ToolResultValue::Diff {
            path: path.to_string(),
            original,
            modified: content.to_string(),
            is_new,
            bytes_written: content.len() as u64,
            summary: Some(summary),
        })
    }
}

struct ListFilesTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a sandbox directory (non-recursive)"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list; defaults to the sandbox root" }
            }
        })
    }

    fn risk(&self) -> Risk {
        Risk::Low
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("/");
        let files = self.sandbox.list(path).await?;
        let count = files.len();
        Ok(ToolResultValue::FileList {
            path: path.to_string(),
            files,
            count,
            summary: Some(format!("{count} entries in {path}")),
        })
    }
}

struct DeleteFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the sandbox"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox path of the file to delete" }
            },
            "required": ["path"]
        })
    }

    fn risk(&self) -> Risk {
        Risk::High
    }

    async fn needs_approval(&self, args: &serde_json::Value) -> bool {
        mutation_needs_approval(&self.sandbox, SandboxOp::Delete, args)
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let path = path_arg(&args)?;
        self.sandbox.delete(path).await?;
        Ok(ToolResultValue::Text {
            content: format!("Deleted {path}"),
            summary: Some(format!("deleted {path}")),
        })
    }
}

struct StatFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for StatFileTool {
    fn name(&self) -> &str {
        "stat_file"
    }

    fn description(&self) -> &str {
        "Report size, kind, and timestamps for a sandbox path"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox path to inspect" }
            },
            "required": ["path"]
        })
    }

    fn risk(&self) -> Risk {
        Risk::Low
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let path = path_arg(&args)?;
        let stat = self.sandbox.stat(path).await?;
        let summary = Some(format!("stat {}", stat.path));
        let data = serde_json::to_value(&stat)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolResultValue::Json { data, summary })
    }
}
