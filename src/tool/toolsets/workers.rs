//! Delegation toolset: each allowed worker becomes a tool on the parent.
//!
//! The child runner shares the parent's approval controller, sandbox, bus,
//! tracker, and interrupt signal, so an approval granted anywhere in the
//! tree holds everywhere and one Ctrl-C cancels the whole tree.

use super::super::registry::{ToolsetBuildContext, ToolsetError};
use super::super::types::{Tool, ToolContext, ToolError, ToolResultValue};
use crate::runtime::{RunnerOptions, RunnerShared, WorkerRunner};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub fn build(ctx: &ToolsetBuildContext) -> Result<Vec<Arc<dyn Tool>>, ToolsetError> {
    let tools: Vec<Arc<dyn Tool>> = ctx
        .config
        .allowed_workers
        .iter()
        .map(|name| {
            Arc::new(WorkerCallTool {
                child_name: name.clone(),
                description: format!("Delegate a task to the '{name}' worker"),
                parent_worker_id: ctx.worker_id.clone(),
                parent_depth: ctx.depth,
                parent_model: ctx.model_id.clone(),
                shared: ctx.shared.clone(),
            }) as Arc<dyn Tool>
        })
        .collect();
    Ok(ctx.filter_tools(tools))
}

struct WorkerCallTool {
    child_name: String,
    description: String,
    parent_worker_id: String,
    parent_depth: u32,
    parent_model: String,
    shared: RunnerShared,
}

#[async_trait]
impl Tool for WorkerCallTool {
    fn name(&self) -> &str {
        &self.child_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "Task description or input text for the worker"
                }
            },
            "required": ["input"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let input = args
            .get("input")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let definition = self
            .shared
            .workers
            .load(&self.child_name)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let options = RunnerOptions {
            default_model: Some(self.parent_model.clone()),
            depth: self.parent_depth + 1,
            parent_worker: Some(self.parent_worker_id.clone()),
            task: Some(input.to_string()),
            ..RunnerOptions::default()
        };

        info!(child = %self.child_name, depth = options.depth, "delegating to worker");

        let mut runner = WorkerRunner::new(definition, self.shared.clone(), options)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        runner
            .initialize()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let outcome = runner.run(input).await;
        runner.dispose();

        let outcome = outcome.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if outcome.success {
            Ok(ToolResultValue::Text {
                content: outcome.response.unwrap_or_default(),
                summary: Some(format!(
                    "worker '{}' finished in {} iteration(s)",
                    self.child_name, outcome.iterations
                )),
            })
        } else {
            Err(ToolError::ExecutionFailed(format!(
                "worker '{}' failed: {}",
                self.child_name,
                outcome.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }
}
