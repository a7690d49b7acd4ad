//! Validates, approves, and concurrently executes one batch of tool calls.
//!
//! A batch is every call the model made in a single turn. Calls fan out on
//! a `JoinSet`; results land in index slots so the returned list is always
//! in call order no matter which tool finishes first.

use super::approval::ApprovalController;
use super::schema::validate_args;
use super::types::{Tool, ToolCall, ToolContext, ToolResultValue, llm_visible};
use crate::bus::{UiBus, UiEvent};
use crate::provider::ToolSpec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Interrupted,
}

/// Everything known about one finished (or refused) tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ToolResultValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolExecution {
    fn failed(call: &ToolCall, status: ToolStatus, error: String, started: Instant) -> Self {
        Self {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            status,
            value: None,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// The payload the model sees: the value on success, the reason on
    /// failure.
    #[must_use]
    pub fn output(&self) -> ToolResultValue {
        match (&self.value, &self.error) {
            (Some(value), _) => value.clone(),
            (None, Some(error)) => ToolResultValue::text(error.clone()),
            (None, None) => ToolResultValue::text(""),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status != ToolStatus::Success
    }
}

/// A UI-invocable tool, as advertised by `manualToolsAvailable`.
#[derive(Debug, Clone, Serialize)]
pub struct ManualToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    approval: Arc<ApprovalController>,
    bus: Arc<UiBus>,
    worker_name: String,
}

impl ToolExecutor {
    pub fn new(
        tools: HashMap<String, Arc<dyn Tool>>,
        approval: Arc<ApprovalController>,
        bus: Arc<UiBus>,
        worker_name: String,
    ) -> Self {
        Self {
            tools,
            approval,
            bus,
            worker_name,
        }
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Declarations for the model, excluding manual-only tools. Sorted by
    /// name so the prompt is stable across runs.
    #[must_use]
    pub fn llm_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .filter(|t| llm_visible(t.as_ref()))
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Tools the UI may invoke directly.
    #[must_use]
    pub fn manual_infos(&self) -> Vec<ManualToolInfo> {
        let mut infos: Vec<ManualToolInfo> = self
            .tools
            .values()
            .filter_map(|t| {
                let cfg = t.manual_execution()?;
                matches!(
                    cfg.mode,
                    super::types::ManualMode::Manual | super::types::ManualMode::Both
                )
                .then(|| ManualToolInfo {
                    name: t.name().to_string(),
                    label: cfg.label,
                    category: cfg.category,
                })
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Execute a model-issued batch. The result list has the same length
    /// and order as `calls`; an interrupt mid-batch resolves the unfinished
    /// tail as `interrupted`.
    pub async fn execute_batch(
        &self,
        calls: Vec<ToolCall>,
        ctx: &ToolContext,
    ) -> Vec<ToolExecution> {
        let skeleton: Vec<ToolCall> = calls.clone();
        let mut slots: Vec<Option<ToolExecution>> = calls.iter().map(|_| None).collect();

        let mut set = JoinSet::new();
        for (index, call) in calls.into_iter().enumerate() {
            let tool = self.tools.get(&call.tool_name).cloned();
            let approval = self.approval.clone();
            let bus = self.bus.clone();
            let worker_name = self.worker_name.clone();
            let ctx = ctx.clone();
            set.spawn(async move {
                let execution =
                    run_one(call, tool, false, &approval, &bus, &worker_name, &ctx).await;
                (index, execution)
            });
        }

        loop {
            tokio::select! {
                () = ctx.interrupt.cancelled() => {
                    warn!(worker = %ctx.worker_id, "tool batch interrupted");
                    set.abort_all();
                    break;
                }
                joined = set.join_next() => {
                    match joined {
                        Some(Ok((index, execution))) => slots[index] = Some(execution),
                        Some(Err(e)) => {
                            // A panicking tool task loses its slot; it is
                            // reported as an interrupted-style error below.
                            warn!("tool task failed to join: {e}");
                        }
                        None => break,
                    }
                }
            }
        }

        skeleton
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                slot.unwrap_or_else(|| {
                    let execution = ToolExecution {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        status: ToolStatus::Interrupted,
                        value: None,
                        error: Some("interrupted".to_string()),
                        duration_ms: 0,
                    };
                    self.bus.emit(&UiEvent::ToolResult {
                        worker_id: ctx.worker_id.clone(),
                        execution: execution.clone(),
                    });
                    execution
                })
            })
            .collect()
    }

    /// Execute a single UI-initiated call. Manual-only tools are allowed
    /// here; everything else behaves exactly like a batch of one.
    pub async fn invoke_manual(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolExecution {
        let call = ToolCall {
            tool_call_id: format!("manual-{}", uuid::Uuid::new_v4()),
            tool_name: tool_name.to_string(),
            tool_args: args,
        };
        let tool = self.tools.get(tool_name).cloned();
        run_one(
            call,
            tool,
            true,
            &self.approval,
            &self.bus,
            &self.worker_name,
            ctx,
        )
        .await
    }
}

async fn run_one(
    call: ToolCall,
    tool: Option<Arc<dyn Tool>>,
    manual_surface: bool,
    approval: &ApprovalController,
    bus: &UiBus,
    worker_name: &str,
    ctx: &ToolContext,
) -> ToolExecution {
    bus.emit(&UiEvent::ToolStarted {
        worker_id: ctx.worker_id.clone(),
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        args: call.tool_args.clone(),
    });

    let started = Instant::now();
    let execution = execute_checked(&call, tool, manual_surface, approval, worker_name, ctx, started).await;

    debug!(
        tool = %execution.tool_name,
        status = ?execution.status,
        duration_ms = execution.duration_ms,
        "tool finished"
    );
    bus.emit(&UiEvent::ToolResult {
        worker_id: ctx.worker_id.clone(),
        execution: execution.clone(),
    });
    execution
}

async fn execute_checked(
    call: &ToolCall,
    tool: Option<Arc<dyn Tool>>,
    manual_surface: bool,
    approval: &ApprovalController,
    worker_name: &str,
    ctx: &ToolContext,
    started: Instant,
) -> ToolExecution {
    let Some(tool) = tool else {
        return ToolExecution::failed(
            call,
            ToolStatus::Error,
            format!("Tool not found: {}", call.tool_name),
            started,
        );
    };

    if !manual_surface && !llm_visible(tool.as_ref()) {
        return ToolExecution::failed(
            call,
            ToolStatus::Error,
            format!("Tool '{}' is not model-invocable", call.tool_name),
            started,
        );
    }

    if let Err(issues) = validate_args(&tool.input_schema(), &call.tool_args) {
        return ToolExecution::failed(
            call,
            ToolStatus::Error,
            format!("Invalid arguments: {}", issues.join("; ")),
            started,
        );
    }

    if tool.needs_approval(&call.tool_args).await {
        let decision = approval
            .decide(
                &call.tool_name,
                &call.tool_args,
                worker_name,
                tool.risk(),
                &ctx.interrupt,
            )
            .await;
        if !decision.approved {
            let reason = decision.reason.unwrap_or_else(|| "denied".to_string());
            let status = if reason == "interrupted" {
                ToolStatus::Interrupted
            } else {
                ToolStatus::Error
            };
            return ToolExecution::failed(call, status, reason, started);
        }
    }

    let outcome = tokio::select! {
        outcome = tool.execute(call.tool_args.clone(), ctx) => outcome,
        () = ctx.interrupt.cancelled() => Err(super::types::ToolError::Interrupted),
    };

    match outcome {
        Ok(value) => ToolExecution {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            status: ToolStatus::Success,
            value: Some(value),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Err(super::types::ToolError::Interrupted) => {
            ToolExecution::failed(call, ToolStatus::Interrupted, "interrupted".to_string(), started)
        }
        Err(e) => ToolExecution::failed(call, ToolStatus::Error, e.to_string(), started),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use crate::runtime::InterruptSignal;
    use crate::tool::approval::ApprovalMode;
    use crate::tool::{ManualExecution, ManualMode, ToolError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> ToolContext {
        ToolContext {
            worker_id: "w-test".to_string(),
            iteration: 1,
            messages: Arc::new(Vec::<Message>::new()),
            interrupt: InterruptSignal::new(),
        }
    }

    struct DelayTool {
        name: String,
        delay_ms: u64,
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for DelayTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "delays then echoes its name"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"v": {"type": "integer"}}})
        }
        async fn execute(
            &self,
            _: serde_json::Value,
            _: &ToolContext,
        ) -> Result<ToolResultValue, ToolError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            Ok(ToolResultValue::text(self.name.clone()))
        }
    }

    struct GuardedTool;

    #[async_trait]
    impl Tool for GuardedTool {
        fn name(&self) -> &str {
            "guarded"
        }
        fn description(&self) -> &str {
            "always needs approval"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn needs_approval(&self, _: &serde_json::Value) -> bool {
            true
        }
        async fn execute(
            &self,
            _: serde_json::Value,
            _: &ToolContext,
        ) -> Result<ToolResultValue, ToolError> {
            Ok(ToolResultValue::text("ran"))
        }
    }

    fn executor(tools: Vec<Arc<dyn Tool>>, mode: ApprovalMode) -> ToolExecutor {
        let bus = Arc::new(UiBus::new());
        let approval = ApprovalController::new(mode, None, bus.clone()).unwrap();
        let map = tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        ToolExecutor::new(map, approval, bus, "test-worker".to_string())
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            tool_args: args,
        }
    }

    #[tokio::test]
    async fn results_keep_call_order_despite_completion_order() {
        let executions = Arc::new(AtomicUsize::new(0));
        let slow: Arc<dyn Tool> = Arc::new(DelayTool {
            name: "slow".to_string(),
            delay_ms: 40,
            executions: executions.clone(),
        });
        let fast: Arc<dyn Tool> = Arc::new(DelayTool {
            name: "fast".to_string(),
            delay_ms: 1,
            executions: executions.clone(),
        });
        let exec = executor(vec![slow, fast], ApprovalMode::ApproveAll);

        let results = exec
            .execute_batch(
                vec![
                    call("c1", "slow", json!({})),
                    call("c2", "fast", json!({})),
                ],
                &ctx(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[1].tool_call_id, "c2");
        assert_eq!(results[0].value, Some(ToolResultValue::text("slow")));
        assert_eq!(results[1].value, Some(ToolResultValue::text("fast")));
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_args_fail_without_executing() {
        let executions = Arc::new(AtomicUsize::new(0));
        let tool: Arc<dyn Tool> = Arc::new(DelayTool {
            name: "echo".to_string(),
            delay_ms: 0,
            executions: executions.clone(),
        });
        let exec = executor(vec![tool], ApprovalMode::ApproveAll);

        let results = exec
            .execute_batch(vec![call("c1", "echo", json!({"v": "not-int"}))], &ctx())
            .await;

        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("'v'"));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let exec = executor(vec![], ApprovalMode::ApproveAll);
        let results = exec
            .execute_batch(vec![call("c1", "ghost", json!({}))], &ctx())
            .await;
        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn strict_mode_denial_becomes_error_result() {
        let tool: Arc<dyn Tool> = Arc::new(GuardedTool);
        let exec = executor(vec![tool], ApprovalMode::Strict);

        let results = exec
            .execute_batch(vec![call("c1", "guarded", json!({}))], &ctx())
            .await;

        assert_eq!(results[0].status, ToolStatus::Error);
        assert_eq!(results[0].error.as_deref(), Some("strict mode"));
        assert_eq!(results[0].output(), ToolResultValue::text("strict mode"));
    }

    #[tokio::test]
    async fn interrupt_resolves_pending_calls_as_interrupted() {
        let executions = Arc::new(AtomicUsize::new(0));
        let hang: Arc<dyn Tool> = Arc::new(DelayTool {
            name: "hang".to_string(),
            delay_ms: 10_000,
            executions: executions.clone(),
        });
        let exec = executor(vec![hang], ApprovalMode::ApproveAll);

        let ctx = ctx();
        let interrupt = ctx.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            interrupt.interrupt();
        });

        let results = exec
            .execute_batch(
                vec![call("c1", "hang", json!({})), call("c2", "hang", json!({}))],
                &ctx,
            )
            .await;

        assert_eq!(results.len(), 2);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.status, ToolStatus::Interrupted, "slot {i}");
            assert_eq!(result.tool_call_id, format!("c{}", i + 1));
        }
    }

    struct ManualTool;

    #[async_trait]
    impl Tool for ManualTool {
        fn name(&self) -> &str {
            "reset_env"
        }
        fn description(&self) -> &str {
            "manual maintenance action"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _: serde_json::Value,
            _: &ToolContext,
        ) -> Result<ToolResultValue, ToolError> {
            Ok(ToolResultValue::text("reset"))
        }
        fn manual_execution(&self) -> Option<ManualExecution> {
            Some(ManualExecution {
                mode: ManualMode::Manual,
                label: Some("Reset".to_string()),
                category: Some("maintenance".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn manual_only_tools_are_hidden_from_the_model() {
        let manual: Arc<dyn Tool> = Arc::new(ManualTool);
        let plain: Arc<dyn Tool> = Arc::new(DelayTool {
            name: "echo".to_string(),
            delay_ms: 0,
            executions: Arc::new(AtomicUsize::new(0)),
        });
        let exec = executor(vec![manual, plain], ApprovalMode::ApproveAll);

        let specs = exec.llm_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");

        let infos = exec.manual_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "reset_env");
        assert_eq!(infos[0].label.as_deref(), Some("Reset"));

        // The model cannot reach it through a batch...
        let results = exec
            .execute_batch(vec![call("c1", "reset_env", json!({}))], &ctx())
            .await;
        assert_eq!(results[0].status, ToolStatus::Error);

        // ...but the UI can.
        let manual_run = exec.invoke_manual("reset_env", json!({}), &ctx()).await;
        assert_eq!(manual_run.status, ToolStatus::Success);
        assert_eq!(manual_run.value, Some(ToolResultValue::text("reset")));
    }

    #[tokio::test]
    async fn tool_error_is_contained_in_the_result() {
        struct FailTool;
        #[async_trait]
        impl Tool for FailTool {
            fn name(&self) -> &str {
                "fail"
            }
            fn description(&self) -> &str {
                "always fails"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(
                &self,
                _: serde_json::Value,
                _: &ToolContext,
            ) -> Result<ToolResultValue, ToolError> {
                Err(ToolError::ExecutionFailed("disk on fire".to_string()))
            }
        }

        let exec = executor(vec![Arc::new(FailTool)], ApprovalMode::ApproveAll);
        let results = exec
            .execute_batch(vec![call("c1", "fail", json!({}))], &ctx())
            .await;
        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("disk on fire"));
    }
}
