//! The worker runtime: one execution of one worker.
//!
//! A [`WorkerRunner`] is single-use: construct, `initialize()`, `run()`
//! exactly once, `dispose()`. Construction validates the model against the
//! worker's allow-list; `initialize` resolves the model client, builds the
//! tool map from the declared toolsets, and wires bus subscriptions; `run`
//! drives the reason/act loop until the model stops calling tools, the
//! iteration cap is hit, or the interrupt signal fires.

pub mod interrupt;

pub use interrupt::InterruptSignal;

use crate::bus::{Subscription, UiBus, UiEvent, UiEventKind};
use crate::model::{ModelError, ModelId, check_compatibility};
use crate::provider::{
    AssistantPart, LanguageModel, Message, ModelFactory, ProviderError, ToolResultPart, UserPart,
};
use crate::sandbox::{HostStore, Sandbox, SandboxError};
use crate::tool::registry::{ToolsetBuildContext, ToolsetError, ToolsetRegistry};
use crate::tool::{
    ApprovalController, Tool, ToolCall, ToolContext, ToolExecution, ToolExecutor, ToolResultValue,
};
use crate::worker::tree::{WorkerNode, WorkerStatus, WorkerTracker};
use crate::worker::{Attachment, WorkerDefinition, WorkerRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("initialize() must be called before run()")]
    NotInitialized,

    #[error("a WorkerRunner is single-use; run() was already called")]
    AlreadyRan,

    #[error("runner has been disposed")]
    Disposed,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Toolset(#[from] ToolsetError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// State shared by every runner in one delegation tree. Children receive a
/// clone, so the approval controller, sandbox, bus, tracker, and interrupt
/// signal are the same objects top to bottom.
#[derive(Clone)]
pub struct RunnerShared {
    pub approval: Arc<ApprovalController>,
    pub sandbox: Option<Arc<Sandbox>>,
    pub bus: Arc<UiBus>,
    pub interrupt: InterruptSignal,
    pub tracker: Arc<Mutex<WorkerTracker>>,
    pub workers: Arc<WorkerRegistry>,
    pub models: Arc<dyn ModelFactory>,
    pub toolsets: Arc<ToolsetRegistry>,
    /// Last diff per written path, served back on `getDiff` actions.
    pub diffs: Arc<Mutex<HashMap<String, (Option<String>, String)>>>,
}

impl RunnerShared {
    pub fn new(
        approval: Arc<ApprovalController>,
        bus: Arc<UiBus>,
        models: Arc<dyn ModelFactory>,
        workers: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            approval,
            sandbox: None,
            bus,
            interrupt: InterruptSignal::new(),
            tracker: Arc::new(Mutex::new(WorkerTracker::new())),
            workers,
            models,
            toolsets: ToolsetRegistry::global(),
            diffs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[must_use]
    pub fn with_toolsets(mut self, toolsets: Arc<ToolsetRegistry>) -> Self {
        self.toolsets = toolsets;
        self
    }
}

/// Per-run configuration.
#[derive(Clone, Default)]
pub struct RunnerOptions {
    /// Explicit model override; wins over the worker's declaration.
    pub model: Option<String>,
    /// Fallback when neither an override nor the worker names a model
    /// (a parent's resolved model, or the configured default).
    pub default_model: Option<String>,
    pub max_iterations: Option<u32>,
    pub depth: u32,
    pub parent_worker: Option<String>,
    /// Display label for the delegation tree; defaults to the worker name.
    pub task: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Tools surfaced through the `custom` toolset.
    pub custom_tools: Vec<Arc<dyn Tool>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
}

/// What `run()` reports back, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub tool_call_count: u32,
    pub tokens: TokenTotals,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerState {
    Created,
    Ready,
    Finished,
    Disposed,
}

pub struct WorkerRunner {
    definition: Arc<WorkerDefinition>,
    shared: RunnerShared,
    options: RunnerOptions,
    worker_id: String,
    model_id: ModelId,
    model: Option<Arc<dyn LanguageModel>>,
    executor: Option<Arc<ToolExecutor>>,
    state: RunnerState,
    subscriptions: Vec<Subscription>,
    manual_queue: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    user_queue: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for WorkerRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRunner")
            .field("worker_id", &self.worker_id)
            .field("model_id", &self.model_id)
            .field("state", &self.state)
            .finish()
    }
}

impl WorkerRunner {
    /// Validates the model choice against the worker's `compatible_models`
    /// before anything else happens; an incompatible model never yields a
    /// runner.
    pub fn new(
        definition: WorkerDefinition,
        shared: RunnerShared,
        options: RunnerOptions,
    ) -> Result<Self, RuntimeError> {
        let chosen = options
            .model
            .clone()
            .or_else(|| definition.model.clone())
            .or_else(|| options.default_model.clone())
            .ok_or(ModelError::NoModel)?;
        let model_id = ModelId::parse(&chosen)?;
        check_compatibility(definition.compatible_models.as_deref(), &model_id)?;

        let worker_id = format!(
            "{}-{}",
            definition.name,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        Ok(Self {
            definition: Arc::new(definition),
            shared,
            options,
            worker_id,
            model_id,
            model: None,
            executor: None,
            state: RunnerState::Created,
            subscriptions: Vec::new(),
            manual_queue: Arc::new(Mutex::new(Vec::new())),
            user_queue: Arc::new(Mutex::new(Vec::new())),
        })
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    fn is_root(&self) -> bool {
        self.options.depth == 0
    }

    /// Resolve the model client, build the tool map, and subscribe to bus
    /// actions. Must be called before `run()`.
    pub async fn initialize(&mut self) -> Result<(), RuntimeError> {
        match self.state {
            RunnerState::Created => {}
            RunnerState::Ready => return Ok(()),
            RunnerState::Finished => return Err(RuntimeError::AlreadyRan),
            RunnerState::Disposed => return Err(RuntimeError::Disposed),
        }

        // A root worker that declares a sandbox gets one built against the
        // host filesystem; children inherit the parent's instead.
        if self.shared.sandbox.is_none()
            && let Some(spec) = &self.definition.sandbox
        {
            let cwd = std::env::current_dir().map_err(|e| {
                RuntimeError::Sandbox(SandboxError::Io {
                    path: ".".to_string(),
                    message: e.to_string(),
                })
            })?;
            let sandbox = Sandbox::from_spec(spec, Arc::new(HostStore::new()), &cwd)?;
            self.shared.sandbox = Some(Arc::new(sandbox));
        }

        self.model = Some(self.shared.models.create(&self.model_id)?);

        let tools = self.shared.toolsets.build_tools(
            |_, config| ToolsetBuildContext {
                worker: self.definition.clone(),
                config: config.clone(),
                shared: self.shared.clone(),
                worker_id: self.worker_id.clone(),
                depth: self.options.depth,
                model_id: self.model_id.to_string(),
                custom_tools: self.options.custom_tools.clone(),
            },
            &self.definition.toolsets,
        )?;
        let executor = Arc::new(ToolExecutor::new(
            tools,
            self.shared.approval.clone(),
            self.shared.bus.clone(),
            self.definition.name.clone(),
        ));

        // Action events are tree-wide concerns; only the root listens so a
        // delegation tree doesn't handle each action once per runner.
        if self.is_root() {
            let interrupt = self.shared.interrupt.clone();
            self.subscriptions
                .push(self.shared.bus.on(UiEventKind::Interrupt, move |_| {
                    interrupt.interrupt();
                }));

            let manual_queue = self.manual_queue.clone();
            self.subscriptions.push(self.shared.bus.on(
                UiEventKind::ManualToolInvoke,
                move |event| {
                    if let UiEvent::ManualToolInvoke { tool_name, args } = event {
                        manual_queue
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .push((tool_name.clone(), args.clone()));
                    }
                },
            ));

            let user_queue = self.user_queue.clone();
            self.subscriptions
                .push(
                    self.shared
                        .bus
                        .on(UiEventKind::UserInput, move |event| {
                            if let UiEvent::UserInput { text } = event {
                                user_queue
                                    .lock()
                                    .unwrap_or_else(|p| p.into_inner())
                                    .push(text.clone());
                            }
                        }),
                );

            let diffs = self.shared.diffs.clone();
            let bus = self.shared.bus.clone();
            self.subscriptions
                .push(self.shared.bus.on(UiEventKind::GetDiff, move |event| {
                    if let UiEvent::GetDiff { path } = event {
                        let entry = diffs
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .get(path)
                            .cloned();
                        if let Some((original, modified)) = entry {
                            bus.emit(&UiEvent::DiffContent {
                                path: path.clone(),
                                original,
                                modified,
                            });
                        }
                    }
                }));
        }

        let manual_infos = executor.manual_infos();
        if !manual_infos.is_empty() {
            self.shared.bus.emit(&UiEvent::ManualToolsAvailable {
                worker_id: self.worker_id.clone(),
                tools: manual_infos,
            });
        }

        self.upsert_node(WorkerStatus::Pending);
        self.executor = Some(executor);
        self.state = RunnerState::Ready;
        Ok(())
    }

    /// Release bus subscriptions. Sandbox contents intentionally persist.
    pub fn dispose(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.shared.bus.off(&subscription);
        }
        self.state = RunnerState::Disposed;
    }

    fn upsert_node(&self, status: WorkerStatus) {
        let node = WorkerNode {
            id: self.worker_id.clone(),
            task: self
                .options
                .task
                .clone()
                .unwrap_or_else(|| self.definition.name.clone()),
            status,
            depth: self.options.depth,
            parent_id: self.options.parent_worker.clone(),
        };
        let progress = {
            let mut tracker = self.shared.tracker.lock().unwrap_or_else(|p| p.into_inner());
            tracker.upsert(node);
            if status == WorkerStatus::Running {
                tracker.set_active(Some(self.worker_id.clone()));
            } else if tracker.snapshot().active.as_deref() == Some(&self.worker_id) {
                tracker.set_active(None);
            }
            tracker.snapshot()
        };
        self.shared.bus.emit(&UiEvent::WorkerUpdate { progress });
    }

    fn finish_success(
        &self,
        response: Option<String>,
        iterations: u32,
        tool_call_count: u32,
        tokens: TokenTotals,
    ) -> RunOutcome {
        self.upsert_node(WorkerStatus::Complete);
        self.shared.bus.emit(&UiEvent::ExecutionEnd {
            worker_id: self.worker_id.clone(),
            success: true,
            response: response.clone(),
            iterations,
        });
        if self.is_root() {
            self.shared.bus.emit(&UiEvent::SessionEnd {
                worker_id: self.worker_id.clone(),
            });
        }
        RunOutcome {
            success: true,
            response,
            error: None,
            tool_call_count,
            tokens,
            iterations,
        }
    }

    fn finish_error(
        &self,
        error: String,
        iterations: u32,
        tool_call_count: u32,
        tokens: TokenTotals,
    ) -> RunOutcome {
        warn!(worker = %self.definition.name, %error, "run failed");
        self.upsert_node(WorkerStatus::Error);
        self.shared.bus.emit(&UiEvent::ExecutionError {
            worker_id: self.worker_id.clone(),
            error: error.clone(),
        });
        if self.is_root() {
            self.shared.bus.emit(&UiEvent::SessionEnd {
                worker_id: self.worker_id.clone(),
            });
        }
        RunOutcome {
            success: false,
            response: None,
            error: Some(error),
            tool_call_count,
            tokens,
            iterations,
        }
    }

    fn drain_user_queue(&self, messages: &mut Vec<Message>) {
        let queued: Vec<String> = {
            let mut queue = self.user_queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.drain(..).collect()
        };
        for text in queued {
            messages.push(Message::user_text(text));
        }
    }

    async fn drain_manual_queue(
        &self,
        executor: &ToolExecutor,
        iteration: u32,
        messages: &[Message],
    ) {
        let queued: Vec<(String, serde_json::Value)> = {
            let mut queue = self.manual_queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.drain(..).collect()
        };
        for (tool_name, args) in queued {
            let ctx = ToolContext {
                worker_id: self.worker_id.clone(),
                iteration,
                messages: Arc::new(messages.to_vec()),
                interrupt: self.shared.interrupt.clone(),
            };
            // Manual results surface as events only; they never enter the
            // conversation.
            executor.invoke_manual(&tool_name, args, &ctx).await;
        }
    }

    fn record_diffs(&self, executions: &[ToolExecution]) {
        for execution in executions {
            if let Some(ToolResultValue::Diff {
                path,
                original,
                modified,
                is_new,
                ..
            }) = &execution.value
            {
                self.shared
                    .diffs
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(path.clone(), (original.clone(), modified.clone()));

                let diff = similar::TextDiff::from_lines(
                    original.as_deref().unwrap_or_default(),
                    modified.as_str(),
                );
                let (mut added, mut removed) = (0usize, 0usize);
                for change in diff.iter_all_changes() {
                    match change.tag() {
                        similar::ChangeTag::Insert => added += 1,
                        similar::ChangeTag::Delete => removed += 1,
                        similar::ChangeTag::Equal => {}
                    }
                }
                self.shared.bus.emit(&UiEvent::DiffSummary {
                    worker_id: self.worker_id.clone(),
                    path: path.clone(),
                    lines_added: added,
                    lines_removed: removed,
                    is_new: *is_new,
                });
            }
        }
    }

    /// Drive the reason/act loop to completion.
    ///
    /// Runtime-level outcomes (including failures) come back as an
    /// [`RunOutcome`]; `Err` is reserved for misuse of the runner itself.
    #[instrument(skip_all, fields(worker = %self.definition.name, depth = self.options.depth))]
    pub async fn run(&mut self, input: &str) -> Result<RunOutcome, RuntimeError> {
        match self.state {
            RunnerState::Created => return Err(RuntimeError::NotInitialized),
            RunnerState::Finished => return Err(RuntimeError::AlreadyRan),
            RunnerState::Disposed => return Err(RuntimeError::Disposed),
            RunnerState::Ready => {}
        }
        self.state = RunnerState::Finished;

        let model = self.model.clone().expect("model resolved in initialize");
        let executor = self.executor.clone().expect("executor built in initialize");
        let max_iterations = self
            .options
            .max_iterations
            .unwrap_or(DEFAULT_MAX_ITERATIONS);

        self.shared.bus.emit(&UiEvent::ExecutionStart {
            worker_id: self.worker_id.clone(),
            worker_name: self.definition.name.clone(),
            depth: self.options.depth,
        });
        self.upsert_node(WorkerStatus::Running);

        let empty_totals = TokenTotals::default();
        if input.is_empty() && !self.definition.allow_empty_input {
            return Ok(self.finish_error(
                format!("Worker '{}' requires non-empty input", self.definition.name),
                0,
                0,
                empty_totals,
            ));
        }
        if let Some(policy) = &self.definition.attachment_policy
            && let Err(violation) = policy.check(&self.options.attachments)
        {
            return Ok(self.finish_error(
                format!("Attachment policy violation: {violation}"),
                0,
                0,
                empty_totals,
            ));
        }

        let mut messages = vec![Message::System {
            text: self.definition.instructions.clone(),
        }];
        let mut parts: Vec<UserPart> = Vec::new();
        if !input.is_empty() {
            parts.push(UserPart::Text {
                text: input.to_string(),
            });
        }
        for attachment in &self.options.attachments {
            parts.push(UserPart::File {
                data: attachment.data.clone(),
                mime_type: attachment.mime_type.clone(),
            });
        }
        if parts.is_empty() {
            parts.push(UserPart::Text {
                text: String::new(),
            });
        }
        messages.push(Message::User { parts });

        let specs = executor.llm_specs();
        let mut iteration: u32 = 0;
        let mut tool_call_count: u32 = 0;
        let mut tokens = TokenTotals::default();

        info!(model = %self.model_id, tools = specs.len(), "run started");

        loop {
            if iteration >= max_iterations {
                return Ok(self.finish_error(
                    "Maximum iterations exceeded".to_string(),
                    iteration,
                    tool_call_count,
                    tokens,
                ));
            }
            if self.shared.interrupt.interrupted() {
                return Ok(self.finish_success(
                    Some("[Interrupted]".to_string()),
                    iteration,
                    tool_call_count,
                    tokens,
                ));
            }

            self.drain_user_queue(&mut messages);
            self.drain_manual_queue(&executor, iteration, &messages)
                .await;

            iteration += 1;
            self.shared.bus.emit(&UiEvent::MessageSend {
                worker_id: self.worker_id.clone(),
                iteration,
                message_count: messages.len(),
                tool_count: specs.len(),
            });

            let response = match model.generate(&messages, &specs).await {
                Ok(response) => response,
                Err(e) => {
                    return Ok(self.finish_error(
                        format!("Model provider error: {e}"),
                        iteration,
                        tool_call_count,
                        tokens,
                    ));
                }
            };

            if let Some(usage) = response.usage {
                tokens.input += usage.input_tokens;
                tokens.output += usage.output_tokens;
            }
            self.shared.bus.emit(&UiEvent::ResponseReceive {
                worker_id: self.worker_id.clone(),
                iteration,
                text: response.text.clone(),
                tool_calls: response.tool_calls.len(),
            });

            if response.tool_calls.is_empty() {
                return Ok(self.finish_success(
                    response.text,
                    iteration,
                    tool_call_count,
                    tokens,
                ));
            }

            let mut assistant_parts: Vec<AssistantPart> = Vec::new();
            if let Some(text) = &response.text {
                assistant_parts.push(AssistantPart::Text { text: text.clone() });
            }
            for call in &response.tool_calls {
                assistant_parts.push(AssistantPart::ToolCall {
                    id: call.tool_call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.input.clone(),
                });
            }
            messages.push(Message::Assistant {
                parts: assistant_parts,
            });

            let calls: Vec<ToolCall> = response.tool_calls.into_iter().map(Into::into).collect();
            // Counted before execution so a crashing tool can't underreport.
            tool_call_count += calls.len() as u32;
            debug!(iteration, calls = calls.len(), "executing tool batch");

            let ctx = ToolContext {
                worker_id: self.worker_id.clone(),
                iteration,
                messages: Arc::new(messages.clone()),
                interrupt: self.shared.interrupt.clone(),
            };
            let executions = executor.execute_batch(calls, &ctx).await;
            self.record_diffs(&executions);

            let results: Vec<ToolResultPart> = executions
                .iter()
                .map(|execution| ToolResultPart {
                    tool_call_id: execution.tool_call_id.clone(),
                    tool_name: execution.tool_name.clone(),
                    output: execution.output(),
                    is_error: execution.is_error(),
                })
                .collect();
            messages.push(Message::Tool { results });
        }
    }
}
