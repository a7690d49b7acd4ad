//! Typed pub/sub between the runtime and whatever UI is attached.
//!
//! Display events flow runtime -> UI; action events flow UI -> runtime.
//! `emit` is synchronous, in subscription order, and re-entrant: a handler
//! may emit further events or unsubscribe itself. A panicking handler is
//! contained and logged; the remaining handlers still run.

use crate::tool::{ManualToolInfo, Risk, ToolExecution};
use crate::worker::tree::WorkerProgress;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// How the user answered an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    Yes,
    No,
    /// Approve and remember for this session.
    Session,
    /// Approve and remember permanently.
    Always,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UiEvent {
    // ---- display: runtime -> UI ----
    ExecutionStart {
        worker_id: String,
        worker_name: String,
        depth: u32,
    },
    ExecutionEnd {
        worker_id: String,
        success: bool,
        response: Option<String>,
        iterations: u32,
    },
    ExecutionError {
        worker_id: String,
        error: String,
    },
    MessageSend {
        worker_id: String,
        iteration: u32,
        message_count: usize,
        tool_count: usize,
    },
    ResponseReceive {
        worker_id: String,
        iteration: u32,
        text: Option<String>,
        tool_calls: usize,
    },
    ToolStarted {
        worker_id: String,
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        worker_id: String,
        execution: ToolExecution,
    },
    Streaming {
        worker_id: String,
        delta: String,
    },
    WorkerUpdate {
        progress: WorkerProgress,
    },
    ApprovalRequired {
        request_id: String,
        tool_name: String,
        description: String,
        risk: Risk,
        worker_name: String,
    },
    ManualToolsAvailable {
        worker_id: String,
        tools: Vec<ManualToolInfo>,
    },
    DiffSummary {
        worker_id: String,
        path: String,
        lines_added: usize,
        lines_removed: usize,
        is_new: bool,
    },
    DiffContent {
        path: String,
        original: Option<String>,
        modified: String,
    },
    InputPrompt {
        worker_id: String,
        prompt: String,
    },
    SessionEnd {
        worker_id: String,
    },
    Status {
        text: String,
    },
    Message {
        text: String,
    },

    // ---- action: UI -> runtime ----
    ApprovalResponse {
        request_id: String,
        verdict: ApprovalVerdict,
        reason: Option<String>,
    },
    ManualToolInvoke {
        tool_name: String,
        args: serde_json::Value,
    },
    GetDiff {
        path: String,
    },
    UserInput {
        text: String,
    },
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiEventKind {
    ExecutionStart,
    ExecutionEnd,
    ExecutionError,
    MessageSend,
    ResponseReceive,
    ToolStarted,
    ToolResult,
    Streaming,
    WorkerUpdate,
    ApprovalRequired,
    ManualToolsAvailable,
    DiffSummary,
    DiffContent,
    InputPrompt,
    SessionEnd,
    Status,
    Message,
    ApprovalResponse,
    ManualToolInvoke,
    GetDiff,
    UserInput,
    Interrupt,
}

impl UiEvent {
    #[must_use]
    pub fn kind(&self) -> UiEventKind {
        match self {
            UiEvent::ExecutionStart { .. } => UiEventKind::ExecutionStart,
            UiEvent::ExecutionEnd { .. } => UiEventKind::ExecutionEnd,
            UiEvent::ExecutionError { .. } => UiEventKind::ExecutionError,
            UiEvent::MessageSend { .. } => UiEventKind::MessageSend,
            UiEvent::ResponseReceive { .. } => UiEventKind::ResponseReceive,
            UiEvent::ToolStarted { .. } => UiEventKind::ToolStarted,
            UiEvent::ToolResult { .. } => UiEventKind::ToolResult,
            UiEvent::Streaming { .. } => UiEventKind::Streaming,
            UiEvent::WorkerUpdate { .. } => UiEventKind::WorkerUpdate,
            UiEvent::ApprovalRequired { .. } => UiEventKind::ApprovalRequired,
            UiEvent::ManualToolsAvailable { .. } => UiEventKind::ManualToolsAvailable,
            UiEvent::DiffSummary { .. } => UiEventKind::DiffSummary,
            UiEvent::DiffContent { .. } => UiEventKind::DiffContent,
            UiEvent::InputPrompt { .. } => UiEventKind::InputPrompt,
            UiEvent::SessionEnd { .. } => UiEventKind::SessionEnd,
            UiEvent::Status { .. } => UiEventKind::Status,
            UiEvent::Message { .. } => UiEventKind::Message,
            UiEvent::ApprovalResponse { .. } => UiEventKind::ApprovalResponse,
            UiEvent::ManualToolInvoke { .. } => UiEventKind::ManualToolInvoke,
            UiEvent::GetDiff { .. } => UiEventKind::GetDiff,
            UiEvent::UserInput { .. } => UiEventKind::UserInput,
            UiEvent::Interrupt => UiEventKind::Interrupt,
        }
    }
}

type Handler = Arc<dyn Fn(&UiEvent) + Send + Sync>;

/// Handle returned by [`UiBus::on`]; pass back to [`UiBus::off`] to detach.
/// Dropping it does NOT unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    kind: UiEventKind,
    id: u64,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<UiEventKind, Vec<(u64, Handler)>>,
}

#[derive(Default)]
pub struct UiBus {
    inner: Mutex<BusInner>,
}

impl UiBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        kind: UiEventKind,
        handler: impl Fn(&UiEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { kind, id }
    }

    /// Invoke every handler registered for the event's kind, in
    /// subscription order. The handler list is snapshotted before the lock
    /// is released, so handlers may freely re-enter the bus.
    pub fn emit(&self, event: &UiEvent) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .handlers
                .get(&event.kind())
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(kind = ?event.kind(), "event handler panicked; continuing");
            }
        }
    }

    pub fn off(&self, subscription: &Subscription) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handlers) = inner.handlers.get_mut(&subscription.kind) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.handlers.clear();
    }
}
