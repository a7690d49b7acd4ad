//! The authority that answers "may this tool call run?".
//!
//! Decisions come from, in order: the session memory, the controller mode,
//! and finally an interactive prompt. Prompts are serialized so a UI only
//! ever shows one question, even when a single model turn fans out several
//! approval-needing calls at once.

use crate::bus::{ApprovalVerdict, UiBus, UiEvent, UiEventKind};
use crate::runtime::InterruptSignal;
use crate::tool::Risk;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("interactive approval mode requires a prompt")]
    MissingPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalMode {
    /// Ask the user through the prompt.
    #[default]
    Interactive,
    /// Approve everything without asking.
    ApproveAll,
    /// Deny everything that is not already remembered.
    Strict,
}

/// A user's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalAnswer {
    Approved,
    ApprovedForSession,
    ApprovedAlways,
    Denied { reason: Option<String> },
}

/// What the controller hands the prompt (and mirrors onto the bus).
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub tool_name: String,
    pub args: Value,
    pub description: String,
    pub risk: Risk,
    pub worker_name: String,
}

/// Outcome the executor acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: Option<String>,
}

impl ApprovalDecision {
    fn approved() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Asks the user. Usually backed by a terminal or [`BusPrompt`].
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn request(&self, request: &ApprovalRequest) -> ApprovalAnswer;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RememberedDecision {
    AllowAlways,
    AllowSession,
    Deny { reason: String },
}

/// Session-scoped decision cache keyed by call fingerprint.
#[derive(Debug, Default)]
pub struct ApprovalMemory {
    entries: HashMap<String, RememberedDecision>,
}

impl ApprovalMemory {
    #[must_use]
    pub fn lookup(&self, fingerprint: &str) -> Option<&RememberedDecision> {
        self.entries.get(fingerprint)
    }

    pub fn remember(&mut self, fingerprint: String, decision: RememberedDecision) {
        self.entries.insert(fingerprint, decision);
    }

    /// Fingerprints granted `always`, for the caller's settings store.
    #[must_use]
    pub fn always_fingerprints(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, d)| **d == RememberedDecision::AllowAlways)
            .map(|(fp, _)| fp.clone())
            .collect();
        out.sort();
        out
    }
}

/// Canonical serialization: object keys sorted recursively, so two
/// semantically identical argument objects fingerprint identically.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Memory key for one `(tool, args)` pair.
#[must_use]
pub fn fingerprint(tool_name: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(args).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ApprovalController {
    mode: ApprovalMode,
    prompt: Option<Arc<dyn ApprovalPrompt>>,
    memory: Mutex<ApprovalMemory>,
    /// Serializes interactive prompting; memory stays lockable throughout.
    gate: tokio::sync::Mutex<()>,
    bus: Arc<UiBus>,
}

impl ApprovalController {
    pub fn new(
        mode: ApprovalMode,
        prompt: Option<Arc<dyn ApprovalPrompt>>,
        bus: Arc<UiBus>,
    ) -> Result<Arc<Self>, ApprovalError> {
        if mode == ApprovalMode::Interactive && prompt.is_none() {
            return Err(ApprovalError::MissingPrompt);
        }
        Ok(Arc::new(Self {
            mode,
            prompt,
            memory: Mutex::new(ApprovalMemory::default()),
            gate: tokio::sync::Mutex::new(()),
            bus,
        }))
    }

    #[must_use]
    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Pre-load `always` grants persisted by a previous run.
    pub fn seed_always(&self, fingerprints: impl IntoIterator<Item = String>) {
        let mut memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        for fp in fingerprints {
            memory.remember(fp, RememberedDecision::AllowAlways);
        }
    }

    /// Directly record a decision, bypassing any prompt.
    pub fn remember(&self, tool_name: &str, args: &Value, decision: RememberedDecision) {
        let fp = fingerprint(tool_name, args);
        self.memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remember(fp, decision);
    }

    /// `always` grants accumulated this session, for persistence.
    #[must_use]
    pub fn always_grants(&self) -> Vec<String> {
        self.memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .always_fingerprints()
    }

    fn lookup(&self, fp: &str) -> Option<ApprovalDecision> {
        let memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        memory.lookup(fp).map(|remembered| match remembered {
            RememberedDecision::AllowAlways | RememberedDecision::AllowSession => {
                ApprovalDecision::approved()
            }
            RememberedDecision::Deny { reason } => ApprovalDecision::denied(reason.clone()),
        })
    }

    /// Decide one call. Never errors: every path resolves to a decision.
    pub async fn decide(
        &self,
        tool_name: &str,
        args: &Value,
        worker_name: &str,
        risk: Risk,
        interrupt: &InterruptSignal,
    ) -> ApprovalDecision {
        let fp = fingerprint(tool_name, args);
        if let Some(decision) = self.lookup(&fp) {
            debug!(tool = tool_name, "approval resolved from memory");
            return decision;
        }

        match self.mode {
            ApprovalMode::ApproveAll => ApprovalDecision::approved(),
            ApprovalMode::Strict => ApprovalDecision::denied("strict mode"),
            ApprovalMode::Interactive => {
                let _turn = self.gate.lock().await;

                // A request that parked here may have been answered for the
                // whole session by the prompt that just finished.
                if let Some(decision) = self.lookup(&fp) {
                    return decision;
                }

                let request = ApprovalRequest {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    tool_name: tool_name.to_string(),
                    args: args.clone(),
                    description: format!("{tool_name} {}", canonical_json(args)),
                    risk,
                    worker_name: worker_name.to_string(),
                };
                self.bus.emit(&UiEvent::ApprovalRequired {
                    request_id: request.request_id.clone(),
                    tool_name: request.tool_name.clone(),
                    description: request.description.clone(),
                    risk: request.risk,
                    worker_name: request.worker_name.clone(),
                });

                let prompt = self
                    .prompt
                    .as_ref()
                    .expect("interactive controller always has a prompt");

                let answer = tokio::select! {
                    answer = prompt.request(&request) => answer,
                    () = interrupt.cancelled() => {
                        return ApprovalDecision::denied("interrupted");
                    }
                };

                match answer {
                    ApprovalAnswer::Approved => ApprovalDecision::approved(),
                    ApprovalAnswer::ApprovedForSession => {
                        self.memory
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .remember(fp, RememberedDecision::AllowSession);
                        ApprovalDecision::approved()
                    }
                    ApprovalAnswer::ApprovedAlways => {
                        self.memory
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .remember(fp, RememberedDecision::AllowAlways);
                        ApprovalDecision::approved()
                    }
                    ApprovalAnswer::Denied { reason } => ApprovalDecision::denied(
                        reason.unwrap_or_else(|| "denied by user".to_string()),
                    ),
                }
            }
        }
    }
}

/// Prompt that answers from `approvalResponse` action events on the bus,
/// matched by request id. Lets a decoupled UI drive approvals without
/// holding a reference to the controller.
///
/// Subscribes once at construction and buffers answers that arrive before
/// the matching [`ApprovalPrompt::request`] call, so a UI may respond
/// synchronously from inside its `approvalRequired` handler.
pub struct BusPrompt {
    bus: Arc<UiBus>,
    pending: Arc<Mutex<HashMap<String, PendingSlot>>>,
    subscription: crate::bus::Subscription,
}

enum PendingSlot {
    Waiting(tokio::sync::oneshot::Sender<(ApprovalVerdict, Option<String>)>),
    Ready(ApprovalVerdict, Option<String>),
}

impl BusPrompt {
    pub fn new(bus: Arc<UiBus>) -> Self {
        let pending: Arc<Mutex<HashMap<String, PendingSlot>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let slots = pending.clone();
        let subscription = bus.on(UiEventKind::ApprovalResponse, move |event| {
            if let UiEvent::ApprovalResponse {
                request_id,
                verdict,
                reason,
            } = event
            {
                let mut slots = slots.lock().unwrap_or_else(|p| p.into_inner());
                match slots.remove(request_id) {
                    Some(PendingSlot::Waiting(tx)) => {
                        let _ = tx.send((*verdict, reason.clone()));
                    }
                    // First response wins; keep it.
                    Some(ready @ PendingSlot::Ready(..)) => {
                        slots.insert(request_id.clone(), ready);
                    }
                    None => {
                        slots.insert(
                            request_id.clone(),
                            PendingSlot::Ready(*verdict, reason.clone()),
                        );
                    }
                }
            }
        });

        Self {
            bus,
            pending,
            subscription,
        }
    }
}

impl Drop for BusPrompt {
    fn drop(&mut self) {
        self.bus.off(&self.subscription);
    }
}

#[async_trait]
impl ApprovalPrompt for BusPrompt {
    async fn request(&self, request: &ApprovalRequest) -> ApprovalAnswer {
        let rx = {
            let mut slots = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            match slots.remove(&request.request_id) {
                Some(PendingSlot::Ready(verdict, reason)) => {
                    return to_answer(verdict, reason);
                }
                Some(PendingSlot::Waiting(_)) | None => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    slots.insert(request.request_id.clone(), PendingSlot::Waiting(tx));
                    rx
                }
            }
        };

        match rx.await {
            Ok((verdict, reason)) => to_answer(verdict, reason),
            Err(_) => ApprovalAnswer::Denied {
                reason: Some("approval channel closed".to_string()),
            },
        }
    }
}

fn to_answer(verdict: ApprovalVerdict, reason: Option<String>) -> ApprovalAnswer {
    match verdict {
        ApprovalVerdict::Yes => ApprovalAnswer::Approved,
        ApprovalVerdict::Session => ApprovalAnswer::ApprovedForSession,
        ApprovalVerdict::Always => ApprovalAnswer::ApprovedAlways,
        ApprovalVerdict::No => ApprovalAnswer::Denied { reason },
    }
}
