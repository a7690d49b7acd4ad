//! Shared fixtures: a scripted model and event capture helpers.

use foreman::bus::{UiBus, UiEvent, UiEventKind};
use foreman::model::ModelId;
use foreman::provider::{
    LanguageModel, Message, ModelFactory, ModelResponse, ModelUsage, ProviderError,
    ToolCallRequest, ToolSpec,
};
use foreman::runtime::RunnerShared;
use foreman::tool::{ApprovalController, ApprovalMode, ApprovalPrompt};
use foreman::worker::WorkerRegistry;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays a fixed sequence of responses and records every request.
#[derive(Debug)]
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Result<ModelResponse, String>>>,
    /// Message lists seen by each `generate` call, in order.
    pub requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Result<ModelResponse, String>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn from_responses(responses: Vec<ModelResponse>) -> Arc<Self> {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn id(&self) -> &str {
        "openai:scripted"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.steps.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ProviderError::Api {
                status: 500,
                message,
            }),
            None => Err(ProviderError::Decode("script exhausted".to_string())),
        }
    }
}

/// Hands the same scripted model out for any identifier.
pub struct ScriptedFactory(pub Arc<ScriptedModel>);

impl ModelFactory for ScriptedFactory {
    fn create(&self, _id: &ModelId) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        Ok(self.0.clone())
    }
}

pub fn text_response(text: &str, usage: Option<(u64, u64)>) -> ModelResponse {
    ModelResponse {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
        usage: usage.map(|(input_tokens, output_tokens)| ModelUsage {
            input_tokens,
            output_tokens,
        }),
        finish_reason: Some("stop".to_string()),
    }
}

pub fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>) -> ModelResponse {
    ModelResponse {
        text: None,
        tool_calls: calls
            .into_iter()
            .map(|(id, name, input)| ToolCallRequest {
                tool_call_id: id.to_string(),
                tool_name: name.to_string(),
                input,
            })
            .collect(),
        usage: Some(ModelUsage {
            input_tokens: 1,
            output_tokens: 1,
        }),
        finish_reason: Some("tool_calls".to_string()),
    }
}

/// Shared runner state wired to a scripted model and an `approve_all`
/// controller; tests override pieces as needed.
pub fn scripted_shared(model: Arc<ScriptedModel>) -> RunnerShared {
    scripted_shared_with_approval(model, ApprovalMode::ApproveAll, None)
}

pub fn scripted_shared_with_approval(
    model: Arc<ScriptedModel>,
    mode: ApprovalMode,
    prompt: Option<Arc<dyn ApprovalPrompt>>,
) -> RunnerShared {
    let bus = Arc::new(UiBus::new());
    let approval = ApprovalController::new(mode, prompt, bus.clone()).unwrap();
    RunnerShared::new(
        approval,
        bus,
        Arc::new(ScriptedFactory(model)),
        Arc::new(WorkerRegistry::default()),
    )
}

pub const ALL_KINDS: [UiEventKind; 22] = [
    UiEventKind::ExecutionStart,
    UiEventKind::ExecutionEnd,
    UiEventKind::ExecutionError,
    UiEventKind::MessageSend,
    UiEventKind::ResponseReceive,
    UiEventKind::ToolStarted,
    UiEventKind::ToolResult,
    UiEventKind::Streaming,
    UiEventKind::WorkerUpdate,
    UiEventKind::ApprovalRequired,
    UiEventKind::ManualToolsAvailable,
    UiEventKind::DiffSummary,
    UiEventKind::DiffContent,
    UiEventKind::InputPrompt,
    UiEventKind::SessionEnd,
    UiEventKind::Status,
    UiEventKind::Message,
    UiEventKind::ApprovalResponse,
    UiEventKind::ManualToolInvoke,
    UiEventKind::GetDiff,
    UiEventKind::UserInput,
    UiEventKind::Interrupt,
];

/// Record every event emitted on the bus, in order.
pub fn capture_events(bus: &UiBus) -> Arc<Mutex<Vec<UiEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in ALL_KINDS {
        let sink = events.clone();
        bus.on(kind, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
    }
    events
}

pub fn kinds_of(events: &[UiEvent]) -> Vec<UiEventKind> {
    events.iter().map(UiEvent::kind).collect()
}
