//! End-to-end runtime scenarios against a scripted model.

mod common;

use common::*;
use foreman::bus::{UiEvent, UiEventKind};
use foreman::provider::Message;
use foreman::runtime::{RunnerOptions, RuntimeError, WorkerRunner};
use foreman::sandbox::Sandbox;
use foreman::tool::{
    ApprovalAnswer, ApprovalPrompt, ApprovalRequest, Risk, Tool, ToolContext, ToolError,
    ToolResultValue,
};
use foreman::worker::{Attachment, AttachmentPolicy, ToolsetConfig, WorkerDefinition};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn options() -> RunnerOptions {
    RunnerOptions {
        default_model: Some("openai:scripted".to_string()),
        ..RunnerOptions::default()
    }
}

fn with_toolset(mut def: WorkerDefinition, name: &str, config: ToolsetConfig) -> WorkerDefinition {
    def.toolsets.insert(name.to_string(), config);
    def
}

struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }
    fn description(&self) -> &str {
        "Basic arithmetic on two operands"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" },
                "op": { "type": "string", "enum": ["add", "sub"] }
            },
            "required": ["a", "b", "op"]
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
        let a = args["a"].as_f64().unwrap_or_default();
        let b = args["b"].as_f64().unwrap_or_default();
        let result = match args["op"].as_str() {
            Some("add") => a + b,
            Some("sub") => a - b,
            other => {
                return Err(ToolError::InvalidArgs(format!("unknown op {other:?}")));
            }
        };
        Ok(ToolResultValue::text(format!("{result}")))
    }
}

/// Interrupts the shared signal on its nth execution.
struct TickTool {
    executions: Arc<AtomicUsize>,
    interrupt_at: usize,
}

#[async_trait]
impl Tool for TickTool {
    fn name(&self) -> &str {
        "tick"
    }
    fn description(&self) -> &str {
        "Counts invocations"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(
        &self,
        _args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        let n = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.interrupt_at {
            ctx.interrupt.interrupt();
        }
        Ok(ToolResultValue::text(format!("tick {n}")))
    }
}

struct GuardedTool;

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        "deploy"
    }
    fn description(&self) -> &str {
        "Needs approval every time"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn needs_approval(&self, _args: &serde_json::Value) -> bool {
        true
    }
    fn risk(&self) -> Risk {
        Risk::High
    }
    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResultValue, ToolError> {
        Ok(ToolResultValue::text("deployed"))
    }
}

fn tool_results_of(message: &Message) -> &[foreman::provider::ToolResultPart] {
    match message {
        Message::Tool { results } => results,
        other => panic!("expected tool message, got {other:?}"),
    }
}

// S1: a worker that answers immediately with no tool calls.
#[tokio::test]
async fn s1_no_op_run() {
    let model = ScriptedModel::from_responses(vec![text_response("ok", Some((10, 2)))]);
    let shared = scripted_shared(model.clone());
    let events = capture_events(&shared.bus);

    let def = WorkerDefinition::minimal("echo", "Reply 'ok'");
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("hi").await.unwrap();
    runner.dispose();

    assert!(outcome.success);
    assert_eq!(outcome.response.as_deref(), Some("ok"));
    assert_eq!(outcome.tool_call_count, 0);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.tokens.input, 10);
    assert_eq!(outcome.tokens.output, 2);
    assert_eq!(model.call_count(), 1);

    let events = events.lock().unwrap();
    let kinds = kinds_of(&events);
    let pos = |kind: UiEventKind| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(pos(UiEventKind::ExecutionStart) < pos(UiEventKind::MessageSend));
    assert!(pos(UiEventKind::MessageSend) < pos(UiEventKind::ResponseReceive));
    assert!(pos(UiEventKind::ResponseReceive) < pos(UiEventKind::ExecutionEnd));
    assert!(pos(UiEventKind::ExecutionEnd) < pos(UiEventKind::SessionEnd));
    assert_eq!(
        kinds.iter().filter(|k| **k == UiEventKind::MessageSend).count(),
        1
    );
}

// S2: one tool call, then a final answer built on its result.
#[tokio::test]
async fn s2_single_tool_call() {
    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![("c1", "calculator", json!({"a": 5, "b": 3, "op": "add"}))]),
        text_response("The result of 5 + 3 is 8.", Some((20, 5))),
    ]);
    let shared = scripted_shared(model.clone());

    let def = with_toolset(
        WorkerDefinition::minimal("math", "Use the calculator."),
        "custom",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(
        def,
        shared,
        RunnerOptions {
            custom_tools: vec![Arc::new(CalculatorTool)],
            ..options()
        },
    )
    .unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("What is 5 + 3?").await.unwrap();

    assert!(outcome.success);
    assert!(outcome.response.unwrap().contains('8'));
    assert_eq!(outcome.tool_call_count, 1);
    assert_eq!(outcome.iterations, 2);

    // Second request sees system, user, assistant, and the tool result.
    let requests = model.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].len(), 4);
    let results = tool_results_of(&requests[1][3]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "c1");
    assert!(!results[0].is_error);
    assert_eq!(results[0].output.render(), "8");
}

// S3: two parallel filesystem reads, results in call order.
#[tokio::test]
async fn s3_parallel_tool_calls() {
    let sandbox = Arc::new(Sandbox::in_memory());
    sandbox.write("docs/a.txt", b"alpha").await.unwrap();
    sandbox.write("docs/b.txt", b"beta").await.unwrap();

    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![
            ("c1", "read_file", json!({"path": "docs/a.txt"})),
            ("c2", "read_file", json!({"path": "docs/b.txt"})),
        ]),
        text_response("done", None),
    ]);
    let shared = scripted_shared(model.clone()).with_sandbox(sandbox);
    let events = capture_events(&shared.bus);

    let def = with_toolset(
        WorkerDefinition::minimal("reader", "Read the files."),
        "filesystem",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("read both").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.tool_call_count, 2);

    let requests = model.requests.lock().unwrap();
    let results = tool_results_of(&requests[1][3]);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool_call_id, "c1");
    assert_eq!(results[1].tool_call_id, "c2");
    assert!(results[0].output.render().contains("alpha"));
    assert!(results[1].output.render().contains("beta"));

    let events = events.lock().unwrap();
    let tool_results = kinds_of(&events)
        .iter()
        .filter(|k| **k == UiEventKind::ToolResult)
        .count();
    assert_eq!(tool_results, 2);
}

struct CountingSessionPrompt {
    asked: AtomicUsize,
}

#[async_trait]
impl ApprovalPrompt for CountingSessionPrompt {
    async fn request(&self, _: &ApprovalRequest) -> ApprovalAnswer {
        self.asked.fetch_add(1, Ordering::SeqCst);
        ApprovalAnswer::ApprovedForSession
    }
}

// S4: delegation shares the approval controller and sandbox with the child.
#[tokio::test]
async fn s4_delegation_shares_approvals() {
    let write_args = json!({"path": "scratch/report.md", "content": "findings"});
    let model = ScriptedModel::from_responses(vec![
        // parent asks for the analyzer
        tool_response(vec![("c1", "analyzer", json!({"input": "check the notes"}))]),
        // child writes (prompts once, approved for the session)
        tool_response(vec![("cc1", "write_file", write_args.clone())]),
        text_response("analysis complete", Some((5, 5))),
        // parent repeats the identical write: no second prompt
        tool_response(vec![("c2", "write_file", write_args.clone())]),
        text_response("done", Some((5, 5))),
    ]);

    let prompt = Arc::new(CountingSessionPrompt {
        asked: AtomicUsize::new(0),
    });
    let shared = scripted_shared_with_approval(
        model.clone(),
        foreman::tool::ApprovalMode::Interactive,
        Some(prompt.clone()),
    )
    .with_sandbox(Arc::new(Sandbox::in_memory()));
    let events = capture_events(&shared.bus);

    shared.workers.register(with_toolset(
        WorkerDefinition::minimal("analyzer", "Analyze and summarize."),
        "filesystem",
        ToolsetConfig::default(),
    ));

    let parent_def = with_toolset(
        with_toolset(
            WorkerDefinition::minimal("coordinator", "Delegate analysis."),
            "filesystem",
            ToolsetConfig::default(),
        ),
        "workers",
        ToolsetConfig {
            allowed_workers: vec!["analyzer".to_string()],
            ..ToolsetConfig::default()
        },
    );

    let mut runner = WorkerRunner::new(parent_def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let parent_id = runner.worker_id().to_string();
    let outcome = runner.run("coordinate").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.response.as_deref(), Some("done"));

    // One prompt covered both the child's and the parent's identical write.
    assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);

    // The child's answer became the parent's tool result.
    let requests = model.requests.lock().unwrap();
    assert_eq!(requests.len(), 5);
    let parent_results = tool_results_of(&requests[3][3]);
    assert_eq!(parent_results[0].tool_call_id, "c1");
    assert!(parent_results[0].output.render().contains("analysis complete"));

    // The tree saw a depth-1 child under the parent.
    let events = events.lock().unwrap();
    let child_seen = events.iter().any(|event| {
        matches!(event, UiEvent::WorkerUpdate { progress } if progress
            .workers
            .iter()
            .any(|n| n.depth == 1 && n.parent_id.as_deref() == Some(parent_id.as_str())))
    });
    assert!(child_seen, "expected a depth-1 node parented to the root");
}

// S5: strict mode turns the denial into a tool result the model can react to.
#[tokio::test]
async fn s5_strict_denial_continues_the_run() {
    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![("c1", "deploy", json!({}))]),
        text_response("fell back to a dry run", None),
    ]);
    let shared = scripted_shared_with_approval(
        model.clone(),
        foreman::tool::ApprovalMode::Strict,
        None,
    );

    let def = with_toolset(
        WorkerDefinition::minimal("deployer", "Deploy things."),
        "custom",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(
        def,
        shared,
        RunnerOptions {
            custom_tools: vec![Arc::new(GuardedTool)],
            ..options()
        },
    )
    .unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("deploy to prod").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.response.as_deref(), Some("fell back to a dry run"));
    assert_eq!(outcome.tool_call_count, 1);

    let requests = model.requests.lock().unwrap();
    let results = tool_results_of(&requests[1][3]);
    assert!(results[0].is_error);
    assert_eq!(results[0].output.render(), "strict mode");
}

// S6: interrupting between iterations ends the run successfully.
#[tokio::test]
async fn s6_interrupt_between_iterations() {
    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![("c1", "tick", json!({}))]),
        tool_response(vec![("c2", "tick", json!({}))]),
        text_response("never reached", None),
    ]);
    let shared = scripted_shared(model.clone());
    let events = capture_events(&shared.bus);

    let def = with_toolset(
        WorkerDefinition::minimal("ticker", "Tick until stopped."),
        "custom",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(
        def,
        shared,
        RunnerOptions {
            custom_tools: vec![Arc::new(TickTool {
                executions: Arc::new(AtomicUsize::new(0)),
                interrupt_at: 2,
            })],
            ..options()
        },
    )
    .unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("go").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.response.as_deref(), Some("[Interrupted]"));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.tool_call_count, 2);
    assert_eq!(model.call_count(), 2);

    let events = events.lock().unwrap();
    let message_sends = events
        .iter()
        .filter(|e| e.kind() == UiEventKind::MessageSend)
        .count();
    assert_eq!(message_sends, 2, "no messageSend after the interrupt");
    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::ExecutionEnd {
            success: true,
            iterations: 2,
            ..
        }
    )));
}

#[tokio::test]
async fn empty_input_fails_before_any_model_call() {
    let model = ScriptedModel::from_responses(vec![text_response("unused", None)]);
    let shared = scripted_shared(model.clone());

    let def = WorkerDefinition::minimal("needs-input", "Do the thing.");
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("").await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("non-empty input"));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn allow_empty_input_permits_an_empty_run() {
    let model = ScriptedModel::from_responses(vec![text_response("ran anyway", None)]);
    let shared = scripted_shared(model.clone());

    let mut def = WorkerDefinition::minimal("optional-input", "Run regardless.");
    def.allow_empty_input = true;
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("").await.unwrap();

    assert!(outcome.success);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn attachment_policy_is_enforced_before_the_model() {
    let model = ScriptedModel::from_responses(vec![text_response("unused", None)]);
    let shared = scripted_shared(model.clone());

    let mut def = WorkerDefinition::minimal("attach", "Handle attachments.");
    def.attachment_policy = Some(AttachmentPolicy {
        max_attachments: Some(1),
        ..AttachmentPolicy::default()
    });

    let attachment = |name: &str| Attachment {
        name: name.to_string(),
        data: Bytes::from_static(b"data"),
        mime_type: "text/plain".to_string(),
    };
    let mut runner = WorkerRunner::new(
        def,
        shared,
        RunnerOptions {
            attachments: vec![attachment("a.txt"), attachment("b.txt")],
            ..options()
        },
    )
    .unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("summarize these").await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("Attachment policy"));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn iteration_limit_is_exact() {
    let tick = Arc::new(TickTool {
        executions: Arc::new(AtomicUsize::new(0)),
        interrupt_at: usize::MAX,
    });
    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![("c1", "tick", json!({}))]),
        tool_response(vec![("c2", "tick", json!({}))]),
        tool_response(vec![("c3", "tick", json!({}))]),
        tool_response(vec![("c4", "tick", json!({}))]),
    ]);
    let shared = scripted_shared(model.clone());

    let def = with_toolset(
        WorkerDefinition::minimal("looper", "Loop forever."),
        "custom",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(
        def,
        shared,
        RunnerOptions {
            custom_tools: vec![tick],
            max_iterations: Some(3),
            ..options()
        },
    )
    .unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("loop").await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Maximum iterations exceeded"));
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.tool_call_count, 3);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn model_incompatibility_fails_construction() {
    let model = ScriptedModel::from_responses(vec![]);
    let shared = scripted_shared(model);

    let mut def = WorkerDefinition::minimal("picky", "Only anthropic.");
    def.compatible_models = Some(vec!["anthropic:*".to_string()]);

    let err = WorkerRunner::new(def, shared, options()).unwrap_err();
    assert!(matches!(err, RuntimeError::Model(_)));
}

#[tokio::test]
async fn runner_is_single_use() {
    let model = ScriptedModel::from_responses(vec![
        text_response("first", None),
        text_response("second", None),
    ]);
    let shared = scripted_shared(model);

    let def = WorkerDefinition::minimal("once", "Run once.");
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();

    assert!(matches!(
        runner.run("early").await,
        Err(RuntimeError::NotInitialized)
    ));

    runner.initialize().await.unwrap();
    let outcome = runner.run("hi").await.unwrap();
    assert!(outcome.success);

    assert!(matches!(
        runner.run("again").await,
        Err(RuntimeError::AlreadyRan)
    ));
}

#[tokio::test]
async fn provider_failure_surfaces_as_run_error() {
    let model = ScriptedModel::new(vec![Err("rate limited".to_string())]);
    let shared = scripted_shared(model);
    let events = capture_events(&shared.bus);

    let def = WorkerDefinition::minimal("fragile", "Try once.");
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("hi").await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("rate limited"));

    let events = events.lock().unwrap();
    let kinds = kinds_of(&events);
    assert!(kinds.contains(&UiEventKind::ExecutionError));
    assert!(kinds.contains(&UiEventKind::SessionEnd));
}

#[tokio::test]
async fn unknown_toolset_is_a_configuration_error() {
    let model = ScriptedModel::from_responses(vec![]);
    let shared = scripted_shared(model);

    let def = with_toolset(
        WorkerDefinition::minimal("sheller", "Use the shell."),
        "shell",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    let err = runner.initialize().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Toolset(_)));
    assert!(err.to_string().contains("shell"));
}

#[tokio::test]
async fn diff_results_feed_summary_events_and_get_diff() {
    let model = ScriptedModel::from_responses(vec![
        tool_response(vec![(
            "c1",
            "write_file",
            json!({"path": "notes/a.md", "content": "hello\nworld\n"}),
        )]),
        text_response("written", None),
    ]);
    let shared = scripted_shared(model).with_sandbox(Arc::new(Sandbox::in_memory()));
    let events = capture_events(&shared.bus);
    let bus = shared.bus.clone();

    let def = with_toolset(
        WorkerDefinition::minimal("writer", "Write notes."),
        "filesystem",
        ToolsetConfig::default(),
    );
    let mut runner = WorkerRunner::new(def, shared, options()).unwrap();
    runner.initialize().await.unwrap();
    let outcome = runner.run("write it").await.unwrap();
    assert!(outcome.success);

    {
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::DiffSummary { path, is_new: true, lines_added: 2, .. } if path == "notes/a.md"
        )));
    }

    // getDiff replays the recorded content.
    bus.emit(&UiEvent::GetDiff {
        path: "notes/a.md".to_string(),
    });
    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::DiffContent { path, modified, .. }
            if path == "notes/a.md" && modified.contains("hello")
    )));
    runner.dispose();
}
