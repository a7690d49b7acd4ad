//! One-shot, non-interactive-terminal mode: run a worker file to completion.

use crate::bus::{UiBus, UiEvent, UiEventKind};
use crate::config::Config;
use crate::provider::HttpModelFactory;
use crate::runtime::{RunnerOptions, RunnerShared, WorkerRunner};
use crate::sandbox::{HostStore, Sandbox};
use crate::tool::{
    ApprovalAnswer, ApprovalController, ApprovalMode, ApprovalPrompt, ApprovalRequest,
};
use crate::worker::{Attachment, WorkerRegistry, load_worker_file};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// foreman - declarative worker runtime for LLM agents
#[derive(Parser, Debug)]
#[command(name = "foreman", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a worker to completion
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the .worker file
    pub worker: PathBuf,

    /// Input for the worker (use "-" to read from stdin)
    #[arg(default_value = "")]
    pub input: String,

    /// Model override (provider:model, e.g. "anthropic:claude-sonnet-4")
    #[arg(short, long)]
    pub model: Option<String>,

    /// Auto-approve every tool call
    #[arg(short = 'y', long)]
    pub approve_all: bool,

    /// Auto-deny every tool call that needs approval
    #[arg(long, conflicts_with = "approve_all")]
    pub strict: bool,

    /// Attach a file to the initial message (repeatable)
    #[arg(short = 'a', long = "attach")]
    pub attachments: Vec<PathBuf>,

    /// Host directory backing the sandbox root (overrides the worker's spec)
    #[arg(long)]
    pub sandbox_root: Option<PathBuf>,

    /// Maximum reason/act iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output: OutputFormat,

    /// Response only, no progress on stderr
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    /// Final outcome as one JSON object
    Json,
    /// Every display event as a JSON line, then the outcome
    StreamJson,
}

/// Terminal prompt: y/n/s/a on stderr + stdin.
struct StdinPrompt;

#[async_trait]
impl ApprovalPrompt for StdinPrompt {
    async fn request(&self, request: &ApprovalRequest) -> ApprovalAnswer {
        eprintln!(
            "[{}] {} wants to run: {}",
            request.worker_name, request.tool_name, request.description
        );
        eprint!("Approve? [y]es / [n]o / [s]ession / [a]lways: ");
        let line = tokio::task::spawn_blocking(|| {
            let mut buffer = String::new();
            std::io::stdin().read_line(&mut buffer).map(|_| buffer)
        })
        .await;

        match line {
            Ok(Ok(answer)) => match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => ApprovalAnswer::Approved,
                "s" | "session" => ApprovalAnswer::ApprovedForSession,
                "a" | "always" => ApprovalAnswer::ApprovedAlways,
                _ => ApprovalAnswer::Denied { reason: None },
            },
            _ => ApprovalAnswer::Denied {
                reason: Some("no interactive terminal".to_string()),
            },
        }
    }
}

fn mime_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

const DISPLAY_KINDS: [UiEventKind; 17] = [
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
];

fn subscribe_progress(bus: &UiBus, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::StreamJson => {
            for kind in DISPLAY_KINDS {
                bus.on(kind, |event| {
                    if let Ok(json) = serde_json::to_string(event) {
                        println!("{json}");
                    }
                });
            }
        }
        OutputFormat::Text if !quiet => {
            bus.on(UiEventKind::ToolStarted, |event| {
                if let UiEvent::ToolStarted {
                    tool_name,
                    tool_call_id,
                    ..
                } = event
                {
                    eprintln!("> {tool_name}({tool_call_id})");
                }
            });
            bus.on(UiEventKind::ToolResult, |event| {
                if let UiEvent::ToolResult { execution, .. } = event {
                    let note = execution
                        .value
                        .as_ref()
                        .and_then(|v| v.summary().map(str::to_string))
                        .or_else(|| execution.error.clone())
                        .unwrap_or_default();
                    eprintln!("  -> {:?} {note}", execution.status);
                }
            });
            bus.on(UiEventKind::ExecutionError, |event| {
                if let UiEvent::ExecutionError { error, .. } = event {
                    eprintln!("Error: {error}");
                }
            });
            bus.on(UiEventKind::Status, |event| {
                if let UiEvent::Status { text } = event {
                    eprintln!("{text}");
                }
            });
        }
        _ => {}
    }
}

pub async fn run(args: RunArgs) -> ExitCode {
    match run_inner(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(args: RunArgs) -> Result<ExitCode> {
    let mut config = Config::load()?;

    let input = if args.input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        buffer.trim().to_string()
    } else {
        args.input.clone()
    };

    let definition = load_worker_file(&args.worker)
        .await
        .with_context(|| format!("failed to load {}", args.worker.display()))?;

    let mut attachments = Vec::new();
    for path in &args.attachments {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        attachments.push(Attachment {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            data: Bytes::from(data),
            mime_type: mime_for(path).to_string(),
        });
    }

    let bus = Arc::new(UiBus::new());
    subscribe_progress(&bus, args.output, args.quiet);

    let mode = if args.approve_all {
        ApprovalMode::ApproveAll
    } else if args.strict {
        ApprovalMode::Strict
    } else {
        config.approval_mode()
    };
    let prompt: Option<Arc<dyn ApprovalPrompt>> = match mode {
        ApprovalMode::Interactive => Some(Arc::new(StdinPrompt)),
        _ => None,
    };
    let approval = ApprovalController::new(mode, prompt, bus.clone())?;
    approval.seed_always(config.always_allow.iter().cloned());

    // The worker's own directory is searched first for delegation targets.
    let mut search_paths = Vec::new();
    if let Some(parent) = args.worker.parent() {
        search_paths.push(parent.to_path_buf());
    }
    search_paths.extend(config.worker_paths.iter().cloned());
    let registry = Arc::new(WorkerRegistry::new(search_paths));

    let mut shared = RunnerShared::new(
        approval.clone(),
        bus.clone(),
        Arc::new(HttpModelFactory::default()),
        registry,
    );
    if let Some(root) = &args.sandbox_root {
        shared = shared.with_sandbox(Arc::new(Sandbox::with_root(
            Arc::new(HostStore::new()),
            root.clone(),
        )));
    }

    // Ctrl-C cancels the whole tree.
    let interrupt = shared.interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.interrupt();
        }
    });

    let options = RunnerOptions {
        model: args.model.clone(),
        default_model: config.model.clone(),
        max_iterations: args.max_iterations.or(config.max_iterations),
        attachments,
        ..RunnerOptions::default()
    };

    let mut runner = WorkerRunner::new(definition, shared, options)?;
    runner.initialize().await?;
    let outcome = runner.run(&input).await?;
    runner.dispose();

    // New permanent grants go back to the settings store.
    let grants = approval.always_grants();
    if !grants.is_empty() && config.absorb_always_grants(&grants) {
        if let Err(e) = config.save() {
            eprintln!("Warning: failed to persist approval grants: {e:#}");
        }
    }

    match args.output {
        OutputFormat::Text => {
            if let Some(response) = &outcome.response {
                println!("{response}");
            }
            if !outcome.success
                && let Some(error) = &outcome.error
            {
                eprintln!("Run failed: {error}");
            }
        }
        OutputFormat::Json | OutputFormat::StreamJson => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(ExitCode::from(u8::from(!outcome.success)))
}
