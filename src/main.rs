// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Terminal entry point: wires the environment configuration, provider,
//! tool registry, and agent together, then runs a line-oriented loop.
//! Rendering stays deliberately plain — the interesting parts live in the
//! `clio-*` crates.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};

use clio_config::Config;
use clio_model::Provider as _;
use clio_core::{
    Agent, AgentEvent, ExecutorConfig, ReadToolResultTool, ResultStore, SessionStore,
    ToolExecutor, TranscriptCompressor, TurnOutcome,
};
use clio_log::{LogLevel, Logger, ProcessStats, ToolOpsLog};
use clio_tools::{
    AskUserTool, CodeIntelTool, ExecuteCommandTool, FileMemory, FileOperationsTool,
    GitOperationsTool, MemoryTool, TodoWriteTool, UserChannel, WebOperationsTool,
};

/// Blocking stdin prompt for the ask_user tool.  The agent loop owns stdin
/// while a turn runs, so there is never a competing reader.
struct StdinChannel;

#[async_trait::async_trait]
impl UserChannel for StdinChannel {
    async fn ask(&self, prompt: &str) -> anyhow::Result<String> {
        println!("\n[question] {prompt}");
        print!("> ");
        std::io::stdout().flush()?;
        let reply = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await??;
        Ok(reply.trim_end().to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();

    let filter = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let working_dir = cfg
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .context("cannot determine working directory")?;
    let logs_dir = clio_config::logs_dir(&cfg);

    let provider: Arc<dyn clio_model::Provider> =
        Arc::from(clio_model::from_config(&cfg.model, cfg.agent.http_idle_timeout_secs)?);

    let store = SessionStore::new(clio_config::sessions_dir(&cfg));
    let session = store.create(&working_dir, provider.name(), provider.model_name())?;
    let session_id = session.id().to_string();

    let logger = Logger::new(&logs_dir, if cfg.debug { LogLevel::Debug } else { LogLevel::Info });
    logger.info("main", &format!("session {session_id} started"));
    let mut stats = ProcessStats::new(&logs_dir, &session_id);
    stats.capture("session_start");

    let results = Arc::new(ResultStore::new(session.results_dir()));
    let mut registry = clio_tools::ToolRegistry::new();
    registry.register(FileOperationsTool);
    registry.register(ExecuteCommandTool {
        timeout_secs: cfg.agent.tool_timeout_secs,
        ..ExecuteCommandTool::default()
    });
    registry.register(GitOperationsTool);
    registry.register(WebOperationsTool);
    registry.register(MemoryTool::new(Arc::new(FileMemory::new(
        clio_config::state_root(&cfg).join("memory.json"),
    ))));
    registry.register(TodoWriteTool::new(Arc::new(Mutex::new(Vec::new()))));
    registry.register(CodeIntelTool::default());
    registry.register(AskUserTool::new(Arc::new(StdinChannel)));
    registry.register(ReadToolResultTool::new(results.clone()));
    let registry = Arc::new(registry);

    let executor = ToolExecutor::new(
        registry.clone(),
        results,
        Some(ToolOpsLog::new(&logs_dir, &session_id)),
        ExecutorConfig {
            sandbox: cfg.sandbox,
            working_dir: working_dir.clone(),
            spill_threshold: cfg.agent.spill_threshold,
            default_timeout_secs: cfg.agent.tool_timeout_secs,
        },
    );

    let mut agent = Agent::new(
        session,
        provider.clone(),
        registry,
        executor,
        Box::new(TranscriptCompressor),
        cfg.agent.clone(),
        Some(stats),
    );

    println!(
        "clio — {} / {} (session {session_id}; ctrl-c cancels a turn, 'exit' quits)",
        provider.name(),
        provider.model_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n» ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let outcome = run_one_turn(&mut agent, input).await?;
        match outcome {
            TurnOutcome::Completed => {}
            TurnOutcome::Cancelled => println!("\n[turn cancelled]"),
            TurnOutcome::IterationLimitReached => println!("\n[stopped at the iteration limit]"),
            TurnOutcome::Fatal(msg) => println!("\n[turn failed: {msg}]"),
        }
    }

    logger.info("main", &format!("session {session_id} closed"));
    agent.into_session().close();
    Ok(())
}

/// Drive one turn: stream events to stdout, translate ctrl-c into a
/// cancellation signal.
async fn run_one_turn(agent: &mut Agent, input: &str) -> anyhow::Result<TurnOutcome> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut cancel_tx = Some(cancel_tx);

    let turn = agent.run_turn(input, tx, cancel_rx);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            result = &mut turn => break result?,
            Some(event) = rx.recv() => print_event(event),
            _ = tokio::signal::ctrl_c() => {
                if let Some(tx) = cancel_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    };

    while let Ok(event) = rx.try_recv() {
        print_event(event);
    }
    Ok(outcome)
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::TextDelta(t) => {
            print!("{t}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::TextComplete(_) => println!(),
        AgentEvent::Thinking(_) => {}
        AgentEvent::ToolCallStarted { name, .. } => println!("\n[tool: {name}]"),
        AgentEvent::ToolCallFinished { name, output, success, .. } => {
            let tag = if success { "done" } else { "failed" };
            let first_line = output.lines().next().unwrap_or("");
            println!("[tool {name} {tag}] {first_line}");
        }
        AgentEvent::TokenUsage { .. } => {}
        AgentEvent::ContextTruncated { messages_before, messages_after } => {
            println!("[context truncated: {messages_before} → {messages_after} messages]");
        }
        AgentEvent::Error(msg) => println!("\n[error] {msg}"),
        AgentEvent::TurnComplete => {}
    }
}
