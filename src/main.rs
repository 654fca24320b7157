//! Note Sage terminal chat
//!
//! Entry point: an interactive chat with the Claude CLI, or a single turn
//! with `--prompt`.

#![allow(clippy::cast_precision_loss)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use note_sage::App;
use note_sage::config::{AVAILABLE_MODELS, AppConfig, Cli, is_known_model};
use note_sage::context::{PromptContext, load_file_context};
use note_sage::message::{ContentBlock, Message, MessageBody, NoticeKind};
use note_sage::session::{TranscriptUpdate, TurnOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env first: clap's env fallbacks and RUST_LOG read the process env.
    let cli = Cli::parse_with_env_file(None, std::env::args_os()).unwrap_or_else(|e| e.exit());

    // Initialize tracing (M-LOG-STRUCTURED); stdout is reserved for the chat.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt_layer.json()).init();
    } else {
        registry.with(fmt_layer).init();
    }

    let config = AppConfig::from_cli(&cli).context("failed to load configuration")?;

    info!(
        name: "app.start",
        model = %config.agent.model,
        cwd = %config.working_directory(),
        tool_servers = config.mcp_servers.len(),
        "Starting note-sage"
    );

    let app = App::from_config(config);
    let mut updates = app.controller.subscribe();

    if let Some(prompt) = cli.prompt.as_deref() {
        let context = load_context(&cli, &app).await;
        return match run_turn(&app, prompt, &context, &mut updates).await {
            TurnOutcome::Completed { .. } => Ok(()),
            TurnOutcome::Cancelled => bail!("turn cancelled"),
            TurnOutcome::Rejected(reason) => bail!("prompt rejected: {reason:?}"),
        };
    }

    repl(&cli, &app, &mut updates).await
}

async fn repl(
    cli: &Cli,
    app: &App,
    updates: &mut broadcast::Receiver<TranscriptUpdate>,
) -> anyhow::Result<()> {
    println!(
        "note-sage ({}). Type /help for commands.",
        app.controller.options().model
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(command, app).await {
                break;
            }
            continue;
        }

        let context = load_context(cli, app).await;
        let outcome = run_turn(app, line, &context, updates).await;
        if matches!(outcome, TurnOutcome::Completed { .. }) && app.config.conversation.auto_save {
            save(app).await;
        }
    }
    Ok(())
}

/// Returns `false` when the session should end.
async fn handle_command(command: &str, app: &App) -> bool {
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    let controller = &app.controller;

    match name {
        "quit" | "exit" => return false,
        "new" => {
            controller.reset();
            println!("Started a new conversation.");
        }
        "save" => save(app).await,
        "model" if arg.is_empty() => {
            println!("Current model: {}", controller.options().model);
            println!("Available: {}", AVAILABLE_MODELS.join(", "));
        }
        "model" => {
            if !is_known_model(arg) {
                warn!(name: "app.model.unknown", model = %arg, "Model is not in the known list");
                println!("Warning: {arg} is not one of {}", AVAILABLE_MODELS.join(", "));
            }
            controller.set_model(arg);
            println!("Model set to {arg}");
        }
        "session" => match controller.confirmed_session() {
            Some(id) => println!("Session: {id}"),
            None => println!("Session: {} (not confirmed yet)", controller.session_id()),
        },
        "mcp" => {
            let statuses = app.mcp_status.statuses();
            if statuses.is_empty() {
                println!("No tool-server status reported yet.");
            }
            for status in statuses {
                let error = status.error.map(|e| format!(" ({e})")).unwrap_or_default();
                println!("{}: {:?}{error}", status.name, status.state);
            }
        }
        "help" => {
            println!("/new              start a new conversation");
            println!("/save             save the conversation as markdown");
            println!("/model [name]     show or switch the model");
            println!("/session          show the session id");
            println!("/mcp              show tool-server status");
            println!("/quit             exit");
            println!("Ctrl-C cancels a running turn.");
        }
        other => println!("Unknown command: /{other}"),
    }
    true
}

/// Run one turn, rendering messages as they arrive. Ctrl-C cancels it.
async fn run_turn(
    app: &App,
    text: &str,
    context: &PromptContext,
    updates: &mut broadcast::Receiver<TranscriptUpdate>,
) -> TurnOutcome {
    let turn = app.controller.send_turn(text, context);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            outcome = &mut turn => {
                while let Ok(update) = updates.try_recv() {
                    render(&update);
                }
                if let TurnOutcome::Rejected(reason) = &outcome {
                    println!("Not sent: {reason:?}");
                }
                return outcome;
            }
            update = updates.recv() => match update {
                Ok(update) => render(&update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(name: "app.render.lagged", skipped, "Renderer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                app.controller.cancel_turn();
            }
        }
    }
}

async fn load_context(cli: &Cli, app: &App) -> PromptContext {
    let Some(file) = &cli.file else {
        return PromptContext::none();
    };
    let display = display_path(file);
    load_file_context(file, display, cli.selection.as_deref(), &app.config.context).await
}

fn display_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

async fn save(app: &App) {
    match app.controller.save_conversation(&app.config.save_dir()).await {
        Ok(Some(path)) => println!("Saved to {}", path.display()),
        Ok(None) => println!("Nothing to save."),
        Err(e) => {
            warn!(name: "app.save.failed", error = %e, "Failed to save conversation");
            println!("Failed to save conversation: {e}");
        }
    }
}

fn render(update: &TranscriptUpdate) {
    match update {
        TranscriptUpdate::Appended(message) => render_message(message),
        TranscriptUpdate::SessionAdopted(id) => {
            tracing::debug!(name: "app.session", session = %id, "Session adopted");
        }
        TranscriptUpdate::Cleared => {}
    }
}

fn render_message(message: &Message) {
    match &message.body {
        MessageBody::SystemNotice { subtype, text } => match subtype {
            NoticeKind::Init => println!("[session {}]", message.session_id),
            NoticeKind::Error => eprintln!("{}", text.as_deref().unwrap_or("Error")),
            NoticeKind::Cancelled | NoticeKind::Success => {
                if let Some(text) = text {
                    println!("{text}");
                }
            }
        },
        MessageBody::UserTurn {
            is_direct_input: true,
            ..
        } => {}
        MessageBody::UserTurn { message, .. } => {
            for block in &message.content {
                if let ContentBlock::ToolResult { is_error, .. } = block {
                    let marker = if is_error.unwrap_or(false) { "failed" } else { "done" };
                    println!("  <- tool result ({marker})");
                }
            }
        }
        MessageBody::AgentTurn { message } => {
            for block in &message.content {
                match block {
                    ContentBlock::Text { text } => println!("{text}"),
                    ContentBlock::ToolUse { name, .. } => println!("> Using tool: {name}"),
                    _ => {}
                }
            }
        }
        MessageBody::FinalResult(result) => {
            let mut summary = Vec::new();
            if let Some(ms) = result.duration_ms.filter(|ms| *ms > 0) {
                summary.push(format!("{:.2}s", ms as f64 / 1000.0));
            }
            if let Some(cost) = result.cost_usd {
                summary.push(format!("${cost:.4}"));
            }
            if let Some(turns) = result.turn_count {
                summary.push(format!("{turns} turn(s)"));
            }
            let label = if result.is_error { "failed" } else { "done" };
            println!("--- {label} ({})", summary.join(", "));
        }
    }
}
