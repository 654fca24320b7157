//! Streaming transport to the agent process.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tempfile::NamedTempFile;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::agent::options::QueryOptions;
use crate::error::BridgeError;
use crate::events::RawEvent;
use crate::mcp::config::{McpServerConfig, mcp_config_json};

/// Raw events of one query, in the order the process printed them.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RawEvent, BridgeError>> + Send>>;

/// Upper bound for one stdout line; longer lines are skipped.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// How much of stderr is kept for error messages.
const STDERR_TAIL_CHARS: usize = 2000;

/// Starts one agent query and streams its events.
///
/// Dropping the returned stream must stop the query.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn query(&self, prompt: &str, options: &QueryOptions) -> Result<EventStream, BridgeError>;
}

/// Runs the `claude` CLI in print mode with newline-delimited JSON output.
#[derive(Debug, Clone, Default)]
pub struct ClaudeCliTransport {
    api_key: Option<String>,
}

impl ClaudeCliTransport {
    /// `api_key` is exported as `ANTHROPIC_API_KEY` to the child only.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Command-line arguments for a query. `mcp_config` is the file written
    /// by [`write_mcp_config`] for the options' tool servers.
    #[must_use]
    pub fn build_args(options: &QueryOptions, mcp_config: Option<&Path>) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.push(options.model.clone());
        args.push("--permission-mode".into());
        args.push(options.permission_mode.as_arg().into());

        if let Some(resume) = &options.resume {
            args.push("--resume".into());
            args.push(resume.clone());
        }
        if let Some(prompt) = &options.system_prompt {
            args.push("--system-prompt".into());
            args.push(prompt.clone());
        }
        if let Some(path) = mcp_config {
            args.push("--mcp-config".into());
            args.push(path.display().to_string());
        }
        args
    }
}

#[async_trait]
impl AgentTransport for ClaudeCliTransport {
    async fn query(&self, prompt: &str, options: &QueryOptions) -> Result<EventStream, BridgeError> {
        // Stdio servers carry the inherited environment; keep it off the argv.
        let mcp_config = write_mcp_config(&options.mcp_servers)?;
        let args = Self::build_args(options, mcp_config.as_ref().map(NamedTempFile::path));

        let mut cmd = Command::new(&options.executable);
        cmd.args(&args)
            .current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &self.api_key {
            cmd.env("ANTHROPIC_API_KEY", key);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::Upstream(format!(
                "failed to start {}: {e}",
                options.executable.display()
            ))
        })?;
        tracing::info!(
            name: "agent.process.spawned",
            pid = child.id(),
            model = %options.model,
            resume = options.resume.is_some(),
            tool_servers = options.mcp_servers.len(),
            "Started agent process"
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Upstream("agent process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Upstream("agent process has no stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Upstream("agent process has no stderr".into()))?;

        // Writer task: the prompt, then EOF.
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::warn!(name: "agent.process.stdin_failed", error = %e, "Failed to write prompt");
                return;
            }
            let _ = stdin.shutdown().await;
        });

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            tail(&String::from_utf8_lossy(&buf), STDERR_TAIL_CHARS)
        });

        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        let stream = async_stream::stream! {
            // Removed when the stream is dropped.
            let _mcp_config = mcp_config;
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        tracing::warn!(name: "agent.process.line_too_long", "Skipping oversized output line");
                        continue;
                    }
                    Err(LinesCodecError::Io(e)) => {
                        yield Err(BridgeError::Io(e));
                        return;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawEvent>(line) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        tracing::debug!(name: "agent.process.unparsed_line", error = %e, "Skipping non-event output line");
                    }
                }
            }

            let status = child.wait().await;
            let stderr_tail = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) if status.success() => {
                    tracing::debug!(name: "agent.process.exited", "Agent process exited");
                }
                Ok(status) => {
                    let mut message = format!("Claude CLI exited with {status}");
                    if !stderr_tail.is_empty() {
                        message.push_str(": ");
                        message.push_str(&stderr_tail);
                    }
                    yield Err(BridgeError::Upstream(message));
                }
                Err(e) => yield Err(BridgeError::Io(e)),
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Write the `--mcp-config` document to a private temporary file.
///
/// `None` when there are no servers.
pub fn write_mcp_config(
    servers: &BTreeMap<String, McpServerConfig>,
) -> Result<Option<NamedTempFile>, BridgeError> {
    if servers.is_empty() {
        return Ok(None);
    }
    let json = mcp_config_json(servers)?;
    let mut file = tempfile::Builder::new()
        .prefix("note-sage-mcp-")
        .suffix(".json")
        .tempfile()?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    Ok(Some(file))
}

/// Last `max` characters of `text`, trimmed.
fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}
