//! Turn lifecycle of one conversation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Local, Utc};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::agent::AgentBridge;
use crate::agent::bridge::InvokeRequest;
use crate::context::{PromptContext, build_prompt};
use crate::mcp::config::{McpServerEntry, to_agent_servers};
use crate::message::Message;
use crate::session::transcript::{Transcript, write_export};

const UPDATE_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_executable_path(bridge: &AgentBridge, options: &ChatOptions) {
    if let Some(path) = &options.executable_path {
        bridge.set_executable_path(Some(path.clone()));
    }
}

/// Per-conversation settings used for every turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub working_directory: String,
    pub system_prompt: Option<String>,
    pub executable_path: Option<PathBuf>,
    pub tool_servers: Vec<McpServerEntry>,
    /// Log every augmented prompt.
    pub debug_context: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Pending { turn: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Blank input.
    Empty,
    /// A turn is already pending.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { session_id: String },
    Rejected(RejectReason),
    Cancelled,
}

/// Change notification for transcript observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptUpdate {
    Appended(Message),
    SessionAdopted(String),
    Cleared,
}

/// Cancels its turn when dropped while that turn is still pending.
struct PendingTurn<'a> {
    controller: &'a ChatController,
    turn: u64,
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        let mut inner = lock(&self.controller.inner);
        if inner.state == (TurnState::Pending { turn: self.turn }) {
            tracing::info!(name: "session.turn.abandoned", turn = self.turn, "Turn dropped while pending");
            self.controller.cancel_locked(&mut inner);
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: TurnState,
    next_turn: u64,
    transcript: Transcript,
    options: ChatOptions,
}

/// Owns the transcript and serializes turns against the bridge.
///
/// At most one turn is pending at a time. Messages from a turn that was
/// cancelled or reset are discarded, so the transcript never shows output
/// after a cancellation notice.
#[derive(Debug)]
pub struct ChatController {
    bridge: Arc<AgentBridge>,
    inner: Mutex<Inner>,
    updates: broadcast::Sender<TranscriptUpdate>,
}

impl ChatController {
    /// An `executable_path` in `options` replaces the bridge's configured
    /// path; `None` keeps it.
    pub fn new(bridge: Arc<AgentBridge>, options: ChatOptions) -> Self {
        apply_executable_path(&bridge, &options);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            bridge,
            inner: Mutex::new(Inner {
                state: TurnState::Idle,
                next_turn: 1,
                transcript: Transcript::new(),
                options,
            }),
            updates,
        }
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<AgentBridge> {
        &self.bridge
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.updates.subscribe()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).transcript.messages().to_vec()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        lock(&self.inner).transcript.session_id().to_string()
    }

    /// Session id confirmed by the agent, if any.
    #[must_use]
    pub fn confirmed_session(&self) -> Option<String> {
        lock(&self.inner)
            .transcript
            .confirmed_session()
            .map(ToString::to_string)
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        lock(&self.inner).state
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state(), TurnState::Pending { .. })
    }

    #[must_use]
    pub fn options(&self) -> ChatOptions {
        lock(&self.inner).options.clone()
    }

    /// Used from the next turn on.
    pub fn set_model(&self, model: impl Into<String>) {
        lock(&self.inner).options.model = model.into();
    }

    /// Used from the next turn on. A `None` executable path keeps the
    /// bridge's current one.
    pub fn update_options(&self, options: ChatOptions) {
        apply_executable_path(&self.bridge, &options);
        lock(&self.inner).options = options;
    }

    /// Send one turn and wait until it completes or is superseded.
    ///
    /// The user entry is appended and the turn marked pending before the
    /// first suspension point, so a concurrent second call is rejected.
    /// Dropping the returned future cancels the turn as
    /// [`cancel_turn`](Self::cancel_turn) does.
    pub async fn send_turn(&self, text: &str, context: &PromptContext) -> TurnOutcome {
        if text.trim().is_empty() {
            return TurnOutcome::Rejected(RejectReason::Empty);
        }
        let prompt = build_prompt(text, context);

        let (turn, mut invocation) = {
            let mut inner = lock(&self.inner);
            if inner.state != TurnState::Idle {
                return TurnOutcome::Rejected(RejectReason::Busy);
            }
            let turn = inner.next_turn;
            inner.next_turn += 1;
            inner.state = TurnState::Pending { turn };

            let session = inner.transcript.session_id().to_string();
            self.append(&mut inner, Message::user_input(text, session.as_str()));

            if inner.options.debug_context {
                tracing::info!(name: "session.debug_context", turn, original = %text, prompt = %prompt, "Prompt with context");
            }
            tracing::info!(name: "session.turn.start", turn, session = %session, "Sending turn");

            let options = &inner.options;
            let request = InvokeRequest::new(prompt, options.working_directory.clone())
                .resume(inner.transcript.confirmed_session().map(ToString::to_string))
                .fallback_session(session)
                .model(options.model.clone())
                .system_prompt(options.system_prompt.clone())
                .tool_servers(to_agent_servers(&options.tool_servers));
            (turn, self.bridge.invoke(request))
        };
        let _pending = PendingTurn {
            controller: self,
            turn,
        };

        let mut cancelled = false;
        while let Some(message) = invocation.next().await {
            let mut inner = lock(&self.inner);
            if inner.state != (TurnState::Pending { turn }) {
                tracing::debug!(name: "session.turn.discard", turn, "Discarding message from superseded turn");
                break;
            }
            if let Some(id) = message.init_session_id() {
                if inner.transcript.adopt_session(id) {
                    let _ = self.updates.send(TranscriptUpdate::SessionAdopted(id.to_string()));
                }
            }
            cancelled = message.is_cancel_notice();
            self.append(&mut inner, message);
        }

        let mut inner = lock(&self.inner);
        if inner.state != (TurnState::Pending { turn }) {
            return TurnOutcome::Cancelled;
        }
        if let Some(id) = invocation.session_id() {
            if inner.transcript.adopt_session(&id) {
                let _ = self.updates.send(TranscriptUpdate::SessionAdopted(id));
            }
        }
        inner.state = TurnState::Idle;
        tracing::info!(name: "session.turn.finished", turn, cancelled, "Turn finished");
        if cancelled {
            TurnOutcome::Cancelled
        } else {
            TurnOutcome::Completed {
                session_id: inner.transcript.session_id().to_string(),
            }
        }
    }

    /// Cancel the pending turn. Returns `false` when no turn was pending.
    pub fn cancel_turn(&self) -> bool {
        let mut inner = lock(&self.inner);
        self.cancel_locked(&mut inner)
    }

    /// Start a new conversation: cancel any pending turn, then clear the
    /// transcript and session id together.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        self.cancel_locked(&mut inner);
        inner.transcript.clear();
        tracing::info!(name: "session.reset", session = %inner.transcript.session_id(), "Started new conversation");
        let _ = self.updates.send(TranscriptUpdate::Cleared);
    }

    /// Markdown rendering of the current transcript.
    #[must_use]
    pub fn export_markdown(&self) -> String {
        let inner = lock(&self.inner);
        inner.transcript.to_markdown(&inner.options.model, Local::now())
    }

    /// Save the transcript into `dir`. Returns `None` for an empty transcript.
    pub async fn save_conversation(&self, dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let markdown = {
            let inner = lock(&self.inner);
            if inner.transcript.is_empty() {
                return Ok(None);
            }
            inner.transcript.to_markdown(&inner.options.model, Local::now())
        };
        write_export(dir, &markdown, Utc::now()).await.map(Some)
    }

    fn cancel_locked(&self, inner: &mut Inner) -> bool {
        let TurnState::Pending { turn } = inner.state else {
            return false;
        };
        self.bridge.cancel();
        let notice = Message::cancelled(inner.transcript.session_id());
        self.append(inner, notice);
        inner.state = TurnState::Idle;
        tracing::info!(name: "session.turn.cancelled", turn, "Turn cancelled");
        true
    }

    fn append(&self, inner: &mut Inner, message: Message) {
        inner.transcript.push(message.clone());
        let _ = self.updates.send(TranscriptUpdate::Appended(message));
    }
}
