//! Error taxonomy for the agent bridge.
//!
//! None of these escape [`AgentBridge::invoke`](crate::agent::AgentBridge::invoke):
//! every variant is converted into a terminal notice in the message stream.
//! [`BridgeError::Cancelled`] is the only kind that becomes a cancellation
//! notice instead of an error notice.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while invoking or streaming from the agent process.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid configuration detected before any process starts.
    #[error("{0}")]
    Config(String),

    /// No usable agent executable was found.
    #[error(
        "Claude CLI executable not found (searched {} location(s)). Set agent.executable_path; \
         `which claude` (macOS/Linux) or `where claude` (Windows) prints the install path.",
        searched.len()
    )]
    ExecutableNotFound {
        /// Every path that was probed, in probe order.
        searched: Vec<PathBuf>,
    },

    /// The invocation was cancelled by its owned or a linked token.
    #[error("Message execution cancelled")]
    Cancelled,

    /// Any other failure reported by the agent process or its transport.
    #[error("{0}")]
    Upstream(String),

    /// I/O error while talking to the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether this error means the invocation was cancelled.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable class name, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ExecutableNotFound { .. } => "executable_not_found",
            Self::Cancelled => "cancelled",
            Self::Upstream(_) | Self::Io(_) | Self::Json(_) => "upstream",
        }
    }
}
