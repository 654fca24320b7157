//! Raw events printed by the agent process.
//!
//! The agent CLI writes one JSON object per line when run with
//! `--output-format stream-json`. Each object carries a `type` discriminator;
//! this module models the ones the bridge understands as a closed sum type and
//! folds everything else into [`RawEvent::Unknown`] so that new upstream event
//! kinds never make a stream fail.
//!
//! Payload fields are optional on purpose: a missing field is a policy
//! decision for the normalizer, not a parse error.
//!
//! ```rust
//! use note_sage::events::RawEvent;
//!
//! let line = r#"{"type":"system","subtype":"init","session_id":"abc"}"#;
//! let event: RawEvent = serde_json::from_str(line).unwrap();
//! assert_eq!(event.session_id(), Some("abc"));
//! ```

use serde::{Deserialize, Serialize};

use crate::message::{ContentBlock, Usage};

/// One event from the agent's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// Lifecycle chatter; only `init` reaches the transcript.
    System(SystemEvent),
    /// Tool-result echo produced by the process.
    User(TurnEvent),
    /// Assistant output.
    Assistant(TurnEvent),
    /// Terminal summary of one request/response cycle.
    Result(ResultEvent),
    /// Any discriminator this crate does not know.
    #[serde(other)]
    Unknown,
}

impl RawEvent {
    /// Session id carried by the event, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            Self::System(e) => e.session_id.as_deref(),
            Self::User(e) | Self::Assistant(e) => e.session_id.as_deref(),
            Self::Result(e) => e.session_id.as_deref(),
            Self::Unknown => None,
        };
        id.filter(|s| !s.is_empty())
    }

    /// Discriminator name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::Result(_) => "result",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this is a `system` event with subtype `init`.
    #[must_use]
    pub fn is_init(&self) -> bool {
        matches!(self, Self::System(e) if e.subtype.as_deref() == Some("init"))
    }
}

/// Payload of a `system` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Tool-server connection states reported at `init`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<RawMcpServerStatus>,
}

/// Tool-server state as the agent reports it.
///
/// Every field is lenient: a partial entry must not cost the whole `init`
/// line, which carries the session id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMcpServerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

/// Name and version a tool server announced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Payload of a `user` or `assistant` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TurnEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<RawTurnMessage>,
}

/// The `message` object inside a turn event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawTurnMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "content_or_text")]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Payload of a `result` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_api_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Accept either a block array or a bare string for `content`.
///
/// User echoes sometimes carry the prompt as a plain string.
fn content_or_text<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Blocks(Vec<ContentBlock>),
        Text(String),
        Null(()),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Blocks(blocks) => blocks,
        Content::Text(text) => vec![ContentBlock::Text { text }],
        Content::Null(()) => Vec::new(),
    })
}
