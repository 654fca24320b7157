//! Internal message model.
//!
//! Every transcript entry is a [`Message`]: a common envelope (id, session id,
//! creation time) around exactly one [`MessageBody`] variant. Messages are
//! created by the [normalizer](crate::normalized) from upstream events, or by
//! the constructors here for locally authored entries (direct user input,
//! error and cancellation notices).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text of the notice appended when a turn is cancelled.
pub const CANCELLED_TEXT: &str = "Message execution cancelled";

/// Prefix applied to every error notice.
const ERROR_PREFIX: &str = "Error: ";

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique message id: `<prefix>-<unix-millis>-<sequence>`.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let seq = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{seq}", Utc::now().timestamp_millis())
}

/// Generate a provisional session id for a conversation that has not been
/// confirmed by the agent yet.
#[must_use]
pub fn provisional_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

/// A transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// The four message variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Lifecycle and diagnostic notices.
    SystemNotice {
        subtype: NoticeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Human input, or a tool-result echo from the process.
    UserTurn {
        message: TurnContent,
        is_direct_input: bool,
    },
    /// Assistant output.
    AgentTurn { message: TurnContent },
    /// Terminal summary of one request/response cycle.
    FinalResult(FinalResult),
}

/// Subtype of a [`MessageBody::SystemNotice`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Init,
    Success,
    Error,
    Cancelled,
}

/// Content of a user or agent turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TurnContent {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TurnContent {
    /// Concatenated text of all text blocks, newline separated.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Author of a turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

/// Token accounting reported with an assistant turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

/// A block inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// A tool invocation requested by the assistant.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// The outcome of an earlier `ToolUse`, referenced by `tool_use_id`.
    ToolResult {
        tool_use_id: String,
        /// String or array of blocks, passed through as sent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
    },
    /// A block kind this crate does not model.
    #[serde(other)]
    Other,
}

/// Outcome of a `result` event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    #[default]
    Success,
    Error,
}

/// Body of a [`MessageBody::FinalResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinalResult {
    pub subtype: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub is_error: bool,
}

impl Message {
    /// Wrap a body in a fresh envelope.
    #[must_use]
    pub fn new(prefix: &str, session_id: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: generate_id(prefix),
            session_id: session_id.into(),
            created_at: Utc::now(),
            body,
        }
    }

    /// The human's typed input.
    #[must_use]
    pub fn user_input(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(
            "user",
            session_id,
            MessageBody::UserTurn {
                message: TurnContent {
                    id: generate_id("msg"),
                    role: Role::User,
                    content: vec![ContentBlock::Text { text: text.into() }],
                    model: None,
                    usage: None,
                },
                is_direct_input: true,
            },
        )
    }

    /// An error notice; the text is prefixed with `Error: `.
    #[must_use]
    pub fn error(error: impl std::fmt::Display, session_id: impl Into<String>) -> Self {
        Self::new(
            "error",
            session_id,
            MessageBody::SystemNotice {
                subtype: NoticeKind::Error,
                text: Some(format!("{ERROR_PREFIX}{error}")),
            },
        )
    }

    /// A cancellation notice.
    #[must_use]
    pub fn cancelled(session_id: impl Into<String>) -> Self {
        Self::new(
            "cancel",
            session_id,
            MessageBody::SystemNotice {
                subtype: NoticeKind::Cancelled,
                text: Some(CANCELLED_TEXT.to_string()),
            },
        )
    }

    /// Session id announced by an `init` notice.
    #[must_use]
    pub fn init_session_id(&self) -> Option<&str> {
        match self.body {
            MessageBody::SystemNotice {
                subtype: NoticeKind::Init,
                ..
            } => Some(self.session_id.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error_notice(&self) -> bool {
        matches!(
            self.body,
            MessageBody::SystemNotice {
                subtype: NoticeKind::Error,
                ..
            }
        )
    }

    #[must_use]
    pub fn is_cancel_notice(&self) -> bool {
        matches!(
            self.body,
            MessageBody::SystemNotice {
                subtype: NoticeKind::Cancelled,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_prefixed() {
        let a = generate_id("msg");
        let b = generate_id("msg");
        assert_ne!(a, b);
        assert!(a.starts_with("msg-"));
    }

    #[test]
    fn test_error_notice_text() {
        let msg = Message::error("boom", "s1");
        assert!(msg.is_error_notice());
        let MessageBody::SystemNotice { text, .. } = &msg.body else {
            panic!("expected notice");
        };
        assert_eq!(text.as_deref(), Some("Error: boom"));
    }

    #[test]
    fn test_user_input_is_direct() {
        let msg = Message::user_input("hello", "s1");
        match &msg.body {
            MessageBody::UserTurn {
                message,
                is_direct_input,
            } => {
                assert!(*is_direct_input);
                assert_eq!(message.text(), "hello");
            }
            other => panic!("unexpected body: {other:?}"),
        }
        assert!(!msg.is_cancel_notice());
    }

    #[test]
    fn test_cancel_notice_is_not_error() {
        let msg = Message::cancelled("s1");
        assert!(msg.is_cancel_notice());
        assert!(!msg.is_error_notice());
    }

    #[test]
    fn test_serialized_shape_is_tagged() {
        let msg = Message::cancelled("s1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system_notice");
        assert_eq!(json["subtype"], "cancelled");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn test_unknown_block_kind_is_other() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"server_tool_use","id":"x"}"#).unwrap();
        assert_eq!(block, ContentBlock::Other);
    }
}
