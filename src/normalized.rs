//! Normalization of raw agent events into transcript messages.
//!
//! [`normalize`] is a pure mapping from one [`RawEvent`] to zero or one
//! [`Message`]. It decides which upstream chatter reaches the transcript:
//!
//! - `system` events: only subtype `init` is kept
//! - `assistant`/`user` events: dropped when the `message` payload is missing
//! - `result` events: always kept; any subtype other than `error` is `success`
//! - unknown discriminators: dropped
//!
//! # Example
//!
//! ```rust
//! use note_sage::events::RawEvent;
//! use note_sage::normalized::normalize;
//!
//! let event: RawEvent =
//!     serde_json::from_str(r#"{"type":"system","subtype":"init","session_id":"abc"}"#).unwrap();
//! let message = normalize(&event, "session-fallback").unwrap();
//! assert_eq!(message.init_session_id(), Some("abc"));
//! ```

use crate::events::{RawEvent, RawTurnMessage, ResultEvent, SystemEvent};
use crate::message::{
    FinalResult, Message, MessageBody, NoticeKind, ResultKind, Role, TurnContent, generate_id,
};

/// Map a raw event to a transcript message.
///
/// The message's session id is the event's own when it carries a non-empty
/// one, otherwise `fallback_session`.
#[must_use]
pub fn normalize(event: &RawEvent, fallback_session: &str) -> Option<Message> {
    let session_id = event.session_id().unwrap_or(fallback_session);

    let body = match event {
        RawEvent::System(system) => system_body(system)?,
        RawEvent::Assistant(turn) => {
            let Some(raw) = &turn.message else {
                tracing::debug!(name: "normalize.drop", kind = "assistant", "Dropping assistant event without message payload");
                return None;
            };
            MessageBody::AgentTurn {
                message: turn_content(raw, Role::Assistant),
            }
        }
        RawEvent::User(turn) => {
            let Some(raw) = &turn.message else {
                tracing::debug!(name: "normalize.drop", kind = "user", "Dropping user event without message payload");
                return None;
            };
            MessageBody::UserTurn {
                message: turn_content(raw, Role::User),
                is_direct_input: false,
            }
        }
        RawEvent::Result(result) => MessageBody::FinalResult(final_result(result)),
        RawEvent::Unknown => {
            tracing::debug!(name: "normalize.drop", kind = "unknown", "Ignoring unknown event type");
            return None;
        }
    };

    Some(Message::new(event.kind(), session_id, body))
}

fn system_body(system: &SystemEvent) -> Option<MessageBody> {
    if system.subtype.as_deref() == Some("init") {
        Some(MessageBody::SystemNotice {
            subtype: NoticeKind::Init,
            text: None,
        })
    } else {
        None
    }
}

fn turn_content(raw: &RawTurnMessage, role: Role) -> TurnContent {
    TurnContent {
        id: raw.id.clone().unwrap_or_else(|| generate_id("msg")),
        role,
        content: raw.content.clone(),
        model: raw.model.clone(),
        usage: raw.usage.clone(),
    }
}

fn final_result(result: &ResultEvent) -> FinalResult {
    let subtype = if result.subtype.as_deref() == Some("error") {
        ResultKind::Error
    } else {
        ResultKind::Success
    };

    FinalResult {
        subtype,
        text: result.result.clone(),
        duration_ms: result.duration_ms,
        api_duration_ms: result.duration_api_ms,
        turn_count: result.num_turns,
        cost_usd: result.total_cost_usd,
        is_error: result.is_error.unwrap_or(false),
    }
}
