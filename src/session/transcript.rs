//! Ordered conversation log and its markdown export.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::message::{ContentBlock, Message, MessageBody, provisional_session_id};

/// Append-only list of messages plus the conversation's session id.
///
/// Until the agent confirms a session, a provisional id is used; adopting the
/// confirmed id rewrites every entry that carried the provisional one.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    session_id: String,
    confirmed: bool,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            session_id: provisional_session_id(),
            confirmed: false,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current session id, provisional or confirmed.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session id reported by the agent, if any.
    #[must_use]
    pub fn confirmed_session(&self) -> Option<&str> {
        self.confirmed.then_some(self.session_id.as_str())
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Adopt an agent-reported session id. Returns `false` when it is
    /// already current.
    pub fn adopt_session(&mut self, id: &str) -> bool {
        if id.is_empty() || (self.confirmed && self.session_id == id) {
            return false;
        }
        if !self.confirmed {
            let provisional = std::mem::take(&mut self.session_id);
            for message in &mut self.messages {
                if message.session_id == provisional {
                    message.session_id = id.to_string();
                }
            }
        }
        self.session_id = id.to_string();
        self.confirmed = true;
        true
    }

    /// Drop all entries and start over with a fresh provisional id.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Render as markdown with a YAML frontmatter block.
    #[must_use]
    pub fn to_markdown(&self, model: &str, now: DateTime<Local>) -> String {
        let mut lines: Vec<String> = vec![
            "---".into(),
            format!("date: {}", now.format("%Y-%m-%d")),
            format!("time: {}", now.format("%H:%M:%S")),
            format!("model: {}", if model.is_empty() { "unknown" } else { model }),
        ];
        if let Some(session) = self.confirmed_session() {
            lines.push(format!("session_id: {session}"));
        }
        lines.push("---".into());
        lines.push(String::new());
        lines.push(format!("# AI Chat - {}", now.format("%Y-%m-%d %H:%M:%S")));
        lines.push(String::new());

        for message in &self.messages {
            match &message.body {
                MessageBody::UserTurn {
                    message,
                    is_direct_input: true,
                } => {
                    lines.push("## User".into());
                    lines.extend(message.content.iter().filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    }));
                    lines.push(String::new());
                }
                MessageBody::AgentTurn { message } => {
                    lines.push("## Assistant".into());
                    lines.extend(message.content.iter().filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.clone()),
                        ContentBlock::ToolUse { name, .. } => Some(format!("> Using tool: {name}")),
                        _ => None,
                    }));
                    lines.push(String::new());
                }
                MessageBody::FinalResult(result) => {
                    let Some(text) = result.text.as_deref().filter(|t| !t.is_empty()) else {
                        continue;
                    };
                    lines.push("## Result".into());
                    lines.push(text.to_string());
                    lines.push(String::new());
                    if let Some(ms) = result.duration_ms.filter(|ms| *ms > 0) {
                        lines.push(format!("*Duration: {:.2}s*", ms as f64 / 1000.0));
                    }
                    lines.push(String::new());
                }
                _ => {}
            }
        }

        lines.join("\n")
    }
}

/// File name for a conversation saved at `at`.
#[must_use]
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("chat-{}.md", at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Write `markdown` into `dir`, creating it when missing.
pub async fn write_export(dir: &Path, markdown: &str, at: DateTime<Utc>) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_file_name(at));
    tokio::fs::write(&path, markdown).await?;
    tracing::info!(name: "session.saved", path = %path.display(), "Conversation saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FinalResult, ResultKind, Role, TurnContent};
    use chrono::TimeZone;

    fn assistant(session: &str, content: Vec<ContentBlock>) -> Message {
        Message::new(
            "assistant",
            session,
            MessageBody::AgentTurn {
                message: TurnContent {
                    id: "m1".into(),
                    role: Role::Assistant,
                    content,
                    ..TurnContent::default()
                },
            },
        )
    }

    fn result(session: &str, text: Option<&str>, duration_ms: Option<u64>) -> Message {
        Message::new(
            "result",
            session,
            MessageBody::FinalResult(FinalResult {
                subtype: ResultKind::Success,
                text: text.map(ToString::to_string),
                duration_ms,
                ..FinalResult::default()
            }),
        )
    }

    #[test]
    fn test_adopt_backfills_provisional_entries() {
        let mut transcript = Transcript::new();
        let provisional = transcript.session_id().to_string();
        assert!(provisional.starts_with("session-"));
        transcript.push(Message::user_input("hi", &provisional));

        assert!(transcript.adopt_session("S1"));
        assert_eq!(transcript.messages()[0].session_id, "S1");
        assert_eq!(transcript.confirmed_session(), Some("S1"));
        assert!(!transcript.adopt_session("S1"));
    }

    #[test]
    fn test_adopt_after_confirmation_keeps_history() {
        let mut transcript = Transcript::new();
        transcript.adopt_session("S1");
        transcript.push(Message::user_input("hi", "S1"));
        assert!(transcript.adopt_session("S2"));
        assert_eq!(transcript.messages()[0].session_id, "S1");
        assert_eq!(transcript.session_id(), "S2");
    }

    #[test]
    fn test_clear_starts_fresh() {
        let mut transcript = Transcript::new();
        transcript.adopt_session("S1");
        transcript.push(Message::user_input("hi", "S1"));
        transcript.clear();
        assert!(transcript.is_empty());
        assert!(transcript.confirmed_session().is_none());
        assert_ne!(transcript.session_id(), "S1");
    }

    #[test]
    fn test_markdown_layout() {
        let mut transcript = Transcript::new();
        transcript.adopt_session("S1");
        transcript.push(Message::user_input("What is in a.md?", "S1"));
        transcript.push(assistant(
            "S1",
            vec![
                ContentBlock::Text {
                    text: "Let me look.".into(),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "Read".into(),
                    input: serde_json::json!({}),
                },
            ],
        ));
        transcript.push(result("S1", Some("A title."), Some(1234)));
        transcript.push(result("S1", None, Some(10)));
        transcript.push(Message::cancelled("S1"));

        let now = Local.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).unwrap();
        let md = transcript.to_markdown("claude-sonnet-4-5", now);
        let expected = "---\n\
date: 2026-03-01\n\
time: 09:05:07\n\
model: claude-sonnet-4-5\n\
session_id: S1\n\
---\n\
\n\
# AI Chat - 2026-03-01 09:05:07\n\
\n\
## User\n\
What is in a.md?\n\
\n\
## Assistant\n\
Let me look.\n\
> Using tool: Read\n\
\n\
## Result\n\
A title.\n\
\n\
*Duration: 1.23s*\n";
        assert_eq!(md, expected);
    }

    #[test]
    fn test_markdown_hides_provisional_session_and_echoes() {
        let mut transcript = Transcript::new();
        let session = transcript.session_id().to_string();
        transcript.push(Message::new(
            "user",
            &session,
            MessageBody::UserTurn {
                message: TurnContent::default(),
                is_direct_input: false,
            },
        ));
        let md = transcript.to_markdown("", Local::now());
        assert!(!md.contains("session_id:"));
        assert!(md.contains("model: unknown"));
        assert!(!md.contains("## User"));
    }

    #[test]
    fn test_export_file_name() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(export_file_name(at), "chat-2026-01-02T03-04-05.md");
    }

    #[tokio::test]
    async fn test_write_export_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("AI-Chats");
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let path = write_export(&target, "# hi", at).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# hi");
    }
}
