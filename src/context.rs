//! Prompt augmentation with the active file.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;
pub const MIN_CONTENT_LENGTH: usize = 1_000;
pub const MAX_CONTENT_LENGTH: usize = 100_000;

/// What the user is looking at when a turn is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub file_path: Option<String>,
    pub file_content: Option<String>,
    pub selection: Option<String>,
}

impl PromptContext {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub include_file_content: bool,
    /// Prefer the selection over the whole file when one exists.
    pub include_selection: bool,
    pub max_content_length: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_file_content: true,
            include_selection: true,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

impl ContextOptions {
    /// `max_content_length` clamped to its allowed range.
    #[must_use]
    pub fn effective_max_length(&self) -> usize {
        self.max_content_length
            .clamp(MIN_CONTENT_LENGTH, MAX_CONTENT_LENGTH)
    }
}

/// Prefix `text` with the file context. Without a file path the text is
/// returned unchanged.
#[must_use]
pub fn build_prompt(text: &str, ctx: &PromptContext) -> String {
    let Some(path) = &ctx.file_path else {
        return text.to_string();
    };

    let mut parts = vec![format!("Current file: {path}")];
    if let Some(selection) = &ctx.selection {
        parts.push(format!("\nSelected text:\n```\n{selection}\n```"));
    } else if let Some(content) = &ctx.file_content {
        parts.push(format!("\nFile content:\n```\n{content}\n```"));
    }
    format!("{}\n\n{text}", parts.join("\n"))
}

/// Collect the context for `path`.
///
/// A non-blank `selection` replaces the file content when
/// `include_selection` is on. Read failures are logged and leave the content
/// empty.
pub async fn load_file_context(
    path: &Path,
    display_path: impl Into<String>,
    selection: Option<&str>,
    options: &ContextOptions,
) -> PromptContext {
    let mut ctx = PromptContext {
        file_path: Some(display_path.into()),
        ..PromptContext::default()
    };
    if !options.include_file_content {
        return ctx;
    }

    if options.include_selection {
        if let Some(selection) = selection.filter(|s| !s.trim().is_empty()) {
            ctx.selection = Some(selection.to_string());
            return ctx;
        }
    }

    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.is_empty() => {
            ctx.file_content = Some(truncate(&content, options.effective_max_length()));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(name: "context.read_failed", path = %path.display(), error = %e, "Failed to read file content");
        }
    }
    ctx
}

/// Keep the first `max` characters, noting how many were dropped.
#[must_use]
pub fn truncate(content: &str, max: usize) -> String {
    let total = content.chars().count();
    if total <= max {
        return content.to_string();
    }
    let cut = content
        .char_indices()
        .nth(max)
        .map_or(content.len(), |(idx, _)| idx);
    format!(
        "{}\n\n... (truncated, {} characters omitted)",
        &content[..cut],
        total - max
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_file_leaves_text_unchanged() {
        assert_eq!(build_prompt("hello", &PromptContext::none()), "hello");
    }

    #[test]
    fn test_selection_wins_over_content() {
        let ctx = PromptContext {
            file_path: Some("/vault/a.md".into()),
            file_content: Some("whole file".into()),
            selection: Some("picked".into()),
        };
        assert_eq!(
            build_prompt("explain", &ctx),
            "Current file: /vault/a.md\n\nSelected text:\n```\npicked\n```\n\nexplain"
        );
    }

    #[test]
    fn test_content_block() {
        let ctx = PromptContext {
            file_path: Some("a.md".into()),
            file_content: Some("# Title".into()),
            selection: None,
        };
        assert_eq!(
            build_prompt("sum up", &ctx),
            "Current file: a.md\n\nFile content:\n```\n# Title\n```\n\nsum up"
        );
    }

    #[test]
    fn test_path_only() {
        let ctx = PromptContext {
            file_path: Some("a.md".into()),
            ..PromptContext::default()
        };
        assert_eq!(build_prompt("hi", &ctx), "Current file: a.md\n\nhi");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let text = "é".repeat(5);
        assert_eq!(
            truncate(&text, 3),
            "ééé\n\n... (truncated, 2 characters omitted)"
        );
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_max_length_is_clamped() {
        let mut opts = ContextOptions::default();
        opts.max_content_length = 10;
        assert_eq!(opts.effective_max_length(), MIN_CONTENT_LENGTH);
        opts.max_content_length = 1_000_000;
        assert_eq!(opts.effective_max_length(), MAX_CONTENT_LENGTH);
    }

    #[tokio::test]
    async fn test_load_reads_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "x".repeat(1_500)).unwrap();

        let ctx = load_file_context(&path, "note.md", None, &ContextOptions::default()).await;
        assert_eq!(ctx.file_content.as_deref().map(str::len), Some(1_500));

        let opts = ContextOptions {
            max_content_length: 1_000,
            ..ContextOptions::default()
        };
        let ctx = load_file_context(&path, "note.md", Some("  "), &opts).await;
        let content = ctx.file_content.unwrap();
        assert!(content.ends_with("... (truncated, 500 characters omitted)"));
        assert!(ctx.selection.is_none());
    }

    #[tokio::test]
    async fn test_load_prefers_selection_and_respects_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "body").unwrap();

        let ctx = load_file_context(&path, "note.md", Some("sel"), &ContextOptions::default()).await;
        assert_eq!(ctx.selection.as_deref(), Some("sel"));
        assert!(ctx.file_content.is_none());

        let no_selection = ContextOptions {
            include_selection: false,
            ..ContextOptions::default()
        };
        let ctx = load_file_context(&path, "note.md", Some("sel"), &no_selection).await;
        assert_eq!(ctx.file_content.as_deref(), Some("body"));

        let path_only = ContextOptions {
            include_file_content: false,
            ..ContextOptions::default()
        };
        let ctx = load_file_context(&path, "note.md", Some("sel"), &path_only).await;
        assert_eq!(ctx.file_path.as_deref(), Some("note.md"));
        assert!(ctx.file_content.is_none() && ctx.selection.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_yields_no_content() {
        let ctx = load_file_context(
            Path::new("/definitely/missing.md"),
            "missing.md",
            None,
            &ContextOptions::default(),
        )
        .await;
        assert_eq!(ctx.file_path.as_deref(), Some("missing.md"));
        assert!(ctx.file_content.is_none());
    }
}
