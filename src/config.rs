use crate::agent::DEFAULT_MODEL;
use crate::context::{ContextOptions, DEFAULT_MAX_CONTENT_LENGTH};
use crate::mcp::config::McpServerEntry;
use crate::session::ChatOptions;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Models offered by the `/model` command.
pub const AVAILABLE_MODELS: &[&str] = &["claude-opus-4-5", "claude-sonnet-4-5", "claude-haiku-4-5"];

/// Config file picked up from the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "note-sage.yaml";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Chat with the Claude CLI about your notes", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "NOTE_SAGE_CONFIG")]
    pub config: Option<String>,

    /// Model to use
    #[arg(short, long, env = "NOTE_SAGE_MODEL")]
    pub model: Option<String>,

    /// Path to the claude executable
    #[arg(long, env = "CLAUDE_EXECUTABLE")]
    pub executable: Option<PathBuf>,

    /// Directory the agent runs in (defaults to the current directory)
    #[arg(short = 'C', long)]
    pub working_directory: Option<String>,

    /// Extra system prompt
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// File to attach as context
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Selected text within --file
    #[arg(long, requires = "file")]
    pub selection: Option<String>,

    /// Send one prompt and exit
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Save the conversation after every turn
    #[arg(long)]
    pub auto_save: Option<bool>,

    /// Log every prompt with its context
    #[arg(long)]
    pub debug_context: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long, env = "NOTE_SAGE_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Load `env_file` (or `.env` from the current directory when `None`),
    /// then parse `args`, so the file's values reach the env fallbacks above.
    /// Variables already set in the process win; a missing file is ignored.
    pub fn parse_with_env_file<I, T>(env_file: Option<&Path>, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match env_file {
            Some(path) => {
                let _ = dotenvy::from_path(path);
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }
        Self::try_parse_from(args)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub context: ContextOptions,
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub debug_context: bool,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub model: String,
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Exported to the agent process only.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Off when absent or zero.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    pub auto_save: bool,
    /// Relative paths are resolved against the working directory.
    pub save_path: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layer defaults, the config file, `NOTE_SAGE__*` variables and `cli`.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("agent.model", DEFAULT_MODEL)?
            .set_default("context.include_file_content", true)?
            .set_default("context.include_selection", true)?
            .set_default("context.max_content_length", DEFAULT_MAX_CONTENT_LENGTH as u64)?
            .set_default("conversation.auto_save", false)?
            .set_default("conversation.save_path", "AI-Chats")?
            .set_default("debug_context", false)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(Path::new(path)).required(true)),
            None => builder.add_source(File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false)),
        };

        // NOTE_SAGE__AGENT__MODEL=claude-opus-4-5
        builder = builder.add_source(
            Environment::with_prefix("NOTE_SAGE")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(model) = &cli.model {
            builder = builder.set_override("agent.model", model.as_str())?;
        }
        if let Some(exe) = &cli.executable {
            builder = builder.set_override("agent.executable_path", exe.display().to_string())?;
        }
        if let Some(dir) = &cli.working_directory {
            builder = builder.set_override("agent.working_directory", dir.as_str())?;
        }
        if let Some(prompt) = &cli.system_prompt {
            builder = builder.set_override("agent.system_prompt", prompt.as_str())?;
        }
        if let Some(auto_save) = cli.auto_save {
            builder = builder.set_override("conversation.auto_save", auto_save)?;
        }
        if let Some(debug) = cli.debug_context {
            builder = builder.set_override("debug_context", debug)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Configured working directory, else the process's current directory.
    #[must_use]
    pub fn working_directory(&self) -> String {
        self.agent
            .working_directory
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .map(|d| d.display().to_string())
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.agent
            .idle_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    /// Directory conversations are saved to.
    #[must_use]
    pub fn save_dir(&self) -> PathBuf {
        let path = &self.conversation.save_path;
        if path.is_absolute() {
            path.clone()
        } else {
            Path::new(&self.working_directory()).join(path)
        }
    }
}

impl From<&AppConfig> for ChatOptions {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.agent.model.clone(),
            working_directory: cfg.working_directory(),
            system_prompt: cfg.agent.system_prompt.clone(),
            executable_path: cfg.agent.executable_path.clone(),
            tool_servers: cfg.mcp_servers.clone(),
            debug_context: cfg.debug_context,
        }
    }
}

/// Whether `model` is one of [`AVAILABLE_MODELS`].
#[must_use]
pub fn is_known_model(model: &str) -> bool {
    AVAILABLE_MODELS.contains(&model)
}
