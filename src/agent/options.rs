//! Invocation configuration for the agent process.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::mcp::config::McpServerConfig;

/// Model used when the request does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Permission mode passed to the agent.
///
/// The bridge always runs the agent with permission prompts bypassed; the
/// host's own sandbox is the trust boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    BypassPermissions,
}

impl PermissionMode {
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Everything the transport needs to start one agent process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOptions {
    pub model: String,
    pub cwd: PathBuf,
    pub permission_mode: PermissionMode,
    pub executable: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// Inputs to [`build_query_options`], borrowed from an invoke request.
#[derive(Debug, Clone, Copy)]
pub struct QueryInputs<'a> {
    pub working_directory: &'a str,
    pub session_id: Option<&'a str>,
    pub model: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub tool_servers: &'a BTreeMap<String, McpServerConfig>,
}

/// Build the invocation configuration. Pure: no I/O, no environment access.
#[must_use]
pub fn build_query_options(inputs: QueryInputs<'_>, executable: PathBuf) -> QueryOptions {
    let model = inputs
        .model
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string();

    QueryOptions {
        model,
        cwd: PathBuf::from(inputs.working_directory),
        permission_mode: PermissionMode::BypassPermissions,
        executable,
        resume: inputs
            .session_id
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
        system_prompt: inputs
            .system_prompt
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
        mcp_servers: inputs.tool_servers.clone(),
    }
}
