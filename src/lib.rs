//! Note Sage
//!
//! A chat front end for the Claude CLI: each turn runs the `claude` process
//! in streaming JSON mode, normalizes its events into a typed transcript and
//! continues the same agent session on the next turn.
//!
//! # Architecture
//!
//! - **Bridge**: spawns the agent process, streams and normalizes its events,
//!   and handles cancellation
//! - **Controller**: serializes turns, owns the transcript and session id
//! - **Tool servers**: MCP server settings handed to the agent, plus the
//!   status it reports back
//!
//! # Modules
//!
//! - [`agent`]: executable lookup, invocation options, transport and bridge
//! - [`events`]: raw event model of the agent's output
//! - [`message`]: normalized transcript messages
//! - [`normalized`]: raw event to message mapping
//! - [`session`]: transcript and turn controller
//! - [`mcp`]: tool-server configuration and status
//! - [`context`]: prompt augmentation with the active file
//! - [`config`]: layered application configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod mcp;
pub mod message;
pub mod normalized;
pub mod session;

use std::sync::Arc;

use crate::agent::{AgentBridge, ClaudeCliTransport, ExecutableLocator};
use crate::config::AppConfig;
use crate::mcp::McpStatusCache;
use crate::session::{ChatController, ChatOptions};

/// Application wiring shared by the binary's front ends.
#[derive(Clone, Debug)]
pub struct App {
    /// Turn controller for the current conversation.
    pub controller: Arc<ChatController>,
    /// Tool-server status reported by the agent.
    pub mcp_status: Arc<McpStatusCache>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl App {
    #[must_use]
    pub fn from_config(config: AppConfig) -> Self {
        let mcp_status = Arc::new(McpStatusCache::new());
        let transport = Arc::new(ClaudeCliTransport::new(config.agent.api_key.clone()));
        let bridge = AgentBridge::new(
            transport,
            ExecutableLocator::new(config.agent.executable_path.clone()),
        )
        .with_idle_timeout(config.idle_timeout())
        .with_mcp_status(Arc::clone(&mcp_status));

        let controller = ChatController::new(Arc::new(bridge), ChatOptions::from(&config));
        Self {
            controller: Arc::new(controller),
            mcp_status,
            config: Arc::new(config),
        }
    }
}
