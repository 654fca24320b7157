//! Tool-server (Model Context Protocol) configuration and status.
//!
//! Tool servers are not spoken to directly: their configuration is handed to
//! the agent process, which connects to them and reports back their state in
//! its `init` event.
//!
//! # Configuration
//!
//! Servers are listed under `mcp_servers` in the settings file:
//!
//! ```yaml
//! mcp_servers:
//!   - name: time
//!     command: npx
//!     args: ["-y", "@mcpcentral/mcp-time"]
//!   - name: tavily
//!     type: http
//!     url: https://mcp.tavily.com/mcp/
//!     headers:
//!       Authorization: "Bearer ${TAVILY_API_KEY}"
//! ```

pub mod config;
pub mod status;

pub use config::{McpServerConfig, McpServerEntry, McpServerKind, to_agent_config, to_agent_servers};
pub use status::{McpConnectionState, McpServerStatus, McpStatusCache};
