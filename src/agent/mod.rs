//! Process bridge to the Claude CLI.
//!
//! - [`locate`]: find the executable
//! - [`options`]: pure invocation configuration
//! - [`transport`]: spawn the process and stream its raw events
//! - [`bridge`]: normalization, session tracking and cancellation

pub mod bridge;
pub mod locate;
pub mod options;
pub mod transport;

pub use bridge::{AgentBridge, InvokeRequest, Invocation};
pub use locate::ExecutableLocator;
pub use options::{DEFAULT_MODEL, PermissionMode, QueryOptions};
pub use transport::{AgentTransport, ClaudeCliTransport, EventStream};
