//! Connection status of configured tool servers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::RawMcpServerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McpConnectionState {
    Connected,
    Failed,
    Pending,
    NeedsAuth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerStatus {
    pub name: String,
    pub state: McpConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl McpServerStatus {
    #[must_use]
    pub fn new(name: impl Into<String>, state: McpConnectionState) -> Self {
        Self {
            name: name.into(),
            state,
            error: None,
            server_name: None,
            server_version: None,
            updated_at: Utc::now(),
        }
    }

    /// Translate the agent's report. Unknown status strings become
    /// [`McpConnectionState::Failed`] with the raw value as the error.
    #[must_use]
    pub fn from_agent(raw: &RawMcpServerStatus) -> Self {
        let (state, error) = match raw.status.as_str() {
            "connected" => (McpConnectionState::Connected, None),
            "pending" => (McpConnectionState::Pending, None),
            "needs-auth" | "needs_auth" => (McpConnectionState::NeedsAuth, None),
            "failed" => (McpConnectionState::Failed, None),
            other => (McpConnectionState::Failed, Some(other.to_string())),
        };
        Self {
            error,
            server_name: raw.server_info.as_ref().and_then(|i| i.name.clone()),
            server_version: raw.server_info.as_ref().and_then(|i| i.version.clone()),
            ..Self::new(raw.name.clone(), state)
        }
    }
}

/// Last reported status per server, observable through [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct McpStatusCache {
    tx: watch::Sender<BTreeMap<String, McpServerStatus>>,
}

impl Default for McpStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl McpStatusCache {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BTreeMap::new());
        Self { tx }
    }

    #[must_use]
    pub fn status(&self, name: &str) -> Option<McpServerStatus> {
        self.tx.borrow().get(name).cloned()
    }

    /// All statuses, ordered by server name.
    #[must_use]
    pub fn statuses(&self) -> Vec<McpServerStatus> {
        self.tx.borrow().values().cloned().collect()
    }

    pub fn update_status(&self, status: McpServerStatus) {
        self.tx.send_modify(|map| {
            map.insert(status.name.clone(), status);
        });
    }

    pub fn update_statuses(&self, statuses: impl IntoIterator<Item = McpServerStatus>) {
        let statuses: Vec<_> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return;
        }
        self.tx.send_modify(|map| {
            for status in statuses {
                map.insert(status.name.clone(), status);
            }
        });
    }

    /// Replace the whole cache with the list an `init` event reported.
    pub fn refresh_from_agent(&self, reported: &[RawMcpServerStatus]) {
        let fresh: BTreeMap<_, _> = reported
            .iter()
            .map(|raw| (raw.name.clone(), McpServerStatus::from_agent(raw)))
            .collect();
        tracing::debug!(name: "mcp.status.refresh", servers = fresh.len(), "Refreshed tool-server status");
        self.tx.send_replace(fresh);
    }

    pub fn clear(&self) {
        self.tx.send_replace(BTreeMap::new());
    }

    /// Receiver of the full status map; dropping it unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BTreeMap<String, McpServerStatus>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerInfo;

    fn raw(name: &str, status: &str) -> RawMcpServerStatus {
        RawMcpServerStatus {
            name: name.to_string(),
            status: status.to_string(),
            server_info: None,
        }
    }

    #[test]
    fn test_unknown_status_maps_to_failed() {
        let status = McpServerStatus::from_agent(&raw("docs", "exploded"));
        assert_eq!(status.state, McpConnectionState::Failed);
        assert_eq!(status.error.as_deref(), Some("exploded"));
    }

    #[test]
    fn test_refresh_replaces_previous_entries() {
        let cache = McpStatusCache::new();
        cache.update_status(McpServerStatus::new("stale", McpConnectionState::Pending));

        let mut time = raw("time", "connected");
        time.server_info = Some(ServerInfo {
            name: Some("mcp-time".into()),
            version: Some("1.0.0".into()),
        });
        cache.refresh_from_agent(&[time, raw("gh", "needs-auth")]);

        assert!(cache.status("stale").is_none());
        let time = cache.status("time").unwrap();
        assert_eq!(time.state, McpConnectionState::Connected);
        assert_eq!(time.server_version.as_deref(), Some("1.0.0"));
        assert_eq!(cache.status("gh").unwrap().state, McpConnectionState::NeedsAuth);
        assert_eq!(cache.statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let cache = McpStatusCache::new();
        let mut rx = cache.subscribe();

        cache.update_statuses([McpServerStatus::new("a", McpConnectionState::Connected)]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        cache.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(McpConnectionState::NeedsAuth).unwrap(),
            "needs-auth"
        );
    }
}
