use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::error::BridgeError;

/// Transport of a configured tool server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpServerKind {
    #[default]
    Stdio,
    Sse,
    Http,
}

/// A tool server as it is stored in settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    /// Unique name; becomes the key in the agent's server map.
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: McpServerKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// A tool server in the shape the agent process expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// Convert one settings entry into the agent's configuration shape.
///
/// Stdio servers inherit the whole process environment with a widened `PATH`
/// (see [`widen_path`]); the entry's own variables are applied last.
pub fn to_agent_config(entry: &McpServerEntry) -> Result<McpServerConfig, BridgeError> {
    match entry.kind {
        McpServerKind::Stdio => {
            let command = non_blank(entry.command.as_deref()).ok_or_else(|| {
                BridgeError::Config(format!("MCP server '{}' has no command", entry.name))
            })?;
            Ok(McpServerConfig::Stdio {
                command: command.to_string(),
                args: entry.args.clone(),
                env: overlay_env(std::env::vars(), &entry.env),
            })
        }
        McpServerKind::Sse | McpServerKind::Http => {
            let url = non_blank(entry.url.as_deref()).ok_or_else(|| {
                BridgeError::Config(format!("MCP server '{}' has no url", entry.name))
            })?;
            let url = url.to_string();
            let headers = expand_env_map(&entry.headers);
            Ok(if entry.kind == McpServerKind::Sse {
                McpServerConfig::Sse { url, headers }
            } else {
                McpServerConfig::Http { url, headers }
            })
        }
    }
}

/// Convert all enabled entries; invalid entries are skipped with a warning.
pub fn to_agent_servers(entries: &[McpServerEntry]) -> BTreeMap<String, McpServerConfig> {
    entries
        .iter()
        .filter(|e| e.enabled)
        .filter_map(|e| match to_agent_config(e) {
            Ok(cfg) => Some((e.name.clone(), cfg)),
            Err(err) => {
                tracing::warn!(name: "mcp.config.skipped", server = %e.name, error = %err, "Skipping invalid MCP server entry");
                None
            }
        })
        .collect()
}

/// `{"mcpServers": {...}}` document for the agent's `--mcp-config` flag.
pub fn mcp_config_json(servers: &BTreeMap<String, McpServerConfig>) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({ "mcpServers": servers }))
}

/// Build the environment of a stdio server: inherited variables, `PATH`
/// widened with common package-manager directories, then `overrides`
/// (after `${VAR}` expansion).
pub fn overlay_env<I>(inherited: I, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
    let home = dirs::home_dir().unwrap_or_default();
    let current = env.get(PATH_KEY).map(OsString::from);
    env.insert(PATH_KEY.to_string(), widen_path(current.as_deref(), &home));
    env.extend(expand_env_map(overrides));
    env
}

#[cfg(windows)]
const PATH_KEY: &str = "Path";
#[cfg(not(windows))]
const PATH_KEY: &str = "PATH";

/// Directories where package managers commonly install binaries.
#[must_use]
pub fn extra_path_dirs(home: &Path) -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("AppData/Roaming"));
        vec![
            appdata.join("npm"),
            home.join("scoop/shims"),
            home.join(".cargo/bin"),
            home.join(".bun/bin"),
            PathBuf::from("C:\\Program Files\\nodejs"),
        ]
    }
    #[cfg(not(windows))]
    {
        vec![
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/opt/homebrew/sbin"),
            home.join(".local/bin"),
            home.join(".cargo/bin"),
            home.join(".npm-global/bin"),
            home.join(".bun/bin"),
            home.join(".volta/bin"),
            PathBuf::from("/usr/bin"),
            PathBuf::from("/bin"),
        ]
    }
}

/// Append [`extra_path_dirs`] to `current`, skipping directories already
/// present. Existing entries keep their order and precedence.
#[must_use]
pub fn widen_path(current: Option<&std::ffi::OsStr>, home: &Path) -> String {
    let mut dirs: Vec<PathBuf> = current.map(|p| std::env::split_paths(p).collect()).unwrap_or_default();
    for extra in extra_path_dirs(home) {
        if !dirs.contains(&extra) {
            dirs.push(extra);
        }
    }
    std::env::join_paths(&dirs)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| {
            // A directory containing the separator cannot be joined; keep what we had.
            current.map(|c| c.to_string_lossy().into_owned()).unwrap_or_default()
        })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Expand "${VAR}" placeholders from the process environment.
/// Missing variables leave the placeholder unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    if !input.contains("${") {
        return input.to_string();
    }
    let mut out = input.to_string();
    for (k, v) in std::env::vars() {
        let needle = format!("${{{k}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, &v);
        }
    }
    out
}

pub fn expand_env_map(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio(name: &str, command: Option<&str>) -> McpServerEntry {
        McpServerEntry {
            name: name.to_string(),
            kind: McpServerKind::Stdio,
            enabled: true,
            command: command.map(ToString::to_string),
            args: vec!["-y".into(), "@mcpcentral/mcp-time".into()],
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_stdio_inherits_env_and_overrides() {
        let mut entry = stdio("time", Some("npx"));
        entry.env.insert("TZ".into(), "UTC".into());

        let McpServerConfig::Stdio { command, args, env } = to_agent_config(&entry).unwrap() else {
            panic!("expected stdio config");
        };
        assert_eq!(command, "npx");
        assert_eq!(args.len(), 2);
        assert_eq!(env.get("TZ").map(String::as_str), Some("UTC"));
        assert!(env.contains_key(PATH_KEY));
    }

    #[test]
    fn test_overlay_preserves_inherited_and_widens_path() {
        let inherited = vec![
            ("HOME".to_string(), "/home/u".to_string()),
            (PATH_KEY.to_string(), "/custom/bin".to_string()),
        ];
        let mut overrides = BTreeMap::new();
        overrides.insert("API_TOKEN".to_string(), "t".to_string());

        let env = overlay_env(inherited, &overrides);
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/u"));
        assert_eq!(env.get("API_TOKEN").map(String::as_str), Some("t"));
        let path = env.get(PATH_KEY).unwrap();
        assert!(path.starts_with("/custom/bin"));
        assert!(path.len() > "/custom/bin".len());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_widen_path_does_not_duplicate() {
        let home = PathBuf::from("/home/u");
        let widened = widen_path(Some(std::ffi::OsStr::new("/usr/local/bin:/x")), &home);
        let parts: Vec<_> = widened.split(':').collect();
        assert_eq!(parts[0], "/usr/local/bin");
        assert_eq!(parts[1], "/x");
        assert_eq!(parts.iter().filter(|p| **p == "/usr/local/bin").count(), 1);
        assert!(parts.contains(&"/home/u/.local/bin"));
    }

    #[test]
    fn test_missing_command_or_url_is_config_error() {
        assert!(matches!(
            to_agent_config(&stdio("broken", Some("  "))),
            Err(BridgeError::Config(_))
        ));
        let entry = McpServerEntry {
            kind: McpServerKind::Sse,
            ..stdio("remote", None)
        };
        assert!(matches!(to_agent_config(&entry), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_to_agent_servers_filters_disabled_and_invalid() {
        let mut disabled = stdio("off", Some("npx"));
        disabled.enabled = false;
        let remote = McpServerEntry {
            kind: McpServerKind::Http,
            url: Some("https://mcp.example.com/mcp".into()),
            ..stdio("remote", None)
        };
        let servers = to_agent_servers(&[disabled, stdio("broken", None), remote]);
        assert_eq!(servers.len(), 1);
        assert!(matches!(servers.get("remote"), Some(McpServerConfig::Http { .. })));
    }

    #[test]
    fn test_config_json_shape() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "docs".to_string(),
            McpServerConfig::Sse {
                url: "https://example.com/sse".into(),
                headers: BTreeMap::new(),
            },
        );
        let json: serde_json::Value = serde_json::from_str(&mcp_config_json(&servers).unwrap()).unwrap();
        assert_eq!(json["mcpServers"]["docs"]["type"], "sse");
        assert_eq!(json["mcpServers"]["docs"]["url"], "https://example.com/sse");
    }

    #[test]
    fn test_entry_deserializes_with_defaults() {
        let entry: McpServerEntry =
            serde_json::from_str(r#"{"name":"time","command":"uvx","args":["mcp-server-time"]}"#)
                .unwrap();
        assert_eq!(entry.kind, McpServerKind::Stdio);
        assert!(entry.enabled);
    }

    #[test]
    fn test_placeholder_without_var_is_untouched() {
        assert_eq!(
            expand_env_placeholders("${NOTE_SAGE_SURELY_UNSET_VAR}"),
            "${NOTE_SAGE_SURELY_UNSET_VAR}"
        );
        assert_eq!(expand_env_placeholders("plain"), "plain");
    }
}
