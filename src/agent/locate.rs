//! Agent executable resolution.

use std::path::{Path, PathBuf};

use crate::error::BridgeError;

/// Resolves the agent executable: an explicitly configured path first, then a
/// fixed per-platform probe list. The first usable candidate wins.
#[derive(Debug, Clone, Default)]
pub struct ExecutableLocator {
    configured: Option<PathBuf>,
    candidates: Vec<PathBuf>,
}

impl ExecutableLocator {
    /// Locator using the platform's common install locations.
    #[must_use]
    pub fn new(configured: Option<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Self {
            configured: configured.filter(|p| !p.as_os_str().is_empty()),
            candidates: default_candidates(&home),
        }
    }

    /// Locator with an explicit probe list.
    #[must_use]
    pub fn with_candidates(configured: Option<PathBuf>, candidates: Vec<PathBuf>) -> Self {
        Self {
            configured: configured.filter(|p| !p.as_os_str().is_empty()),
            candidates,
        }
    }

    /// Replace the configured path.
    pub fn set_configured(&mut self, configured: Option<PathBuf>) {
        self.configured = configured.filter(|p| !p.as_os_str().is_empty());
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Find the executable.
    ///
    /// A configured path that is missing or not executable is logged and the
    /// probe list is tried instead.
    pub async fn resolve(&self) -> Result<PathBuf, BridgeError> {
        let mut searched = Vec::with_capacity(self.candidates.len() + 1);

        if let Some(configured) = &self.configured {
            if is_executable(configured).await {
                return Ok(configured.clone());
            }
            tracing::warn!(
                name: "agent.locate.configured_unusable",
                path = %configured.display(),
                "Configured agent path not found or not executable"
            );
            searched.push(configured.clone());
        }

        for candidate in &self.candidates {
            if is_executable(candidate).await {
                tracing::info!(
                    name: "agent.locate.found",
                    path = %candidate.display(),
                    "Found agent executable"
                );
                return Ok(candidate.clone());
            }
            searched.push(candidate.clone());
        }

        tracing::warn!(
            name: "agent.locate.not_found",
            searched = searched.len(),
            "Could not find agent executable in common paths"
        );
        Err(BridgeError::ExecutableNotFound { searched })
    }
}

/// Common install locations of the `claude` CLI, in probe order.
#[must_use]
pub fn default_candidates(home: &Path) -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        vec![
            home.join("AppData/Local/Programs/claude/claude.exe"),
            home.join("AppData/Roaming/npm/claude.cmd"),
            home.join(".local/bin/claude.exe"),
            home.join("scoop/shims/claude.exe"),
            PathBuf::from("C:\\Program Files\\Claude\\claude.exe"),
        ]
    }
    #[cfg(not(windows))]
    {
        vec![
            home.join(".local/bin/claude"),
            home.join(".claude/local/claude"),
            PathBuf::from("/usr/local/bin/claude"),
            PathBuf::from("/opt/homebrew/bin/claude"),
            home.join(".nvm/versions/node/current/bin/claude"),
            home.join(".npm-global/bin/claude"),
        ]
    }
}

/// Regular file with an executable bit (Unix) or any regular file (Windows).
async fn is_executable(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
