//! Persisted update history.
//!
//! Tracks the auto-update preference, when the last check ran, the newest
//! remote version seen and the version the user chose to skip. Stored as JSON
//! in `<data dir>/update-history.json`.

use crate::error::{Result, UpdateError};
use crate::update::version::AppVersion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the history record inside the data directory.
pub const HISTORY_FILE: &str = "update-history.json";

/// User preference for automatic updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUpdatePreference {
    /// Ask each time an update is available (default).
    #[default]
    Ask,
    /// Download and stage updates without asking.
    Always,
    /// Never update automatically, just log availability.
    Never,
}

impl std::fmt::Display for AutoUpdatePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ask => write!(f, "ask"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for AutoUpdatePreference {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(UpdateError::Config(format!(
                "unknown auto-update preference {other:?}"
            ))),
        }
    }
}

/// What the host does about an available update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Download and stage it without asking.
    Stage,
    /// Report it and let the user decide.
    Notify,
    /// Leave it alone: the version was skipped or updates are turned off.
    Hold,
}

/// Persistent update history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateHistory {
    pub auto_update: AutoUpdatePreference,
    /// Unix timestamp (seconds) of the last update check.
    pub last_check: Option<u64>,
    /// Newest version reported by the descriptor.
    pub last_seen_version: Option<String>,
    /// Version the user chose to skip.
    pub dismissed_version: Option<String>,
}

impl UpdateHistory {
    /// Returns the default history path (`<data dir>/update-history.json`).
    pub fn default_path() -> PathBuf {
        crate::paths::data_dir().join(HISTORY_FILE)
    }

    /// Load history from `path`. Returns the default if the file is missing
    /// or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return Self::default(),
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt update history");
            Self::default()
        })
    }

    /// Persist the history to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!(
                    "cannot create history directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("cannot serialize update history: {e}")))?;

        std::fs::write(path, json).map_err(|e| {
            UpdateError::Config(format!(
                "cannot write update history to {}: {e}",
                path.display()
            ))
        })?;

        Ok(())
    }

    /// Record that a check ran now and, if it reached the server, which
    /// version it saw.
    pub fn mark_checked(&mut self, remote: Option<AppVersion>) {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        self.last_check = Some(since_epoch.as_secs());
        if let Some(remote) = remote {
            self.last_seen_version = Some(remote.to_string());
        }
    }

    /// Returns `true` if the last check was at least `hours` hours ago
    /// (or if no check has been recorded yet).
    pub fn check_is_stale(&self, hours: u64) -> bool {
        let Some(last_secs) = self.last_check else {
            return true;
        };

        let now_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let elapsed_hours = now_secs.saturating_sub(last_secs) / 3600;
        elapsed_hours >= hours
    }

    /// Skip `version` until something newer is published.
    pub fn dismiss(&mut self, version: AppVersion) {
        self.dismissed_version = Some(version.to_string());
    }

    /// Action for an available `version` under the stored preference.
    pub fn action_for(&self, version: AppVersion) -> UpdateAction {
        if self.is_dismissed(version) {
            return UpdateAction::Hold;
        }
        match self.auto_update {
            AutoUpdatePreference::Always => UpdateAction::Stage,
            AutoUpdatePreference::Ask => UpdateAction::Notify,
            AutoUpdatePreference::Never => UpdateAction::Hold,
        }
    }

    /// Whether `version` is the one the user skipped.
    pub fn is_dismissed(&self, version: AppVersion) -> bool {
        self.dismissed_version
            .as_deref()
            .and_then(|v| AppVersion::parse(v).ok())
            .is_some_and(|d| d == version)
    }
}
