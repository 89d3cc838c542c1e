//! Configuration types for the update pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name looked up next to the patcher binary.
pub const CONFIG_FILE_NAME: &str = "patchkit.toml";

/// Top-level configuration for the updater.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Remote descriptor settings.
    pub check: CheckConfig,
    /// On-disk layout of the installation and staging area.
    pub install: InstallConfig,
    /// Package download settings.
    pub download: DownloadConfig,
    /// Retry policy for locked-file operations.
    pub retry: RetryConfig,
    /// Where the locally installed version is read from.
    pub version: VersionSource,
}

/// Release channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Regular releases.
    #[default]
    Stable,
    /// Pre-release builds.
    Beta,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Beta => write!(f, "beta"),
        }
    }
}

/// Remote descriptor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Channel to follow.
    pub channel: Channel,
    /// Descriptor URL for the stable channel.
    pub stable_url: String,
    /// Descriptor URL for the beta channel.
    pub beta_url: String,
    /// Request timeout for the descriptor fetch, in seconds.
    pub timeout_secs: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Stable,
            stable_url: "https://updates.example.com/release/update.xml".to_owned(),
            beta_url: "https://updates.example.com/beta/update.xml".to_owned(),
            timeout_secs: 15,
        }
    }
}

impl CheckConfig {
    /// Descriptor URL for the configured channel.
    pub fn descriptor_url(&self) -> &str {
        match self.channel {
            Channel::Stable => &self.stable_url,
            Channel::Beta => &self.beta_url,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Installation and staging layout.
///
/// Binary names are given without a platform suffix; `.exe` is appended on
/// Windows when the path is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Directory holding the live application files, relative to the install
    /// root. `.` means the root itself.
    pub install_dir: String,
    /// Staging directory, relative to the install root.
    pub staging_dir: String,
    /// File name of the downloaded archive inside the staging directory.
    pub archive_name: String,
    /// Sentinel written once the staged payload is complete.
    pub sentinel_name: String,
    /// Main application binary, relative to `install_dir`.
    pub main_binary: String,
    /// Patcher binary, relative to the install root.
    pub patcher_binary: String,
    /// File names never moved by the patcher (compared case-insensitively).
    ///
    /// The patcher binary itself and the pipeline's control files are always
    /// skipped in addition to this list.
    pub exclude: Vec<String>,
    /// Refuse to patch when the sentinel is missing.
    pub require_sentinel: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            install_dir: ".".to_owned(),
            staging_dir: "UpdateTmp".to_owned(),
            archive_name: "update.zip".to_owned(),
            sentinel_name: "success.txt".to_owned(),
            main_binary: "app".to_owned(),
            patcher_binary: "patchkit-patcher".to_owned(),
            exclude: vec!["result.txt".to_owned()],
            require_sentinel: true,
        }
    }
}

/// Package download configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of concurrent byte-range segments.
    pub segments: usize,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segments: 8,
            connect_timeout_secs: 15,
            user_agent: format!("patchkit/{} (self-update)", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Bounded retry for operations that can fail on a transiently locked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Source of the locally installed version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VersionSource {
    /// Run the main binary with `--version` and take the first dotted number.
    #[default]
    Executable,
    /// Read the version from a text file (relative paths resolve against the
    /// install root).
    File { path: PathBuf },
    /// A literal version, for hosts that know their own version.
    Fixed { version: String },
}

impl UpdaterConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::UpdateError::Config(e.to_string()))
    }

    /// Load `patchkit.toml` from `dir` if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_beside(dir: &Path) -> crate::error::Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/patchkit/patchkit.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Check values that would make the pipeline misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`](crate::error::UpdateError::Config)
    /// describing the first invalid field.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::UpdateError;

        if self.download.segments == 0 {
            return Err(UpdateError::Config("download.segments must be >= 1".into()));
        }
        if self.retry.attempts == 0 {
            return Err(UpdateError::Config("retry.attempts must be >= 1".into()));
        }
        let names = [
            ("install.install_dir", &self.install.install_dir),
            ("install.staging_dir", &self.install.staging_dir),
            ("install.archive_name", &self.install.archive_name),
            ("install.sentinel_name", &self.install.sentinel_name),
            ("install.main_binary", &self.install.main_binary),
            ("install.patcher_binary", &self.install.patcher_binary),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(UpdateError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}
