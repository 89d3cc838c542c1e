//! Filesystem locations used by the updater.
//!
//! Two kinds of paths live here:
//!
//! * Per-user directories (config, persisted update history), resolved with the
//!   [`dirs`] crate and overridable through `PATCHKIT_CONFIG_DIR` /
//!   `PATCHKIT_DATA_DIR`.
//! * The [`InstallLayout`] of one installation: its root, the staging area
//!   under it and the binaries the pipeline launches.
//!
//! # Staging layout
//!
//! | File | Written by | Purpose |
//! |------|------------|---------|
//! | `update.zip` | fetcher | downloaded package |
//! | `update.zip.part` | fetcher | in-flight download |
//! | `patch-manifest.json` | installer | payload files to move |
//! | `success.txt` | installer | payload complete |
//! | `patch-journal.json` | patcher | completed moves, for rollback |
//! | `.patch-backup/` | patcher | replaced files, for rollback |

use crate::config::InstallConfig;
use std::path::{Path, PathBuf};

/// Manifest of staged payload files.
pub const MANIFEST_FILE: &str = "patch-manifest.json";

/// Patcher transaction journal.
pub const JOURNAL_FILE: &str = "patch-journal.json";

/// Directory holding files displaced by the patcher until it commits.
pub const BACKUP_DIR: &str = ".patch-backup";

/// Suffix of the archive while it is still being downloaded.
pub const PARTIAL_SUFFIX: &str = "part";

/// Per-user config directory.
///
/// Resolves to `dirs::config_dir()/patchkit/`. Override with
/// `PATCHKIT_CONFIG_DIR`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PATCHKIT_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("patchkit"))
        .unwrap_or_else(|| std::env::temp_dir().join("patchkit-config"))
}

/// Per-user data directory.
///
/// Resolves to `dirs::data_dir()/patchkit/`. Override with
/// `PATCHKIT_DATA_DIR`.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PATCHKIT_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("patchkit"))
        .unwrap_or_else(|| std::env::temp_dir().join("patchkit-data"))
}

/// Directory for the patcher's log file under an install root.
pub fn log_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

/// Appends the platform executable suffix to a binary name.
pub fn binary_file_name(name: &str) -> String {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || name.to_ascii_lowercase().ends_with(suffix) {
        name.to_owned()
    } else {
        format!("{name}{suffix}")
    }
}

/// Resolved paths of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    app_dir: PathBuf,
    staging: PathBuf,
    archive_name: String,
    sentinel_name: String,
    main_binary: PathBuf,
    patcher_binary: PathBuf,
}

impl InstallLayout {
    /// Resolve the layout of the installation rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, install: &InstallConfig) -> Self {
        let root = root.into();
        let app_dir = match install.install_dir.trim() {
            "" | "." => root.clone(),
            dir => root.join(dir),
        };
        Self {
            staging: root.join(&install.staging_dir),
            main_binary: app_dir.join(binary_file_name(&install.main_binary)),
            patcher_binary: root.join(binary_file_name(&install.patcher_binary)),
            archive_name: install.archive_name.clone(),
            sentinel_name: install.sentinel_name.clone(),
            app_dir,
            root,
        }
    }

    /// Layout of the installation that contains the running executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable path cannot be determined.
    pub fn for_current_exe(install: &InstallConfig) -> crate::error::Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            crate::error::UpdateError::Config(format!(
                "cannot determine current executable path: {e}"
            ))
        })?;
        let root = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(root, install))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the patcher installs into and the application runs from.
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn archive_path(&self) -> PathBuf {
        self.staging.join(&self.archive_name)
    }

    /// Where the archive is written while the download is in flight.
    pub fn partial_archive_path(&self) -> PathBuf {
        self.staging
            .join(format!("{}.{PARTIAL_SUFFIX}", self.archive_name))
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.staging.join(&self.sentinel_name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.staging.join(MANIFEST_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.staging.join(JOURNAL_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.staging.join(BACKUP_DIR)
    }

    pub fn main_binary(&self) -> &Path {
        &self.main_binary
    }

    pub fn patcher_binary(&self) -> &Path {
        &self.patcher_binary
    }

    /// Names the pipeline itself writes into the staging directory. These are
    /// never treated as payload.
    pub fn control_file_names(&self) -> Vec<String> {
        vec![
            self.archive_name.clone(),
            format!("{}.{PARTIAL_SUFFIX}", self.archive_name),
            self.sentinel_name.clone(),
            MANIFEST_FILE.to_owned(),
            JOURNAL_FILE.to_owned(),
        ]
    }
}
