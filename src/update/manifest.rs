//! Hand-off manifest between the installer and the patcher process.
//!
//! The installer records exactly which staged files make up the payload; the
//! patcher moves those and nothing else. When no manifest is present (a
//! payload staged by hand, or by an older pipeline) the patcher falls back to
//! walking the staging directory with the same exclusion rules.

use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use crate::update::fsops;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current manifest format.
pub const MANIFEST_FORMAT: u32 = 1;

/// Payload files staged for the patcher, relative to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchManifest {
    pub format: u32,
    pub files: Vec<PathBuf>,
}

impl PatchManifest {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            format: MANIFEST_FORMAT,
            files,
        }
    }

    /// Build a manifest from the current contents of the staging directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the staging directory cannot be walked.
    pub fn collect(layout: &InstallLayout, exclude: &[String]) -> Result<Self> {
        let skip = Exclusions::new(layout, exclude);
        let files = fsops::walk_files(layout.staging_dir(), &[layout.backup_dir()])?
            .into_iter()
            .filter(|f| !skip.matches(f))
            .collect();
        Ok(Self::new(files))
    }

    /// Load a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Patch`] if the file is unreadable, not valid
    /// JSON, of an unknown format, or lists a path outside the staging root.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let manifest: Self = serde_json::from_slice(&bytes).map_err(|e| {
            UpdateError::Patch(format!("cannot parse manifest {}: {e}", path.display()))
        })?;
        if manifest.format != MANIFEST_FORMAT {
            return Err(UpdateError::Patch(format!(
                "unsupported manifest format {}",
                manifest.format
            )));
        }
        if let Some(bad) = manifest.files.iter().find(|f| !fsops::is_contained(f)) {
            return Err(UpdateError::Patch(format!(
                "manifest entry escapes staging directory: {}",
                bad.display()
            )));
        }
        Ok(manifest)
    }

    /// Persist the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| UpdateError::Archive(format!("cannot serialize manifest: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Staged files the patcher never moves.
///
/// Configured exclusions and the patcher binary match by file name at any
/// depth. The pipeline's own control files only match at the staging root,
/// so a payload may carry e.g. `assets/update.zip`.
#[derive(Debug, Clone)]
pub struct Exclusions {
    anywhere: Vec<String>,
    top_level: Vec<String>,
}

impl Exclusions {
    pub fn new(layout: &InstallLayout, exclude: &[String]) -> Self {
        let mut anywhere: Vec<String> = exclude.to_vec();
        if let Some(patcher) = layout.patcher_binary().file_name() {
            anywhere.push(patcher.to_string_lossy().into_owned());
        }
        Self {
            anywhere,
            top_level: layout.control_file_names(),
        }
    }

    /// Whether `relative` (a path under the staging directory) is excluded.
    pub fn matches(&self, relative: &Path) -> bool {
        if fsops::name_in(relative, &self.anywhere) {
            return true;
        }
        relative.parent().is_none_or(|p| p.as_os_str().is_empty())
            && fsops::name_in(relative, &self.top_level)
    }
}
