//! Out-of-process patch application.
//!
//! Runs inside the patcher binary after the main application has exited:
//! moves the staged payload over the installation, removes the staging tree
//! and relaunches the application.
//!
//! Every move is journalled. Before a destination file is replaced it is
//! parked in the backup directory; if any step fails, or a previous run
//! crashed part-way, the journal is replayed backwards so the installation
//! returns to its pre-patch state and the payload returns to staging.

use crate::config::{InstallConfig, RetryConfig};
use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use crate::update::fsops;
use crate::update::launcher::spawn_detached;
use crate::update::manifest::{Exclusions, PatchManifest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Patcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatcherState {
    Start,
    CopyingFiles,
    RelaunchPending,
    Exited,
}

/// Why a run left the installation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoStagingDir,
    NoInstallDir,
    /// The sentinel is missing, so the staged payload may be partial.
    IncompletePayload,
}

/// Result of a patcher run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    NothingToDo {
        reason: SkipReason,
    },
    Applied {
        /// Files moved into the installation, relative to its root.
        moved: Vec<PathBuf>,
        /// Process id of the relaunched application, if it was started.
        relaunched: Option<u32>,
    },
}

/// Files the current run has started to move, in order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PatchJournal {
    files: Vec<PathBuf>,
}

impl PatchJournal {
    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| UpdateError::Patch(format!("cannot parse journal {}: {e}", path.display())))
    }

    /// Write via a temporary file so a crash never leaves a torn journal.
    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| UpdateError::Patch(format!("cannot serialize journal: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Applies a staged update to an installation.
#[derive(Debug)]
pub struct Patcher {
    layout: InstallLayout,
    exclude: Vec<String>,
    retry: RetryConfig,
    require_sentinel: bool,
    relaunch: bool,
    state: PatcherState,
}

impl Patcher {
    pub fn new(layout: InstallLayout, install: &InstallConfig, retry: RetryConfig) -> Self {
        Self {
            layout,
            exclude: install.exclude.clone(),
            retry,
            require_sentinel: install.require_sentinel,
            relaunch: true,
            state: PatcherState::Start,
        }
    }

    /// Do not start the main application after patching.
    pub fn without_relaunch(mut self) -> Self {
        self.relaunch = false;
        self
    }

    pub fn state(&self) -> PatcherState {
        self.state
    }

    fn transition(&mut self, next: PatcherState) {
        tracing::debug!(from = ?self.state, to = ?next, "patcher state");
        self.state = next;
    }

    fn finish(&mut self, reason: SkipReason) -> PatchOutcome {
        tracing::info!(?reason, "nothing to patch");
        self.transition(PatcherState::Exited);
        PatchOutcome::NothingToDo { reason }
    }

    /// Apply the staged update, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Patch`] or an I/O error if the payload could not
    /// be applied. In that case every completed move has been rolled back.
    pub fn run(&mut self) -> Result<PatchOutcome> {
        self.state = PatcherState::Start;

        if !self.layout.staging_dir().is_dir() {
            return Ok(self.finish(SkipReason::NoStagingDir));
        }
        if !self.layout.app_dir().is_dir() {
            return Ok(self.finish(SkipReason::NoInstallDir));
        }

        let journal_path = self.layout.journal_path();
        if journal_path.is_file() {
            tracing::warn!("found journal from an interrupted patch; rolling back first");
            let journal = PatchJournal::load(&journal_path)?;
            self.rollback(&journal)?;
        }

        if self.require_sentinel && !self.layout.sentinel_path().is_file() {
            return Ok(self.finish(SkipReason::IncompletePayload));
        }

        self.transition(PatcherState::CopyingFiles);
        let files = self.payload_files()?;
        tracing::info!(files = files.len(), target = %self.layout.app_dir().display(), "applying update");

        let mut journal = PatchJournal::default();
        if let Err(e) = self.apply(&files, &mut journal) {
            tracing::error!(error = %e, "patch failed; rolling back");
            if let Err(rollback_err) = self.rollback(&journal) {
                tracing::error!(error = %rollback_err, "rollback incomplete; journal kept for next run");
            }
            self.transition(PatcherState::Exited);
            return Err(e);
        }

        self.remove_staging();

        self.transition(PatcherState::RelaunchPending);
        let relaunched = if self.relaunch { self.relaunch_main() } else { None };

        self.transition(PatcherState::Exited);
        Ok(PatchOutcome::Applied {
            moved: files,
            relaunched,
        })
    }

    /// Files to move: the manifest if present, otherwise a walk of staging.
    fn payload_files(&self) -> Result<Vec<PathBuf>> {
        let manifest_path = self.layout.manifest_path();
        let manifest = if manifest_path.is_file() {
            PatchManifest::load(&manifest_path)?
        } else {
            tracing::debug!("no manifest; walking staging directory");
            PatchManifest::collect(&self.layout, &self.exclude)?
        };

        let skip = Exclusions::new(&self.layout, &self.exclude);
        Ok(manifest
            .files
            .into_iter()
            .filter(|f| {
                let excluded = skip.matches(f);
                if excluded {
                    tracing::debug!(file = %f.display(), "excluded from patch");
                }
                !excluded
            })
            .collect())
    }

    fn apply(&self, files: &[PathBuf], journal: &mut PatchJournal) -> Result<()> {
        let journal_path = self.layout.journal_path();
        let backup_dir = self.layout.backup_dir();

        for relative in files {
            let src = self.layout.staging_dir().join(relative);
            let dst = self.layout.app_dir().join(relative);
            if !src.is_file() {
                return Err(UpdateError::Patch(format!(
                    "staged file missing: {}",
                    relative.display()
                )));
            }

            journal.files.push(relative.clone());
            journal.save(&journal_path)?;

            if dst.is_file() {
                self.move_with_retry(&dst, &backup_dir.join(relative))?;
            }
            self.move_with_retry(&src, &dst)?;
            tracing::debug!(file = %relative.display(), "patched");
        }

        if !journal.files.is_empty() {
            std::fs::remove_file(&journal_path)?;
        }
        Ok(())
    }

    /// Undo journalled moves, newest first.
    ///
    /// For each file: if the staged copy is gone but the destination exists,
    /// the move happened and the new file goes back to staging; then any
    /// backup is restored over the destination.
    fn rollback(&self, journal: &PatchJournal) -> Result<()> {
        let backup_dir = self.layout.backup_dir();
        for relative in journal.files.iter().rev() {
            let src = self.layout.staging_dir().join(relative);
            let dst = self.layout.app_dir().join(relative);
            let backup = backup_dir.join(relative);

            if !src.exists() && dst.is_file() {
                self.move_with_retry(&dst, &src)?;
            }
            if backup.is_file() {
                self.move_with_retry(&backup, &dst)?;
            }
            tracing::debug!(file = %relative.display(), "rolled back");
        }

        let journal_path = self.layout.journal_path();
        if journal_path.exists() {
            std::fs::remove_file(&journal_path)?;
        }
        let _ = std::fs::remove_dir_all(&backup_dir);
        Ok(())
    }

    fn move_with_retry(&self, src: &Path, dst: &Path) -> Result<()> {
        fsops::retry_io(&self.retry, "move file", || fsops::move_file(src, dst)).map_err(
            |(attempts, e)| {
                UpdateError::Patch(format!(
                    "cannot move {} to {} after {attempts} attempts: {e}",
                    src.display(),
                    dst.display()
                ))
            },
        )
    }

    /// Delete the staging tree. The sentinel goes first so that a tree we
    /// fail to delete is never mistaken for a pending update.
    fn remove_staging(&self) {
        let _ = std::fs::remove_file(self.layout.sentinel_path());
        let _ = std::fs::remove_file(self.layout.manifest_path());
        let staging = self.layout.staging_dir();
        if let Err((attempts, e)) =
            fsops::retry_io(&self.retry, "remove staging", || std::fs::remove_dir_all(staging))
        {
            tracing::warn!(
                path = %staging.display(),
                attempts,
                error = %e,
                "could not remove staging directory"
            );
        }
    }

    fn relaunch_main(&self) -> Option<u32> {
        let main = self.layout.main_binary();
        if !main.is_file() {
            tracing::error!(path = %main.display(), "main executable not found; not relaunching");
            return None;
        }
        match spawn_detached(main, self.layout.app_dir()) {
            Ok(child) => {
                tracing::info!(pid = child.id(), path = %main.display(), "application relaunched");
                Some(child.id())
            }
            Err(e) => {
                tracing::error!(path = %main.display(), error = %e, "cannot relaunch application");
                None
            }
        }
    }
}
