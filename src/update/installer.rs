//! Staged installation of a downloaded update archive.
//!
//! Extracts the archive into the staging directory, records the payload in a
//! [`PatchManifest`], writes the sentinel and finally removes the archive.
//! The sentinel is the last thing written, so its presence means the staged
//! payload is complete.

use crate::config::RetryConfig;
use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::update::fsops;
use crate::update::manifest::PatchManifest;
use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};

/// Content of the sentinel file.
pub const SENTINEL_CONTENT: &str = "success";

/// What happened to the archive after a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRemoval {
    /// Deleted after `attempts` tries.
    Removed { attempts: u32 },
    /// Already gone when removal was attempted.
    AlreadyAbsent,
    /// Still locked after every attempt. Harmless; the next download clears it.
    LeftBehind { attempts: u32, error: String },
}

/// Summary of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Entries in the archive (files and directories).
    pub entries: usize,
    /// Payload files recorded in the manifest.
    pub files: Vec<PathBuf>,
    pub archive: ArchiveRemoval,
}

/// Extracts update archives into the staging directory.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    retry: RetryConfig,
    exclude: Vec<String>,
}

impl ArchiveInstaller {
    pub fn new(retry: RetryConfig, exclude: Vec<String>) -> Self {
        Self { retry, exclude }
    }

    /// Extract the staged archive and mark the payload complete.
    ///
    /// Blocking; run it on a blocking-capable thread.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Archive`] if the archive is missing or cannot be
    /// read, and I/O errors from writing the payload. No sentinel is written
    /// on any error path.
    pub fn install(
        &self,
        layout: &InstallLayout,
        progress: ProgressCallback<'_>,
    ) -> Result<InstallReport> {
        let archive_path = layout.archive_path();
        if !archive_path.is_file() {
            return Err(UpdateError::Archive(format!(
                "archive not found at {}",
                archive_path.display()
            )));
        }

        match std::fs::remove_file(layout.sentinel_path()) {
            Ok(()) => tracing::debug!("removed stale sentinel"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let entries = extract(layout, &archive_path, progress)?;

        let manifest = PatchManifest::collect(layout, &self.exclude)?;
        manifest.save(&layout.manifest_path())?;
        std::fs::write(layout.sentinel_path(), SENTINEL_CONTENT)?;
        progress(ProgressEvent::ExtractComplete {
            files: manifest.files.len(),
        });
        tracing::info!(
            entries,
            files = manifest.files.len(),
            staging = %layout.staging_dir().display(),
            "update payload staged"
        );

        let archive = self.remove_archive(&archive_path);
        Ok(InstallReport {
            entries,
            files: manifest.files,
            archive,
        })
    }

    /// Delete the archive, retrying while it is locked.
    fn remove_archive(&self, path: &Path) -> ArchiveRemoval {
        let attempts = Cell::new(0u32);
        let result = fsops::retry_io(&self.retry, "remove archive", || {
            attempts.set(attempts.get() + 1);
            match std::fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        });

        match result {
            Ok(true) => ArchiveRemoval::Removed {
                attempts: attempts.get(),
            },
            Ok(false) => ArchiveRemoval::AlreadyAbsent,
            Err((attempts, e)) => {
                tracing::warn!(
                    path = %path.display(),
                    attempts,
                    error = %e,
                    "could not remove update archive; leaving it behind"
                );
                ArchiveRemoval::LeftBehind {
                    attempts,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Extract every entry of `archive_path` under the staging directory,
/// overwriting existing files. Returns the number of entries.
fn extract(
    layout: &InstallLayout,
    archive_path: &Path,
    progress: ProgressCallback<'_>,
) -> Result<usize> {
    let dest = layout.staging_dir();
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        UpdateError::Archive(format!("cannot read {}: {e}", archive_path.display()))
    })?;

    let entry_count = archive.len();
    progress(ProgressEvent::ExtractStarted {
        entries: entry_count,
    });
    let control = layout.control_file_names();

    for i in 0..entry_count {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdateError::Archive(format!("cannot read entry {i}: {e}")))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdateError::Archive(format!(
                "entry {:?} escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else if relative.parent().is_none_or(|p| p.as_os_str().is_empty())
            && fsops::name_in(&relative, &control)
        {
            tracing::warn!(entry = %relative.display(), "skipping entry that collides with a control file");
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&out_path)?;
            io::copy(&mut entry, &mut out).map_err(|e| {
                UpdateError::Archive(format!("cannot extract {}: {e}", relative.display()))
            })?;
            if let Some(mode) = entry.unix_mode().filter(|m| m & 0o777 != 0) {
                fsops::set_mode(&out_path, mode & 0o7777)?;
            }
        }

        progress(ProgressEvent::ExtractProgress {
            entries_done: i + 1,
            entries_total: entry_count,
        });
    }

    Ok(entry_count)
}
