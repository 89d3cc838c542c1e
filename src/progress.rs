//! Progress event types for package download and extraction.
//!
//! Provides callback-based progress reporting that decouples the pipeline
//! from presentation (CLI indicatif bar, host application status widgets).

use std::path::PathBuf;

/// Progress events emitted while fetching and unpacking an update.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The package download has started.
    DownloadStarted {
        /// Package URL.
        url: String,
        /// Total size in bytes, if the server reported it.
        total_bytes: Option<u64>,
        /// Number of concurrent byte-range segments (1 for a plain stream).
        segments: usize,
    },

    /// Download progress update.
    DownloadProgress {
        /// Bytes received so far across all segments.
        bytes_downloaded: u64,
        /// Total size in bytes, if known.
        total_bytes: Option<u64>,
    },

    /// The package was fully written to disk.
    DownloadComplete {
        /// Final archive path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },

    /// Archive extraction has started.
    ExtractStarted {
        /// Number of entries in the archive.
        entries: usize,
    },

    /// Extraction progress update.
    ExtractProgress {
        /// Entries processed so far.
        entries_done: usize,
        /// Total entries.
        entries_total: usize,
    },

    /// Extraction finished and the sentinel was written.
    ExtractComplete {
        /// Number of payload files staged.
        files: usize,
    },

    /// An error occurred during download or extraction.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

impl ProgressEvent {
    /// Download completion as a percentage, when the event carries one.
    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::DownloadProgress {
                bytes_downloaded,
                total_bytes: Some(total),
            } if *total > 0 => Some(percent_of(*bytes_downloaded, *total)),
            Self::DownloadProgress {
                total_bytes: Some(0),
                ..
            } => Some(100.0),
            Self::DownloadComplete { .. } => Some(100.0),
            _ => None,
        }
    }
}

/// `done / total` as a percentage clamped to `0..=100`.
pub fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// Callback type for receiving progress events.
///
/// Borrowed for the duration of one fetch or install; the pipeline only ever
/// invokes it from the task that owns the operation.
pub type ProgressCallback<'a> = &'a (dyn Fn(ProgressEvent) + Send + Sync);

/// A callback that ignores every event.
pub fn no_progress(_: ProgressEvent) {}
