//! patchkit: self-update pipeline for desktop applications.
//!
//! The in-process half checks for, downloads and stages an update:
//! Descriptor check → Segmented download → Archive staging → Patcher hand-off
//!
//! # Architecture
//!
//! - **Check**: fetches an XML descriptor and compares versions
//! - **Fetch**: downloads the package in concurrent byte ranges via `reqwest`
//! - **Install**: extracts the archive into a staging directory and marks it
//!   complete with a sentinel
//! - **Launch**: starts the patcher and exits so files can be replaced
//! - **Patch**: in a separate process, moves staged files over the
//!   installation with rollback, then relaunches the application

pub mod config;
pub mod error;
pub mod paths;
pub mod progress;
pub mod update;

pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use paths::InstallLayout;
pub use progress::{ProgressCallback, ProgressEvent};
pub use update::{CheckOutcome, Patcher, UpdateSession, UpdateStage, UpdateStatus};
