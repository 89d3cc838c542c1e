//! Self-update pipeline.
//!
//! Checks a remote XML descriptor for a newer version, downloads the package
//! in parallel byte ranges, extracts it into a staging directory and hands
//! off to a separate patcher process that swaps the files in while the
//! application is not running.
//!
//! ```text
//! UpdateChecker -> PackageFetcher -> ArchiveInstaller -> PatchLauncher
//!                                                           |
//!                                      (patcher process)  Patcher -> relaunch
//! ```
//!
//! [`UpdateSession`] drives the in-process half and publishes its status;
//! [`Patcher`] is run by the `patchkit-patcher` binary.

pub mod checker;
pub mod descriptor;
pub mod fetcher;
pub(crate) mod fsops;
pub mod history;
pub mod installer;
pub mod launcher;
pub mod manifest;
pub mod patcher;
pub mod session;
pub mod version;

pub use checker::{CheckOutcome, UpdateChecker};
pub use descriptor::UpdateDescriptor;
pub use fetcher::{FetchReport, PackageFetcher};
pub use history::{AutoUpdatePreference, UpdateAction, UpdateHistory};
pub use installer::{ArchiveInstaller, ArchiveRemoval, InstallReport};
pub use launcher::PatchLauncher;
pub use manifest::{Exclusions, PatchManifest};
pub use patcher::{PatchOutcome, Patcher, PatcherState, SkipReason};
pub use session::{UpdateSession, UpdateStage, UpdateStatus};
pub use version::{AppVersion, local_version};
