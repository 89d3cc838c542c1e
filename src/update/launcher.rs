//! Hand-off from the running application to the patcher process.
//!
//! A running executable cannot reliably replace its own image, so the swap is
//! done by a second, independent process started from the install root after
//! this one exits.

use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use std::convert::Infallible;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Start `program` as an independent process with `cwd` as working directory.
pub(crate) fn spawn_detached(program: &Path, cwd: &Path) -> std::io::Result<Child> {
    let mut command = Command::new(program);
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    command.spawn()
}

/// Starts the patcher binary of an installation.
#[derive(Debug, Clone)]
pub struct PatchLauncher {
    layout: InstallLayout,
}

impl PatchLauncher {
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }

    /// Spawn the patcher and return its process id. The current process keeps
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Launch`] if the patcher binary is missing or
    /// cannot be started. The staged update stays in place for a later retry.
    pub fn launch(&self) -> Result<u32> {
        let patcher = self.layout.patcher_binary();
        if !patcher.is_file() {
            tracing::error!(path = %patcher.display(), "patcher binary not found; update stays staged");
            return Err(UpdateError::Launch(format!(
                "patcher not found at {}",
                patcher.display()
            )));
        }

        let child = spawn_detached(patcher, self.layout.root()).map_err(|e| {
            tracing::error!(path = %patcher.display(), error = %e, "cannot start patcher");
            UpdateError::Launch(format!("cannot start {}: {e}", patcher.display()))
        })?;

        let pid = child.id();
        tracing::info!(pid, path = %patcher.display(), "patcher started");
        Ok(pid)
    }

    /// Spawn the patcher and terminate the current process.
    ///
    /// Only returns if the patcher could not be started.
    ///
    /// # Errors
    ///
    /// See [`PatchLauncher::launch`].
    pub fn launch_and_exit(&self) -> Result<Infallible> {
        self.launch()?;
        tracing::info!("handing off to patcher; exiting");
        std::process::exit(0)
    }
}
