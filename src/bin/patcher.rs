//! Patcher binary.
//!
//! Started by the application right before it exits. Moves the staged update
//! over the installation, removes the staging directory and relaunches the
//! application. It has no console, so diagnostics go to
//! `<install root>/logs/patcher.log` as well as stderr.
//!
//! Always exits with code 0; the outcome is visible on disk and in the log.

use clap::Parser;
use patchkit::update::{PatchOutcome, Patcher};
use patchkit::{InstallLayout, UpdaterConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Apply a staged patchkit update.
#[derive(Parser)]
#[command(name = "patchkit-patcher", version, about)]
struct Args {
    /// Install root (defaults to this binary's directory).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Do not start the application afterwards.
    #[arg(long)]
    no_relaunch: bool,
}

fn main() {
    let args = Args::parse();
    let root = args.root.clone().unwrap_or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let _log_guard = init_logging(&root);
    tracing::info!(root = %root.display(), "patcher starting");

    if let Err(e) = run(&root, args.no_relaunch) {
        tracing::error!(error = %e, "patcher failed");
    }
    tracing::info!("patcher exiting");
}

fn run(root: &Path, no_relaunch: bool) -> anyhow::Result<()> {
    let config = UpdaterConfig::load_beside(root)?;
    let layout = InstallLayout::new(root, &config.install);

    let mut patcher = Patcher::new(layout, &config.install, config.retry);
    if no_relaunch {
        patcher = patcher.without_relaunch();
    }

    match patcher.run()? {
        PatchOutcome::NothingToDo { reason } => {
            tracing::info!(?reason, "no update applied");
        }
        PatchOutcome::Applied { moved, relaunched } => {
            tracing::info!(files = moved.len(), ?relaunched, "update applied");
        }
    }
    Ok(())
}

/// Log to stderr and to `<root>/logs/patcher.log`. The returned guard
/// flushes the file writer on drop.
fn init_logging(root: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("patchkit=info,patchkit_patcher=info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = patchkit::paths::log_dir(root);
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::never(&log_dir, "patcher.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Some(guard)
}
