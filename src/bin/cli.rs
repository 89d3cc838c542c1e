//! CLI binary for patchkit.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use patchkit::config::{CONFIG_FILE_NAME, Channel};
use patchkit::update::{
    AppVersion, AutoUpdatePreference, CheckOutcome, PatchManifest, UpdateAction, UpdateDescriptor,
    UpdateHistory, UpdateStatus,
};
use patchkit::{InstallLayout, UpdateSession, UpdaterConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// patchkit: check for, download and stage application updates.
#[derive(Parser)]
#[command(name = "patchkit", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Install root of the application (defaults to this binary's directory).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Release channel, overriding the config file.
    #[arg(long, value_enum)]
    channel: Option<ChannelArg>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Stable,
    Beta,
}

impl From<ChannelArg> for Channel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Stable => Channel::Stable,
            ChannelArg::Beta => Channel::Beta,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Check whether a newer version is published.
    Check,

    /// Download and stage the latest version.
    Update {
        /// Stage the update even if this version was skipped or auto-update
        /// is set to never.
        #[arg(long)]
        force: bool,

        /// Start the patcher and exit once the update is staged.
        #[arg(long)]
        restart: bool,
    },

    /// Hand a staged update to the patcher and exit.
    Apply,

    /// Show the installed version, staged payload and update history.
    Status,

    /// Skip the currently published version.
    Skip,

    /// Set the automatic update preference: `always` stages updates found by
    /// `check`, `never` holds them until `update --force`.
    Preference {
        #[arg(value_parser = ["ask", "always", "never"])]
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("patchkit=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_exe()
            .context("cannot determine current executable")?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let mut config = load_config(cli.config.as_deref(), &root)?;
    if let Some(channel) = cli.channel {
        config.check.channel = channel.into();
    }

    let layout = InstallLayout::new(&root, &config.install);
    let session = Arc::new(UpdateSession::new(config, layout)?);
    let history_path = UpdateHistory::default_path();

    match cli.command.unwrap_or(Command::Check) {
        Command::Check => run_check(&session, &history_path).await,
        Command::Update { force, restart } => {
            run_update(&session, &history_path, force, restart).await
        }
        Command::Apply => run_apply(&session),
        Command::Status => run_status(&session, &history_path).await,
        Command::Skip => run_skip(&session, &history_path).await,
        Command::Preference { value } => {
            let mut history = UpdateHistory::load(&history_path);
            history.auto_update = value.parse::<AutoUpdatePreference>()?;
            history.save(&history_path)?;
            println!("Auto-update preference: {}", history.auto_update);
            Ok(())
        }
    }
}

/// Explicit `--config`, then `patchkit.toml` in the install root, then the
/// per-user config file, then defaults.
fn load_config(explicit: Option<&Path>, root: &Path) -> anyhow::Result<UpdaterConfig> {
    if let Some(path) = explicit {
        return UpdaterConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()));
    }
    if root.join(CONFIG_FILE_NAME).is_file() {
        return Ok(UpdaterConfig::load_beside(root)?);
    }
    let user = UpdaterConfig::default_config_path();
    if user.is_file() {
        return Ok(UpdaterConfig::from_file(&user)?);
    }
    Ok(UpdaterConfig::default())
}

async fn checked(session: &UpdateSession, history_path: &Path) -> CheckOutcome {
    let outcome = session.check().await;
    let mut history = UpdateHistory::load(history_path);
    let remote = match &outcome {
        CheckOutcome::UpToDate { remote, .. } | CheckOutcome::UpdateAvailable { remote, .. } => {
            Some(*remote)
        }
        CheckOutcome::CheckFailed { .. } => None,
    };
    history.mark_checked(remote);
    if let Err(e) = history.save(history_path) {
        tracing::warn!(error = %e, "cannot record update check");
    }
    outcome
}

async fn run_check(session: &Arc<UpdateSession>, history_path: &Path) -> anyhow::Result<()> {
    match checked(session, history_path).await {
        CheckOutcome::UpToDate { local, remote } => {
            println!("Up to date (installed {local}, published {remote})");
        }
        CheckOutcome::UpdateAvailable {
            local,
            remote,
            descriptor,
        } => {
            println!("Update available: {local} -> {remote}");
            if descriptor.mandatory {
                println!("This update is marked as mandatory.");
            }
            if !descriptor.changelog.is_empty() {
                println!("\n{}", descriptor.changelog.trim());
            }
            let history = UpdateHistory::load(history_path);
            match history.action_for(remote) {
                UpdateAction::Stage => {
                    info!(%remote, "auto-update is on; staging");
                    return stage_update(session, remote, &descriptor, false).await;
                }
                UpdateAction::Notify => println!("Run `patchkit update` to install it."),
                UpdateAction::Hold => println!("Not installing: {}", hold_reason(&history, remote)),
            }
        }
        CheckOutcome::CheckFailed { reason } => {
            println!("Could not check for updates: {reason}");
        }
    }
    Ok(())
}

fn hold_reason(history: &UpdateHistory, remote: AppVersion) -> String {
    if history.is_dismissed(remote) {
        format!("version {remote} was skipped")
    } else {
        "auto-update is set to never".to_owned()
    }
}

async fn run_update(
    session: &Arc<UpdateSession>,
    history_path: &Path,
    force: bool,
    restart: bool,
) -> anyhow::Result<()> {
    let (remote, descriptor) = match checked(session, history_path).await {
        CheckOutcome::UpdateAvailable {
            remote, descriptor, ..
        } => (remote, descriptor),
        CheckOutcome::UpToDate { local, .. } => {
            println!("Already up to date ({local})");
            return Ok(());
        }
        CheckOutcome::CheckFailed { reason } => anyhow::bail!("update check failed: {reason}"),
    };

    let history = UpdateHistory::load(history_path);
    if !force && history.action_for(remote) == UpdateAction::Hold {
        println!(
            "Not installing: {}; use --force to install it anyway",
            hold_reason(&history, remote)
        );
        return Ok(());
    }
    stage_update(session, remote, &descriptor, restart).await
}

/// Download and stage `descriptor`, then optionally hand off to the patcher.
async fn stage_update(
    session: &Arc<UpdateSession>,
    remote: AppVersion,
    descriptor: &UpdateDescriptor,
    restart: bool,
) -> anyhow::Result<()> {
    println!("Downloading {remote} from {}", descriptor.url);
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("  {msg:12} [{bar:30}] {pos:>3}%") {
        pb.set_style(style);
    }

    let bar = tokio::spawn(drive_bar(session.subscribe(), pb.clone()));
    let cancel_session = Arc::clone(session);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, cancelling download...");
            cancel_session.cancel();
        }
    });

    let result = session.apply(descriptor).await;
    bar.abort();
    ctrl_c.abort();

    match result {
        Ok(report) => {
            pb.finish_with_message("staged");
            println!("Update {remote} staged ({} files)", report.files.len());
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e.into());
        }
    }

    if restart {
        session.launch_patcher()?;
        info!("handing off to patcher; exiting");
        std::process::exit(0);
    }
    println!("Run `patchkit apply` (or restart the application) to finish updating.");
    Ok(())
}

async fn drive_bar(mut rx: watch::Receiver<UpdateStatus>, pb: ProgressBar) {
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        pb.set_message(status.stage.to_string());
        pb.set_position(status.progress.round() as u64);
    }
}

fn run_apply(session: &UpdateSession) -> anyhow::Result<()> {
    if !session.layout().sentinel_path().is_file() {
        anyhow::bail!("no staged update in {}", session.layout().staging_dir().display());
    }
    let pid = session.launch_patcher()?;
    println!("Patcher started (pid {pid})");
    Ok(())
}

async fn run_status(session: &UpdateSession, history_path: &Path) -> anyhow::Result<()> {
    let layout = session.layout();
    let config = session.config();
    println!("patchkit v{}", env!("CARGO_PKG_VERSION"));
    println!("Install root:  {}", layout.root().display());
    if layout.app_dir() != layout.root() {
        println!("App directory: {}", layout.app_dir().display());
    }
    println!("Installed:     {}", session.local_version().await);
    println!(
        "Channel:       {} ({})",
        config.check.channel,
        config.check.descriptor_url()
    );

    if layout.sentinel_path().is_file() {
        let files = PatchManifest::load(&layout.manifest_path())
            .map(|m| m.files.len().to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        println!("Staged update: ready ({files} files)");
    } else if layout.archive_path().is_file() {
        println!("Staged update: downloaded, not extracted");
    } else {
        println!("Staged update: none");
    }

    let history = UpdateHistory::load(history_path);
    println!("Auto-update:   {}", history.auto_update);
    match history.last_check {
        Some(secs) => println!(
            "Last check:    {secs} (unix time){}",
            if history.check_is_stale(24) { ", stale" } else { "" }
        ),
        None => println!("Last check:    never"),
    }
    if let Some(seen) = &history.last_seen_version {
        println!("Last seen:     {seen}");
    }
    if let Some(skipped) = &history.dismissed_version {
        println!("Skipped:       {skipped}");
    }
    Ok(())
}

async fn run_skip(session: &UpdateSession, history_path: &Path) -> anyhow::Result<()> {
    let remote: AppVersion = match checked(session, history_path).await {
        CheckOutcome::UpdateAvailable { remote, .. } => remote,
        CheckOutcome::UpToDate { .. } => {
            println!("Nothing to skip; already up to date");
            return Ok(());
        }
        CheckOutcome::CheckFailed { reason } => anyhow::bail!("update check failed: {reason}"),
    };
    let mut history = UpdateHistory::load(history_path);
    history.dismiss(remote);
    history.save(history_path)?;
    println!("Skipping version {remote}");
    Ok(())
}
