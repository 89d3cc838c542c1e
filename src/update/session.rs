//! Update session: the host-facing driver of the pipeline.
//!
//! A session owns the status of one installation's update attempts and
//! publishes it on a [`watch`] channel. Attempts move through
//! `Idle → Downloading → Unzip → Done`; a failure at any point drops the
//! stage back to `Idle` with the error recorded in
//! [`UpdateStatus::last_error`]. Only one attempt runs at a time.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use crate::progress::ProgressEvent;
use crate::update::checker::{CheckOutcome, UpdateChecker};
use crate::update::descriptor::UpdateDescriptor;
use crate::update::fetcher::{FetchReport, PackageFetcher};
use crate::update::installer::{ArchiveInstaller, InstallReport};
use crate::update::launcher::PatchLauncher;
use crate::update::version::{AppVersion, local_version};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Pipeline stage of the current attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateStage {
    /// No attempt in flight (initial state, and after a failure).
    #[default]
    Idle,
    Downloading,
    /// Package downloaded; extraction pending or running.
    Unzip,
    /// Payload staged; ready for the patcher.
    Done,
}

impl std::fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Downloading => write!(f, "downloading"),
            Self::Unzip => write!(f, "unzip"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Snapshot published to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStatus {
    pub stage: UpdateStage,
    /// Download progress in percent, `0.0..=100.0`.
    pub progress: f64,
    pub last_error: Option<String>,
    /// Number of attempts started on this session.
    pub attempt: u64,
}

type StatusSender = Arc<watch::Sender<UpdateStatus>>;

fn begin(status: &StatusSender, stage: UpdateStage) {
    status.send_modify(|s| {
        *s = UpdateStatus {
            stage,
            progress: 0.0,
            last_error: None,
            attempt: s.attempt + 1,
        };
    });
}

fn enter(status: &StatusSender, stage: UpdateStage) {
    status.send_modify(|s| s.stage = stage);
}

/// Raise progress; lower values are ignored.
fn advance(status: &StatusSender, percent: f64) {
    status.send_if_modified(|s| {
        if percent > s.progress {
            s.progress = percent.min(100.0);
            true
        } else {
            false
        }
    });
}

fn fail(status: &StatusSender, err: &UpdateError) {
    status.send_modify(|s| {
        s.stage = UpdateStage::Idle;
        s.progress = 0.0;
        s.last_error = Some(err.to_string());
    });
}

/// Clears the busy flag when an attempt ends, however it ends.
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives checks, downloads and installs for one installation.
#[derive(Debug)]
pub struct UpdateSession {
    config: UpdaterConfig,
    layout: InstallLayout,
    client: reqwest::Client,
    status: StatusSender,
    busy: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl UpdateSession {
    /// Create a session for the installation at `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: UpdaterConfig, layout: InstallLayout) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.download.connect_timeout_secs))
            .user_agent(config.download.user_agent.clone())
            .build()
            .map_err(|e| UpdateError::Config(format!("cannot build HTTP client: {e}")))?;
        let (tx, _rx) = watch::channel(UpdateStatus::default());

        Ok(Self {
            config,
            layout,
            client,
            status: Arc::new(tx),
            busy: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Current status snapshot.
    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    /// Cancel the attempt in flight, if any.
    pub fn cancel(&self) {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
    }

    /// Version of the installed main binary.
    pub async fn local_version(&self) -> AppVersion {
        let main = self.layout.main_binary().to_path_buf();
        let root = self.layout.root().to_path_buf();
        let source = self.config.version.clone();
        tokio::task::spawn_blocking(move || local_version(&main, &root, &source))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "version probe task failed");
                AppVersion::ZERO
            })
    }

    /// Compare the installed version with the configured channel's
    /// descriptor. Never fails; see [`CheckOutcome`].
    pub async fn check(&self) -> CheckOutcome {
        let local = self.local_version().await;
        let checker = UpdateChecker::new(
            self.client.clone(),
            self.config.check.descriptor_url(),
            self.config.check.timeout(),
        );
        tracing::debug!(channel = %self.config.check.channel, %local, "checking for updates");
        checker.check(local).await
    }

    /// Download the package of `descriptor` into the staging directory.
    ///
    /// Moves the stage `Idle → Downloading → Unzip`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Busy`] if another attempt is running, and the
    /// fetcher's error otherwise (after resetting the stage to `Idle`).
    pub async fn download(&self, descriptor: &UpdateDescriptor) -> Result<FetchReport> {
        let _guard = self.try_begin()?;
        let cancel = self.fresh_token();
        self.run_download(descriptor, &cancel).await
    }

    /// Extract the downloaded package and mark the payload complete.
    ///
    /// Moves the stage `Unzip → Done`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Busy`] if another attempt is running, and the
    /// installer's error otherwise (after resetting the stage to `Idle`).
    pub async fn install(&self) -> Result<InstallReport> {
        let _guard = self.try_begin()?;
        self.run_install().await
    }

    /// Download and install in one attempt.
    ///
    /// # Errors
    ///
    /// See [`UpdateSession::download`] and [`UpdateSession::install`].
    pub async fn apply(&self, descriptor: &UpdateDescriptor) -> Result<InstallReport> {
        let _guard = self.try_begin()?;
        let cancel = self.fresh_token();
        self.run_download(descriptor, &cancel).await?;
        if cancel.is_cancelled() {
            let err = UpdateError::Cancelled;
            fail(&self.status, &err);
            return Err(err);
        }
        self.run_install().await
    }

    /// Start the patcher process. Returns its pid.
    ///
    /// The caller is expected to exit promptly afterwards so the patcher can
    /// replace its files.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Launch`] if the patcher cannot be started.
    pub fn launch_patcher(&self) -> Result<u32> {
        if self.status().stage != UpdateStage::Done && !self.layout.sentinel_path().is_file() {
            tracing::warn!("launching patcher without a completed payload; it will do nothing");
        }
        PatchLauncher::new(self.layout.clone()).launch()
    }

    /// Wait until `stage` is reached or an attempt fails.
    ///
    /// Returns the status that ended the wait. Subscribe before starting the
    /// attempt so that no transition is missed. A failure the receiver had
    /// already seen when the wait began belongs to an earlier attempt and
    /// does not end the wait.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Cancelled`] if the session is dropped first.
    pub async fn wait_for_stage(
        rx: &mut watch::Receiver<UpdateStatus>,
        stage: UpdateStage,
    ) -> Result<UpdateStatus> {
        let stale_failure = {
            let unseen = rx.has_changed().unwrap_or(false);
            let current = rx.borrow();
            (!unseen && current.last_error.is_some()).then_some(current.attempt)
        };
        rx.wait_for(|s| {
            let failed = s.stage == UpdateStage::Idle
                && s.last_error.is_some()
                && Some(s.attempt) != stale_failure;
            s.stage == stage || failed
        })
        .await
        .map(|s| s.clone())
        .map_err(|_| UpdateError::Cancelled)
    }

    fn try_begin(&self) -> Result<AttemptGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UpdateError::Busy)?;
        Ok(AttemptGuard(&self.busy))
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = token.clone();
        }
        token
    }

    async fn run_download(
        &self,
        descriptor: &UpdateDescriptor,
        cancel: &CancellationToken,
    ) -> Result<FetchReport> {
        begin(&self.status, UpdateStage::Downloading);
        tracing::info!(version = %descriptor.version, url = %descriptor.url, "downloading update");

        let fetcher = PackageFetcher::new(self.client.clone(), self.config.download.segments);
        let status = Arc::clone(&self.status);
        let on_progress = move |event: ProgressEvent| {
            if let Some(percent) = event.percent() {
                advance(&status, percent);
            }
        };

        match fetcher
            .fetch(&descriptor.url, &self.layout, &on_progress, cancel)
            .await
        {
            Ok(report) => {
                advance(&self.status, 100.0);
                enter(&self.status, UpdateStage::Unzip);
                Ok(report)
            }
            Err(e) => {
                fail(&self.status, &e);
                Err(e)
            }
        }
    }

    async fn run_install(&self) -> Result<InstallReport> {
        if self.status().stage != UpdateStage::Unzip {
            begin(&self.status, UpdateStage::Unzip);
        }

        let installer = ArchiveInstaller::new(self.config.retry, self.config.install.exclude.clone());
        let layout = self.layout.clone();
        let joined = tokio::task::spawn_blocking(move || {
            installer.install(&layout, &|event: ProgressEvent| {
                if let ProgressEvent::ExtractProgress {
                    entries_done,
                    entries_total,
                } = event
                {
                    tracing::trace!(entries_done, entries_total, "extracting");
                }
            })
        })
        .await;

        let result = joined
            .unwrap_or_else(|e| Err(UpdateError::Archive(format!("extraction task failed: {e}"))));
        match result {
            Ok(report) => {
                enter(&self.status, UpdateStage::Done);
                tracing::info!(files = report.files.len(), "update ready to apply");
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "update install failed");
                fail(&self.status, &e);
                Err(e)
            }
        }
    }
}
