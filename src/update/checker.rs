//! Remote version check.
//!
//! Fetches the XML update descriptor, parses it and compares the advertised
//! version with the locally installed one. Every failure along the way is
//! reported as [`CheckOutcome::CheckFailed`]; the caller decides whether that
//! is worth showing to the user.

use crate::error::{Result, UpdateError};
use crate::update::descriptor::UpdateDescriptor;
use crate::update::version::AppVersion;
use std::time::Duration;

/// Result of comparing the remote descriptor with the local version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The installed version is the same as or newer than the published one.
    UpToDate {
        local: AppVersion,
        remote: AppVersion,
    },
    /// A strictly newer version is published.
    UpdateAvailable {
        local: AppVersion,
        remote: AppVersion,
        descriptor: UpdateDescriptor,
    },
    /// The descriptor could not be fetched or understood.
    CheckFailed { reason: String },
}

impl CheckOutcome {
    /// `true` only for [`CheckOutcome::UpdateAvailable`]; a failed check reads
    /// as "no update".
    pub fn is_update_available(&self) -> bool {
        matches!(self, Self::UpdateAvailable { .. })
    }

    /// The descriptor of an available update.
    pub fn descriptor(&self) -> Option<&UpdateDescriptor> {
        match self {
            Self::UpdateAvailable { descriptor, .. } => Some(descriptor),
            _ => None,
        }
    }

    /// Compare an already-fetched descriptor with `local`.
    pub fn evaluate(descriptor: UpdateDescriptor, local: AppVersion) -> Self {
        match descriptor.app_version() {
            Ok(remote) if remote > local => Self::UpdateAvailable {
                local,
                remote,
                descriptor,
            },
            Ok(remote) => Self::UpToDate { local, remote },
            Err(e) => Self::CheckFailed {
                reason: e.to_string(),
            },
        }
    }
}

/// Fetches and evaluates update descriptors.
#[derive(Debug, Clone)]
pub struct UpdateChecker {
    client: reqwest::Client,
    descriptor_url: String,
    timeout: Duration,
}

impl UpdateChecker {
    pub fn new(client: reqwest::Client, descriptor_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            descriptor_url: descriptor_url.into(),
            timeout,
        }
    }

    pub fn descriptor_url(&self) -> &str {
        &self.descriptor_url
    }

    /// Download and parse the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Network`] on transport failures or non-success
    /// status, and [`UpdateError::Descriptor`] if the document is unusable.
    pub async fn fetch_descriptor(&self) -> Result<UpdateDescriptor> {
        tracing::debug!(url = %self.descriptor_url, "fetching update descriptor");

        let resp = self
            .client
            .get(&self.descriptor_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| UpdateError::Network(format!("descriptor request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!(
                "descriptor request returned {status}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| UpdateError::Network(format!("descriptor body read failed: {e}")))?;

        UpdateDescriptor::parse(&body)
    }

    /// Check whether a version newer than `local` is published.
    ///
    /// Never fails; problems are folded into [`CheckOutcome::CheckFailed`].
    pub async fn check(&self, local: AppVersion) -> CheckOutcome {
        let outcome = match self.fetch_descriptor().await {
            Ok(descriptor) => CheckOutcome::evaluate(descriptor, local),
            Err(e) => CheckOutcome::CheckFailed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            CheckOutcome::UpdateAvailable {
                remote, descriptor, ..
            } => tracing::info!(
                %local,
                %remote,
                mandatory = descriptor.mandatory,
                "update available"
            ),
            CheckOutcome::UpToDate { remote, .. } => {
                tracing::info!(%local, %remote, "already up to date");
            }
            CheckOutcome::CheckFailed { reason } => {
                tracing::warn!(url = %self.descriptor_url, %reason, "update check failed");
            }
        }
        outcome
    }
}
