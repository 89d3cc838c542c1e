//! Update package download.
//!
//! The package is fetched into `<staging>/<archive>.part` and renamed to its
//! final name only once every byte has arrived, so a cancelled or failed
//! download never leaves something that looks like a complete archive.
//!
//! A single `Range: bytes=0-0` probe decides the strategy:
//!
//! * `206` with a known total: the file is split into up to
//!   [`DownloadConfig::segments`](crate::config::DownloadConfig) contiguous
//!   ranges that are fetched concurrently and written at their offsets into a
//!   pre-sized file.
//! * `200`: the server ignores ranges, and the probe response itself is
//!   streamed as a plain download.

use crate::error::{Result, UpdateError};
use crate::paths::InstallLayout;
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::update::fsops;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of a completed package download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Final archive path.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Segments used (1 for a plain stream).
    pub segments: usize,
}

/// An inclusive byte range of the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Length in bytes; ranges are never empty.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `total` bytes into at most `segments` contiguous, non-empty ranges.
///
/// Earlier ranges absorb the remainder, so lengths differ by at most one.
pub fn split_ranges(total: u64, segments: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    let count = (segments.max(1) as u64).min(total);
    let base = total / count;
    let remainder = total % count;

    let mut ranges = Vec::with_capacity(count as usize);
    let mut start = 0;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        ranges.push(ByteRange {
            start,
            end: start + len - 1,
        });
        start += len;
    }
    ranges
}

/// Parse `Content-Range: bytes <start>-<end>/<total|*>`.
fn parse_content_range(headers: &HeaderMap) -> Option<(u64, u64, Option<u64>)> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let spec = value.trim().strip_prefix("bytes")?.trim();
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}

/// Downloads update packages into the staging directory.
#[derive(Debug, Clone)]
pub struct PackageFetcher {
    client: reqwest::Client,
    segments: usize,
}

impl PackageFetcher {
    pub fn new(client: reqwest::Client, segments: usize) -> Self {
        Self {
            client,
            segments: segments.max(1),
        }
    }

    /// Clear the staging directory and download `url` to the layout's
    /// archive path.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Cancelled`] if `cancel` fires, and
    /// [`UpdateError::Network`] / [`UpdateError::Download`] / I/O errors
    /// otherwise. On error no archive is left in the staging directory.
    pub async fn fetch(
        &self,
        url: &str,
        layout: &InstallLayout,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport> {
        let staging = layout.staging_dir().to_path_buf();
        tokio::task::spawn_blocking(move || fsops::clear_dir(&staging))
            .await
            .map_err(|e| UpdateError::Download(format!("staging cleanup task failed: {e}")))??;
        tracing::debug!(staging = %layout.staging_dir().display(), "staging directory cleared");

        let partial = layout.partial_archive_path();
        let archive = layout.archive_path();

        let downloaded = match self.download_to(url, &partial, progress, cancel).await {
            Ok(done) => tokio::fs::rename(&partial, &archive)
                .await
                .map(|()| done)
                .map_err(UpdateError::from),
            Err(e) => Err(e),
        };

        match downloaded {
            Ok((bytes, segments)) => {
                tracing::info!(%url, bytes, segments, path = %archive.display(), "package downloaded");
                progress(ProgressEvent::DownloadComplete {
                    path: archive.clone(),
                    bytes,
                });
                Ok(FetchReport {
                    path: archive,
                    bytes,
                    segments,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                tracing::error!(%url, error = %e, "package download failed");
                progress(ProgressEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Download `url` to `dest`, returning bytes written and segments used.
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<(u64, usize)> {
        let probe = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            resp = self.client.get(url).header(RANGE, "bytes=0-0").send() => {
                resp.map_err(|e| UpdateError::Network(format!("download request failed: {e}")))?
            }
        };

        let content_range = parse_content_range(probe.headers());
        match probe.status() {
            StatusCode::PARTIAL_CONTENT => match content_range {
                Some((_, _, Some(total))) if self.segments > 1 => {
                    drop(probe);
                    let segments = self
                        .download_segmented(url, dest, total, progress, cancel)
                        .await?;
                    Ok((total, segments))
                }
                _ => {
                    drop(probe);
                    let resp = self.plain_get(url, cancel).await?;
                    let bytes = stream_single(url, resp, dest, progress, cancel).await?;
                    Ok((bytes, 1))
                }
            },
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Zero-length resources cannot satisfy `bytes=0-0`.
                drop(probe);
                let resp = self.plain_get(url, cancel).await?;
                let bytes = stream_single(url, resp, dest, progress, cancel).await?;
                Ok((bytes, 1))
            }
            status if status.is_success() => {
                tracing::debug!(%url, "server ignored range probe; streaming");
                let bytes = stream_single(url, probe, dest, progress, cancel).await?;
                Ok((bytes, 1))
            }
            status => Err(UpdateError::Download(format!(
                "download request returned {status}"
            ))),
        }
    }

    async fn plain_get(&self, url: &str, cancel: &CancellationToken) -> Result<reqwest::Response> {
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            resp = self.client.get(url).send() => {
                resp.map_err(|e| UpdateError::Network(format!("download request failed: {e}")))?
            }
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::Download(format!(
                "download request returned {status}"
            )));
        }
        Ok(resp)
    }

    async fn download_segmented(
        &self,
        url: &str,
        dest: &Path,
        total: u64,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let ranges = split_ranges(total, self.segments);
        let segment_count = ranges.len();
        progress(ProgressEvent::DownloadStarted {
            url: url.to_owned(),
            total_bytes: Some(total),
            segments: segment_count,
        });
        tracing::debug!(%url, total, segments = segment_count, "starting segmented download");

        {
            let file = tokio::fs::File::create(dest).await?;
            file.set_len(total).await?;
        }

        // Segments report received byte counts here so that the progress
        // callback only ever runs on this task.
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let segment_cancel = cancel.child_token();
        let mut handles = Vec::with_capacity(segment_count);

        for range in ranges {
            let client = self.client.clone();
            let url = url.to_owned();
            let dest = dest.to_path_buf();
            let tx = tx.clone();
            let cancel = segment_cancel.clone();
            handles.push(tokio::spawn(async move {
                let result = fetch_segment(&client, &url, &dest, range, &tx, &cancel).await;
                if let Err(e) = &result {
                    if !matches!(e, UpdateError::Cancelled) {
                        tracing::warn!(%range, error = %e, "segment failed; cancelling siblings");
                    }
                    cancel.cancel();
                }
                result
            }));
        }
        drop(tx);

        let mut downloaded = 0u64;
        while let Some(n) = rx.recv().await {
            downloaded += n;
            progress(ProgressEvent::DownloadProgress {
                bytes_downloaded: downloaded,
                total_bytes: Some(total),
            });
        }

        let mut failure: Option<UpdateError> = None;
        for handle in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(UpdateError::Download(format!("segment task failed: {e}"))));
            if let Err(e) = result {
                // Prefer the root cause over the cancellations it triggered.
                let replace = match &failure {
                    None => true,
                    Some(UpdateError::Cancelled) => !matches!(e, UpdateError::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    failure = Some(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let file = tokio::fs::OpenOptions::new().write(true).open(dest).await?;
        file.sync_all().await?;
        Ok(segment_count)
    }
}

/// Fetch one byte range and write it at its offset in `dest`.
async fn fetch_segment(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    range: ByteRange,
    tx: &mpsc::UnboundedSender<u64>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
        resp = client.get(url).header(RANGE, range.header_value()).send() => {
            resp.map_err(|e| UpdateError::Network(format!("segment {range} request failed: {e}")))?
        }
    };

    let status = resp.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(UpdateError::Download(format!(
            "segment {range} returned {status} instead of 206"
        )));
    }
    match parse_content_range(resp.headers()) {
        Some((start, end, _)) if start == range.start && end == range.end => {}
        other => {
            return Err(UpdateError::Download(format!(
                "segment {range} got mismatched Content-Range {other:?}"
            )));
        }
    }

    let mut file = tokio::fs::OpenOptions::new().write(true).open(dest).await?;
    file.seek(SeekFrom::Start(range.start)).await?;

    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk =
            chunk.map_err(|e| UpdateError::Network(format!("segment {range} read failed: {e}")))?;
        let len = chunk.len() as u64;
        if written + len > range.len() {
            return Err(UpdateError::Download(format!(
                "segment {range} sent more than {} bytes",
                range.len()
            )));
        }
        file.write_all(&chunk).await?;
        written += len;
        let _ = tx.send(len);
    }
    file.flush().await?;

    if written != range.len() {
        return Err(UpdateError::Download(format!(
            "segment {range} ended after {written} of {} bytes",
            range.len()
        )));
    }
    Ok(written)
}

/// Stream a whole response body into `dest`.
async fn stream_single(
    url: &str,
    resp: reqwest::Response,
    dest: &Path,
    progress: ProgressCallback<'_>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let total = resp.content_length();
    progress(ProgressEvent::DownloadStarted {
        url: url.to_owned(),
        total_bytes: total,
        segments: 1,
    });

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = resp.bytes_stream();
    let mut downloaded = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| UpdateError::Network(format!("download read failed: {e}")))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress(ProgressEvent::DownloadProgress {
            bytes_downloaded: downloaded,
            total_bytes: total,
        });
    }
    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(UpdateError::Download(format!(
                "download ended after {downloaded} of {expected} bytes"
            )));
        }
    }
    Ok(downloaded)
}
