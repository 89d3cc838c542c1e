//! Shared helpers for integration tests.

use patchkit::config::{InstallConfig, RetryConfig, VersionSource};
use patchkit::update::UpdateDescriptor;
use patchkit::{InstallLayout, UpdateSession, UpdaterConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};
use zip::write::SimpleFileOptions;

/// Build an in-memory zip archive. Names ending in `/` become directories.
pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in files {
        if name.ends_with('/') {
            zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
        } else {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// Deterministic, non-repeating-ish payload of `len` bytes.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Descriptor document as served by the update server.
pub(crate) fn descriptor_xml(version: &str, url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <item>\n\
         \x20 <version>{version}</version>\n\
         \x20 <url>{url}</url>\n\
         \x20 <beta>0</beta>\n\
         \x20 <changelog><![CDATA[Fixes & improvements]]></changelog>\n\
         \x20 <mandatory>False</mandatory>\n\
         </item>\n"
    )
}

pub(crate) fn descriptor(version: &str, url: &str) -> UpdateDescriptor {
    UpdateDescriptor {
        version: version.to_owned(),
        url: url.to_owned(),
        beta: String::new(),
        changelog: String::new(),
        mandatory: false,
    }
}

/// Config pointing at `server_uri`, with a fixed local version and fast
/// retries.
pub(crate) fn config(server_uri: &str, local_version: &str) -> UpdaterConfig {
    let mut config = UpdaterConfig::default();
    config.check.stable_url = format!("{server_uri}/stable/update.xml");
    config.check.beta_url = format!("{server_uri}/beta/update.xml");
    config.check.timeout_secs = 5;
    config.retry = RetryConfig {
        attempts: 3,
        delay_ms: 5,
    };
    config.version = VersionSource::Fixed {
        version: local_version.to_owned(),
    };
    config
}

pub(crate) fn layout(root: &Path) -> InstallLayout {
    InstallLayout::new(root, &InstallConfig::default())
}

pub(crate) fn session(root: &Path, config: UpdaterConfig) -> UpdateSession {
    let layout = InstallLayout::new(root, &config.install);
    UpdateSession::new(config, layout).unwrap()
}

/// Serves `body` honouring single `Range: bytes=a-b` requests, the way a
/// static file server does.
#[derive(Clone)]
pub(crate) struct RangeResponder {
    body: Vec<u8>,
    /// Answer every ranged request except the `bytes=0-0` probe with this
    /// status instead of content.
    segment_status: Option<u16>,
    delay: Option<Duration>,
}

impl RangeResponder {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            segment_status: None,
            delay: None,
        }
    }

    pub(crate) fn failing_segments(mut self, status: u16) -> Self {
        self.segment_status = Some(status);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn template(&self, req: &Request) -> ResponseTemplate {
        let total = self.body.len() as u64;
        let range = req
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, end)) if start < total => {
                if let Some(status) = self.segment_status {
                    if (start, end) != (0, 0) {
                        return ResponseTemplate::new(status);
                    }
                }
                let end = end.min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{total}"))
                    .set_body_bytes(self.body[start as usize..=end as usize].to_vec())
            }
            Some(_) => ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{total}")),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let template = self.template(req);
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Number of requests the server saw carrying a `Range` header.
pub(crate) async fn ranged_requests(server: &wiremock::MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.headers.contains_key("range"))
        .count()
}
