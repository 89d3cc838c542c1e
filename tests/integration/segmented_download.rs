//! Package download against range-aware and range-ignoring servers.

use crate::helpers::{RangeResponder, layout, payload, ranged_requests};
use patchkit::config::InstallConfig;
use patchkit::{InstallLayout, UpdateError};
use patchkit::progress::{ProgressEvent, no_progress};
use patchkit::update::PackageFetcher;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, responder: RangeResponder) {
    Mock::given(method("GET"))
        .and(path("/app.zip"))
        .respond_with(responder)
        .mount(server)
        .await;
}

fn fetcher(segments: usize) -> PackageFetcher {
    PackageFetcher::new(reqwest::Client::new(), segments)
}

#[tokio::test]
async fn segmented_download_reassembles_exact_bytes() {
    let server = MockServer::start().await;
    let body = payload(100_003);
    serve(&server, RangeResponder::new(body.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let report = fetcher(8)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.segments, 8);
    assert_eq!(report.bytes, body.len() as u64);
    assert_eq!(report.path, layout.archive_path());
    assert_eq!(std::fs::read(layout.archive_path()).unwrap(), body);
    assert!(!layout.partial_archive_path().exists());
    // One probe plus one request per segment.
    assert_eq!(ranged_requests(&server).await, 9);
}

#[tokio::test]
async fn small_files_use_fewer_segments() {
    let server = MockServer::start().await;
    serve(&server, RangeResponder::new(b"abc".to_vec())).await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let report = fetcher(8)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.segments, 3);
    assert_eq!(std::fs::read(layout.archive_path()).unwrap(), b"abc");
}

#[tokio::test]
async fn falls_back_when_server_ignores_ranges() {
    let server = MockServer::start().await;
    let body = payload(4096);
    Mock::given(method("GET"))
        .and(path("/app.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let report = fetcher(8)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.segments, 1);
    assert_eq!(std::fs::read(layout.archive_path()).unwrap(), body);
    // The probe response itself was streamed; no second request.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let server = MockServer::start().await;
    serve(&server, RangeResponder::new(payload(64 * 1024))).await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let percents: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(Mutex::new(None));
    let percents_clone = Arc::clone(&percents);
    let started_clone = Arc::clone(&started);
    let callback = move |event: ProgressEvent| {
        if let ProgressEvent::DownloadStarted { total_bytes, .. } = &event {
            *started_clone.lock().unwrap() = *total_bytes;
        }
        if let Some(p) = event.percent() {
            percents_clone.lock().unwrap().push(p);
        }
    };

    fetcher(4)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &callback,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let percents = percents.lock().unwrap();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(*percents.last().unwrap(), 100.0);
    assert_eq!(*started.lock().unwrap(), Some(64 * 1024));
}

#[tokio::test]
async fn missing_package_is_download_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let err = fetcher(8)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Download(_)), "{err}");
    assert!(!layout.archive_path().exists());
    assert!(!layout.partial_archive_path().exists());
}

#[tokio::test]
async fn failing_segment_aborts_download() {
    let server = MockServer::start().await;
    serve(
        &server,
        RangeResponder::new(payload(10_000)).failing_segments(500),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let errors = Arc::new(Mutex::new(0usize));
    let errors_clone = Arc::clone(&errors);
    let callback = move |event: ProgressEvent| {
        if matches!(event, ProgressEvent::Error { .. }) {
            *errors_clone.lock().unwrap() += 1;
        }
    };

    let err = fetcher(4)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &callback,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Download(_)), "{err}");
    assert_eq!(*errors.lock().unwrap(), 1);
    assert!(!layout.archive_path().exists());
    assert!(!layout.partial_archive_path().exists());
}

#[tokio::test]
async fn cancel_leaves_no_archive() {
    let server = MockServer::start().await;
    serve(
        &server,
        RangeResponder::new(payload(10_000)).with_delay(Duration::from_secs(10)),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = fetcher(8)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!layout.archive_path().exists());
    assert!(!layout.partial_archive_path().exists());
}

#[tokio::test]
async fn staging_is_cleared_before_download() {
    let server = MockServer::start().await;
    serve(&server, RangeResponder::new(payload(1000))).await;
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());
    std::fs::create_dir_all(layout.staging_dir().join("old")).unwrap();
    std::fs::write(layout.staging_dir().join("old/leftover.dll"), "stale").unwrap();
    std::fs::write(layout.sentinel_path(), "success").unwrap();

    fetcher(2)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &no_progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!layout.staging_dir().join("old").exists());
    assert!(!layout.sentinel_path().exists());
    assert!(layout.archive_path().is_file());
}

#[tokio::test]
async fn failed_rename_removes_partial_file() {
    let server = MockServer::start().await;
    serve(&server, RangeResponder::new(payload(2048))).await;
    let dir = tempfile::tempdir().unwrap();
    // The archive lands beside the staging dir, where a non-empty directory
    // of the same name blocks the final rename.
    let install = InstallConfig {
        archive_name: "../blocked".to_owned(),
        ..InstallConfig::default()
    };
    let layout = InstallLayout::new(dir.path(), &install);
    std::fs::create_dir_all(dir.path().join("blocked")).unwrap();
    std::fs::write(dir.path().join("blocked/keep.txt"), "x").unwrap();

    let errors = Arc::new(Mutex::new(0usize));
    let errors_clone = Arc::clone(&errors);
    let callback = move |event: ProgressEvent| {
        if matches!(event, ProgressEvent::Error { .. }) {
            *errors_clone.lock().unwrap() += 1;
        }
    };

    let err = fetcher(2)
        .fetch(
            &format!("{}/app.zip", server.uri()),
            &layout,
            &callback,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Io(_)), "{err}");
    assert_eq!(*errors.lock().unwrap(), 1);
    assert!(!dir.path().join("blocked.part").exists());
    assert!(dir.path().join("blocked/keep.txt").exists());
}
