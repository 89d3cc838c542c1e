//! Version check against a mock update server.

use crate::helpers::{config, descriptor_xml, session};
use patchkit::config::{Channel, VersionSource};
use patchkit::update::{AppVersion, CheckOutcome, UpdateChecker};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_descriptor(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn newer_remote_version_is_available() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        descriptor_xml("1.2.0.0", "https://cdn.example.com/app-1.2.zip"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "1.1.0.0")).check().await;

    assert!(outcome.is_update_available());
    let CheckOutcome::UpdateAvailable {
        local,
        remote,
        descriptor,
    } = outcome
    else {
        panic!("expected an update");
    };
    assert_eq!(local, AppVersion::new(1, 1, 0, 0));
    assert_eq!(remote, AppVersion::new(1, 2, 0, 0));
    assert_eq!(descriptor.url, "https://cdn.example.com/app-1.2.zip");
    assert_eq!(descriptor.changelog, "Fixes & improvements");
    assert!(!descriptor.mandatory);
}

#[tokio::test]
async fn equal_versions_are_up_to_date() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        descriptor_xml("1.2.0.0", "https://cdn.example.com/app-1.2.zip"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "1.2")).check().await;

    assert!(!outcome.is_update_available());
    assert!(matches!(outcome, CheckOutcome::UpToDate { .. }));
}

#[tokio::test]
async fn older_remote_version_is_not_an_update() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        descriptor_xml("1.9.9.9", "https://cdn.example.com/old.zip"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "2.0.0.0")).check().await;
    assert!(matches!(outcome, CheckOutcome::UpToDate { .. }));
}

#[tokio::test]
async fn missing_main_binary_reads_as_zero() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        descriptor_xml("0.0.0.1", "https://cdn.example.com/first.zip"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&server.uri(), "ignored");
    config.version = VersionSource::Executable;

    let outcome = session(dir.path(), config).check().await;

    match outcome {
        CheckOutcome::UpdateAvailable { local, .. } => assert_eq!(local, AppVersion::ZERO),
        other => panic!("expected an update, got {other:?}"),
    }
}

#[tokio::test]
async fn beta_channel_reads_beta_descriptor() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        descriptor_xml("1.0.0.0", "https://cdn.example.com/stable.zip"),
    )
    .await;
    serve_descriptor(
        &server,
        "/beta/update.xml",
        descriptor_xml("1.1.0.0", "https://cdn.example.com/beta.zip"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&server.uri(), "1.0.0.0");
    config.check.channel = Channel::Beta;

    let outcome = session(dir.path(), config).check().await;

    assert_eq!(
        outcome.descriptor().map(|d| d.url.as_str()),
        Some("https://cdn.example.com/beta.zip")
    );
}

#[tokio::test]
async fn server_error_is_check_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stable/update.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "1.0")).check().await;

    assert!(!outcome.is_update_available());
    match outcome {
        CheckOutcome::CheckFailed { reason } => assert!(reason.contains("404"), "{reason}"),
        other => panic!("expected CheckFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_descriptor_is_check_failed() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        "<item><version>2.0</version><url>http://x".to_owned(),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "1.0")).check().await;
    assert!(matches!(outcome, CheckOutcome::CheckFailed { .. }));
}

#[tokio::test]
async fn descriptor_without_url_is_check_failed() {
    let server = MockServer::start().await;
    serve_descriptor(
        &server,
        "/stable/update.xml",
        "<item><version>9.0.0.0</version></item>".to_owned(),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let outcome = session(dir.path(), config(&server.uri(), "1.0")).check().await;
    match outcome {
        CheckOutcome::CheckFailed { reason } => assert!(reason.contains("url"), "{reason}"),
        other => panic!("expected CheckFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_server_times_out_as_check_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/update.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(descriptor_xml("9.0", "http://x/y.zip"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(
        reqwest::Client::new(),
        format!("{}/update.xml", server.uri()),
        Duration::from_millis(200),
    );
    let outcome = checker.check(AppVersion::ZERO).await;
    assert!(matches!(outcome, CheckOutcome::CheckFailed { .. }));
}
