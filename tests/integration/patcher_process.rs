//! Patcher runs over real install trees, including a full round trip from a
//! mock update server.

use crate::helpers::{RangeResponder, config, descriptor, session, zip_bytes};
use patchkit::config::{InstallConfig, RetryConfig};
use patchkit::InstallLayout;
use patchkit::update::{PatchOutcome, Patcher, PatcherState, SkipReason};
use std::path::{Path, PathBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

fn retry() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        delay_ms: 5,
    }
}

fn write(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[test]
fn staged_payload_moves_into_install_root() {
    let dir = tempfile::tempdir().unwrap();
    let install = InstallConfig {
        exclude: vec!["Updater.exe".to_owned()],
        ..InstallConfig::default()
    };
    let layout = InstallLayout::new(dir.path(), &install);
    write(&layout.staging_dir().join("a/b.txt"), "payload");
    write(&layout.staging_dir().join("Updater.exe"), "patcher build");
    write(&layout.sentinel_path(), "success");

    let mut patcher = Patcher::new(layout.clone(), &install, retry()).without_relaunch();
    let outcome = patcher.run().unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("a/b.txt")).unwrap(),
        "payload"
    );
    assert!(!dir.path().join("Updater.exe").exists());
    assert!(!layout.staging_dir().exists());
    assert_eq!(patcher.state(), PatcherState::Exited);
    assert!(matches!(outcome, PatchOutcome::Applied { ref moved, .. } if moved == &vec![PathBuf::from("a/b.txt")]));
}

#[test]
fn exclusions_match_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let install = InstallConfig {
        exclude: vec!["Updater.exe".to_owned(), "result.txt".to_owned()],
        ..InstallConfig::default()
    };
    let layout = InstallLayout::new(dir.path(), &install);
    write(&layout.staging_dir().join("UPDATER.EXE"), "x");
    write(&layout.staging_dir().join("RESULT.txt"), "x");
    write(&layout.staging_dir().join("keep.bin"), "x");
    write(&layout.sentinel_path(), "success");

    Patcher::new(layout, &install, retry())
        .without_relaunch()
        .run()
        .unwrap();

    assert!(dir.path().join("keep.bin").exists());
    assert!(!dir.path().join("UPDATER.EXE").exists());
    assert!(!dir.path().join("RESULT.txt").exists());
}

#[test]
fn no_staging_directory_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let install = InstallConfig::default();
    write(&dir.path().join("app"), "installed");

    let mut patcher =
        Patcher::new(InstallLayout::new(dir.path(), &install), &install, retry()).without_relaunch();
    let outcome = patcher.run().unwrap();

    assert_eq!(
        outcome,
        PatchOutcome::NothingToDo {
            reason: SkipReason::NoStagingDir
        }
    );
    assert_eq!(patcher.state(), PatcherState::Exited);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("app")).unwrap(),
        "installed"
    );
}

#[tokio::test]
async fn downloaded_update_is_applied_by_patcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.zip"))
        .respond_with(RangeResponder::new(zip_bytes(&[
            ("app", b"version 2".as_slice()),
            ("lib/", b"".as_slice()),
            ("lib/core.so", b"core 2".as_slice()),
            ("result.txt", b"publisher notes".as_slice()),
        ])))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("app"), "version 1");
    write(&dir.path().join("lib/core.so"), "core 1");
    write(&dir.path().join("user.cfg"), "settings");

    let config = config(&server.uri(), "1.0");
    let session = session(dir.path(), config.clone());
    session
        .apply(&descriptor("2.0", &format!("{}/app.zip", server.uri())))
        .await
        .unwrap();

    let layout = InstallLayout::new(dir.path(), &config.install);
    let outcome = tokio::task::spawn_blocking(move || {
        Patcher::new(layout, &config.install, config.retry)
            .without_relaunch()
            .run()
    })
    .await
    .unwrap()
    .unwrap();

    assert!(matches!(outcome, PatchOutcome::Applied { .. }));
    let read = |rel: &str| std::fs::read_to_string(dir.path().join(rel)).unwrap();
    assert_eq!(read("app"), "version 2");
    assert_eq!(read("lib/core.so"), "core 2");
    assert_eq!(read("user.cfg"), "settings");
    assert!(!dir.path().join("result.txt").exists());
    assert!(!session.layout().staging_dir().exists());
}

#[cfg(unix)]
#[test]
fn main_binary_is_relaunched_from_install_root() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let install = InstallConfig::default();
    let layout = InstallLayout::new(dir.path(), &install);
    write(
        &layout.staging_dir().join("app"),
        "#!/bin/sh\necho relaunched > relaunched.txt\n",
    );
    write(&layout.sentinel_path(), "success");

    std::fs::set_permissions(
        layout.staging_dir().join("app"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();

    let outcome = Patcher::new(layout, &install, retry()).run().unwrap();

    let PatchOutcome::Applied { relaunched, .. } = outcome else {
        panic!("expected the update to be applied");
    };
    assert!(relaunched.is_some());

    let marker = dir.path().join("relaunched.txt");
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !marker.exists() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert!(marker.exists());
}
