//! Acquisition behavior against a real work directory, without touching
//! the network: pre-seeded binaries, cached manifests and the
//! concurrent-download marker protocol.

use std::time::Duration;

use sauce_connect::binary::{archive_name, binary_path, BinaryFetcher, Platform};

/// Place a fake sc binary where acquisition would unpack it.
fn seed_binary(work_dir: &std::path::Path, version: &str) -> std::path::PathBuf {
    let binary = binary_path(work_dir, Platform::current(), version);
    std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
    std::fs::write(&binary, "#!/bin/sh\nexit 0\n").unwrap();
    binary
}

#[tokio::test]
async fn test_ensure_is_noop_when_binary_present() {
    let dir = tempfile::tempdir().unwrap();
    let binary = seed_binary(dir.path(), "9.9");

    // A pinned version never resolves the manifest, so a present binary
    // means no network activity at all.
    let fetcher = BinaryFetcher::new(dir.path().to_path_buf(), None).unwrap();
    let path = fetcher.ensure("9.9").await.unwrap();

    assert_eq!(path, binary);
}

#[cfg(unix)]
#[tokio::test]
async fn test_ensure_fixes_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let binary = seed_binary(dir.path(), "9.9");
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();

    let fetcher = BinaryFetcher::new(dir.path().to_path_buf(), None).unwrap();
    fetcher.ensure("9.9").await.unwrap();

    let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o7777, 0o755);
}

#[tokio::test]
async fn test_ensure_resolves_version_from_cached_manifest() {
    let dir = tempfile::tempdir().unwrap();

    let manifest = r#"{
        "Sauce Connect": {
            "version": "9.9",
            "osx": {"sha1": "aaa"},
            "win32": {"sha1": "bbb"},
            "linux": {"sha1": "ccc"}
        }
    }"#;
    std::fs::write(dir.path().join("versions.json"), manifest).unwrap();
    let binary = seed_binary(dir.path(), "9.9");

    // "latest" resolves through the cached manifest without a fetch.
    let fetcher = BinaryFetcher::new(dir.path().to_path_buf(), None).unwrap();
    let path = fetcher.ensure("latest").await.unwrap();

    assert_eq!(path, binary);
}

#[tokio::test]
async fn test_ensure_waits_for_concurrent_download() {
    let dir = tempfile::tempdir().unwrap();
    let work_dir = dir.path().to_path_buf();

    // An existing archive file marks another acquirer's download as in
    // flight; this acquirer must poll for the binary instead of
    // downloading again.
    let archive = work_dir.join(archive_name(Platform::current(), "9.9"));
    std::fs::write(&archive, "").unwrap();

    let seeder_dir = work_dir.clone();
    let seeder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        seed_binary(&seeder_dir, "9.9");
    });

    let fetcher = BinaryFetcher::new(work_dir.clone(), None).unwrap();
    let path = fetcher.ensure("9.9").await.unwrap();

    seeder.await.unwrap();
    assert_eq!(path, binary_path(&work_dir, Platform::current(), "9.9"));
    // The marker belongs to the other acquirer; it must not be deleted.
    assert!(archive.exists());
}

#[tokio::test]
async fn test_ensure_rejects_garbage_manifest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("versions.json"), "not json").unwrap();

    let fetcher = BinaryFetcher::new(dir.path().to_path_buf(), None).unwrap();
    let err = fetcher.ensure("latest").await.unwrap_err();

    assert!(matches!(
        err,
        sauce_connect::AcquireError::ManifestFetch(_)
    ));
}
