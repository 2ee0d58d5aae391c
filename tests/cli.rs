//! End-to-end tests that spawn the `pxc` binary against a temp workspace.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pxc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pxc");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let photos = root.join("photos");
    fs::create_dir_all(&photos).unwrap();
    fs::write(photos.join("alpha.jpg"), b"alpha image bytes").unwrap();
    fs::write(photos.join("beta.jpg"), b"beta image bytes").unwrap();
    fs::write(photos.join("notes.txt"), b"not an image").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/pixarc.sqlite"

[scan]
extensions = ["jpg", "png"]
thumbnails_dir = "{root}/data/thumbnails"

[embedding]
provider = "disabled"

[sync]
auto_sync = true
default_interval = "5m"
tick_secs = 60
"#,
        root = root.display()
    );

    let config_path = root.join("pixarc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pxc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pxc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pxc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pxc(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_pxc(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_pxc(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_dir_add_and_list() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let photos = tmp.path().join("photos");
    let (stdout, stderr, success) =
        run_pxc(&config_path, &["dir", "add", photos.to_str().unwrap()]);
    assert!(success, "dir add failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Tracking"));
    assert!(stdout.contains("snapshot"));

    let (stdout, _, success) = run_pxc(&config_path, &["dir", "list"]);
    assert!(success);
    assert!(stdout.contains("photos"));
    assert!(stdout.contains("active"));
}

#[test]
fn test_dir_add_rejects_missing_path() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let missing = tmp.path().join("does-not-exist");
    let (_, _, success) = run_pxc(&config_path, &["dir", "add", missing.to_str().unwrap()]);
    assert!(!success, "adding a missing directory should fail");
}

#[test]
fn test_sync_ingests_tracked_directory() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let photos = tmp.path().join("photos");
    let (stdout, _, success) = run_pxc(
        &config_path,
        &["dir", "add", photos.to_str().unwrap(), "--strategy", "merkle"],
    );
    assert!(success, "dir add failed: {}", stdout);

    let (stdout, stderr, success) = run_pxc(&config_path, &["sync", "1"]);
    assert!(success, "sync failed: {} {}", stdout, stderr);
    assert!(stdout.contains("2 added"), "expected 2 added: {}", stdout);

    // Second sync is a no-op.
    let (stdout, _, success) = run_pxc(&config_path, &["sync", "1"]);
    assert!(success);
    assert!(stdout.contains("0 added"), "expected 0 added: {}", stdout);
    assert!(stdout.contains("2 unchanged"), "expected 2 unchanged: {}", stdout);
}

#[test]
fn test_sync_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let (_, stderr, success) = run_pxc(&config_path, &["sync", "42"]);
    assert!(!success);
    assert!(stderr.contains("42"), "stderr should name the id: {}", stderr);
}

#[test]
fn test_ingest_untracked_directory() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let photos = tmp.path().join("photos");
    let (stdout, stderr, success) =
        run_pxc(&config_path, &["ingest", photos.to_str().unwrap()]);
    assert!(success, "ingest failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Ingested 2"), "got: {}", stdout);
}

#[test]
fn test_status_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let photos = tmp.path().join("photos");
    run_pxc(&config_path, &["dir", "add", photos.to_str().unwrap()]);
    run_pxc(&config_path, &["sync", "1"]);

    let (stdout, _, success) = run_pxc(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("tracked directories: 1"), "got: {}", stdout);
    assert!(stdout.contains("images:              2"), "got: {}", stdout);
}

#[test]
fn test_dir_remove_purges_catalog() {
    let (tmp, config_path) = setup_test_env();
    run_pxc(&config_path, &["init"]);

    let photos = tmp.path().join("photos");
    run_pxc(&config_path, &["dir", "add", photos.to_str().unwrap()]);
    run_pxc(&config_path, &["sync", "1"]);

    let (stdout, _, success) = run_pxc(&config_path, &["dir", "remove", "1"]);
    assert!(success);
    assert!(stdout.contains("Removed"));

    let (stdout, _, _) = run_pxc(&config_path, &["status"]);
    assert!(stdout.contains("tracked directories: 0"), "got: {}", stdout);
    assert!(stdout.contains("images:              0"), "got: {}", stdout);
}
