//! Binary smoke tests: argument parsing and fail-fast config validation.
//!
//! Every case here exits before touching stdin, the network, or `zfs`, so
//! none of it depends on external services.

use std::process::Command;

fn clean_env(cmd: &mut Command) {
    cmd.env_remove("ZFS3BACKUP_CONFIG")
        .env_remove("BUCKET")
        .env_remove("FILESYSTEM")
        .env_remove("PROFILE")
        .env_remove("AWS_PROFILE")
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env("HOME", "/nonexistent-for-tests");
}

#[test]
fn pput_rejects_conflicting_chunk_size_and_estimated() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pput"));
    clean_env(&mut cmd);
    let output = cmd
        .args(["--chunk-size", "5M", "--estimated", "100M", "some-key"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"), "stderr: {stderr}");
}

#[test]
fn pput_fails_fast_without_a_configured_bucket() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pput"));
    clean_env(&mut cmd);
    let output = cmd.arg("some-key").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bucket") || stderr.contains("BUCKET"), "stderr: {stderr}");
}

#[test]
fn zfs3backup_get_fails_fast_without_a_configured_bucket() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zfs3backup-get"));
    clean_env(&mut cmd);
    let output = cmd.arg("some-key").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn s3_mp_cleanup_fails_fast_without_a_configured_bucket() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_s3-mp-cleanup"));
    clean_env(&mut cmd);
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn zfs3backup_backup_rejects_conflicting_full_and_incremental() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zfs3backup"));
    clean_env(&mut cmd);
    let output = cmd
        .args(["backup", "--full", "--incremental"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"), "stderr: {stderr}");
}

#[test]
fn zfs3backup_fails_fast_without_a_configured_filesystem() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zfs3backup"));
    clean_env(&mut cmd);
    cmd.env("BUCKET", "test-bucket");
    let output = cmd.arg("status").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FILESYSTEM"), "stderr: {stderr}");
}

#[test]
fn zfs3backup_shows_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zfs3backup"));
    clean_env(&mut cmd);
    let output = cmd.arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("backup") && stdout.contains("restore") && stdout.contains("status"));
}
