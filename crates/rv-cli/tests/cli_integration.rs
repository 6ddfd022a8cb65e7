//! CLI integration tests for rovnc
//!
//! These run the real binary but never reach the network: every case
//! stops before discovery.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[allow(deprecated)]
fn rovnc(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rovnc").unwrap();
    cmd.current_dir(dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("site.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    rovnc(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote observing"))
        .stdout(predicate::str::contains("--authonly"))
        .stdout(predicate::str::contains("--nosshkey").not());
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    rovnc(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rovnc"));
}

#[test]
fn test_unknown_flag_is_rejected() {
    let dir = TempDir::new().unwrap();
    rovnc(&dir).arg("--bogus").assert().failure();
}

#[test]
fn test_missing_config_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    rovnc(&dir)
        .args(["-c", "does-not-exist.toml"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("PROGRAM ERROR"))
        .stdout(predicate::str::contains("Config file not found"));
}

#[test]
fn test_unknown_account_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "vncviewer = \"none\"\n");
    rovnc(&dir)
        .arg("keck")
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Invalid instrument account"));
}

#[test]
fn test_missing_ssh_key_is_fatal() {
    let dir = TempDir::new().unwrap();
    let key = dir.path().join("missing_id_rsa");
    let config = write_config(
        &dir,
        &format!("vncviewer = \"none\"\nssh_key = \"{}\"\n", key.display()),
    );
    rovnc(&dir)
        .arg("shane")
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("SSH private key path does not exist"))
        .stdout(predicate::str::contains("Attach log file at"));
}

#[test]
fn test_log_file_is_written() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "local_port_start = 0\n");
    rovnc(&dir)
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("local_port_start must be greater than zero"));

    let logs: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("rovnc-utc-"));
    assert!(logs[0].ends_with(".log"));
}
