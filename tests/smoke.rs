//! Smoke tests -- verify the binary parses its arguments and survives an empty run.

use assert_cmd::Command;
use predicates::prelude::*;

fn circuitcheck() -> Command {
    Command::cargo_bin("circuitcheck").unwrap()
}

#[test]
fn test_cli_help() {
    circuitcheck()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--client-list"))
        .stdout(predicate::str::contains("--output-file"));
}

#[test]
fn test_cli_version() {
    circuitcheck()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("circuitcheck"));
}

#[test]
fn test_missing_output_file_is_rejected() {
    circuitcheck()
        .args(["-c", "clients.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output-file"));
}

/// Inventory that refuses connections: the run proceeds with no devices and
/// still writes a valid, empty report.
fn unreachable_inventory_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("circuitcheck.toml");
    std::fs::write(
        &path,
        r#"
[inventory]
url = "http://127.0.0.1:9"
repeat_counter = 0
retry_delay_ms = 1
"#,
    )
    .unwrap();
    path
}

#[test]
fn test_empty_run_writes_empty_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = unreachable_inventory_config(dir.path());

    circuitcheck()
        .current_dir(dir.path())
        .env_remove("CIRCUITCHECK_CONFIG")
        .arg("--config")
        .arg(&config)
        .args(["-c", "clients.txt", "-o", "result.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EXECUTION STARTED"))
        .stdout(predicate::str::contains("TOTAL NUMBER OF DEVICES TO BE TESTED: 0"));

    assert_eq!(
        std::fs::read_to_string(dir.path().join("result.json")).unwrap(),
        "{}\r\n"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("clients.txt")).unwrap(), "");
    assert!(dir.path().join("output/run/output.log").exists());
    assert!(dir.path().join("output/files").is_dir());
}

#[test]
fn test_unwritable_client_list_is_fatal() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = unreachable_inventory_config(dir.path());

    circuitcheck()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["-c", "missing/dir/clients.txt", "-o", "result.json"])
        .assert()
        .failure();

    assert!(!dir.path().join("result.json").exists());
}

#[test]
fn test_broken_env_config_is_reported_in_run_log() {
    let dir = tempfile::TempDir::new().unwrap();
    unreachable_inventory_config(dir.path());
    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[inventory\nurl = ").unwrap();

    circuitcheck()
        .current_dir(dir.path())
        .env("CIRCUITCHECK_CONFIG", &broken)
        .args(["-c", "clients.txt", "-o", "result.json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("broken.toml"));

    let log = std::fs::read_to_string(dir.path().join("output/run/output.log")).unwrap();
    assert!(log.contains("config file could not be loaded"));
    assert!(log.contains("circuitcheck.toml"));
}
