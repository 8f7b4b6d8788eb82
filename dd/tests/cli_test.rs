//! Command-line tests for the `dd` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SEED: &str = r#"
topics:
  - id: t-ubi
    title: Universal basic income
participants:
  - { id: p-0, name: Ada }
  - { id: p-1, name: Grace }
  - { id: p-2, name: Alan }
  - { id: p-3, name: Barbara }
"#;

/// A temp home with a config pointing the store inside it
fn workspace() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = dir.path().join("store");
    let config = format!(
        "storage:\n  store-dir: {}\nscheduler:\n  roster-size: 4\n  default-mode: quick\n  seed: 3\n",
        store.display()
    );
    fs::write(dir.path().join("dd.yml"), config).unwrap();
    fs::write(dir.path().join("seed.yml"), SEED).unwrap();
    dir
}

fn dd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dd").unwrap();
    cmd.env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .arg("--config")
        .arg(home.join("dd.yml"));
    cmd
}

// =============================================================================
// Help and argument errors
// =============================================================================

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("dd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("dispatch"))
        .stdout(predicate::str::contains("sessions"));
}

#[test]
fn test_unknown_status_is_rejected() {
    let home = workspace();
    dd(home.path())
        .args(["sessions", "--status", "paused"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown session status"));
}

// =============================================================================
// Seed, schedule, inspect
// =============================================================================

#[test]
fn test_seed_schedule_and_list() {
    let home = workspace();

    dd(home.path())
        .arg("seed")
        .arg(home.path().join("seed.yml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded 1 topics, 4 participants"));

    dd(home.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));

    dd(home.path())
        .arg("schedule")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 sessions created (4 seats)"));

    let output = dd(home.path())
        .args(["sessions", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let sessions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["status"], "active");
    assert_eq!(sessions[0]["participant_count"], 4);

    let id = sessions[0]["id"].as_str().unwrap().to_string();
    dd(home.path())
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("== Round 1 [pending] =="));
}

#[test]
fn test_show_unknown_session_fails() {
    let home = workspace();
    dd(home.path())
        .args(["show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No session matches 'nope'"));
}

#[test]
fn test_schedule_records_session_events() {
    let home = workspace();
    dd(home.path())
        .arg("seed")
        .arg(home.path().join("seed.yml"))
        .assert()
        .success();
    dd(home.path()).arg("schedule").assert().success();

    let output = dd(home.path())
        .args(["sessions", "--format", "json"])
        .output()
        .unwrap();
    let sessions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = sessions[0]["id"].as_str().unwrap().to_string();

    dd(home.path())
        .args(["events", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"SessionCreated""#))
        .stdout(predicate::str::contains("No events recorded").not());
}
