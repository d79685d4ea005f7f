//! CLI integration tests for slotguard
//!
//! Drives the slotguard binary end-to-end against a throwaway lock table
//! using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A lock table and config directory private to one test
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    #[allow(deprecated)]
    fn cmd(&self, client: &str) -> Command {
        let mut cmd = Command::cargo_bin("slotguard").unwrap();
        cmd.current_dir(self.dir.path())
            .env("SLOTGUARD_CONFIG_DIR", self.dir.path().join("config"))
            .env_remove("RUST_LOG")
            .arg("--database")
            .arg(self.dir.path().join("locks.db"))
            .args(["--client", client]);
        cmd
    }
}

const SLOT_900_1000: [&str; 9] = [
    "--date",
    "2024-05-01",
    "--column",
    "1",
    "--start",
    "900",
    "--end",
    "1000",
    "--provider=7",
];

fn acquire_args(slot: &[&str]) -> Vec<String> {
    std::iter::once("acquire")
        .chain(slot.iter().copied())
        .map(String::from)
        .collect()
}

#[test]
fn test_help_lists_commands() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd("desk-1")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("acquire"))
        .stdout(predicate::str::contains("protect"))
        .stdout(predicate::str::contains("conflicts"));
}

#[test]
fn test_acquire_then_list() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(acquire_args(&SLOT_900_1000))
        .assert()
        .success()
        .stdout(predicate::str::contains("Acquired schedule lock"));

    sandbox
        .cmd("desk-1")
        .arg("locks")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schedule locks:"))
        .stdout(predicate::str::contains("held by desk-1"));
}

#[test]
fn test_overlapping_acquire_by_other_client_fails_with_holder() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(acquire_args(&SLOT_900_1000))
        .assert()
        .success();

    sandbox
        .cmd("desk-2")
        .args([
            "acquire",
            "--date",
            "2024-05-01",
            "--column",
            "1",
            "--start",
            "930",
            "--end",
            "1030",
            "--provider",
            "7",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("locked by desk-1 until"));
}

#[test]
fn test_contained_acquire_by_same_client_reuses_lock() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(acquire_args(&SLOT_900_1000))
        .assert()
        .success();

    sandbox
        .cmd("desk-1")
        .args([
            "acquire",
            "--date",
            "2024-05-01",
            "--column",
            "1",
            "--start",
            "915",
            "--end",
            "945",
            "--provider",
            "7",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Already covered by schedule lock"));
}

#[test]
fn test_adjacent_slot_is_free() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(acquire_args(&SLOT_900_1000))
        .assert()
        .success();

    sandbox
        .cmd("desk-2")
        .args([
            "conflicts",
            "--date",
            "2024-05-01",
            "--column",
            "1",
            "--start",
            "1000",
            "--end",
            "1030",
            "--provider",
            "7",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("is free"));
}

#[test]
fn test_release_only_by_owner() {
    let sandbox = Sandbox::new();

    let output = sandbox
        .cmd("desk-1")
        .arg("--quiet")
        .args(acquire_args(&SLOT_900_1000))
        .output()
        .unwrap();
    assert!(output.status.success());
    let lock_id = String::from_utf8(output.stdout).unwrap().trim().to_string();

    sandbox
        .cmd("desk-2")
        .args(["release", &lock_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("held by another client"));

    sandbox
        .cmd("desk-1")
        .args(["release", &lock_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released"));

    sandbox
        .cmd("desk-1")
        .args(["release", &lock_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to release"));
}

#[test]
fn test_acquire_json_output() {
    let sandbox = Sandbox::new();

    let output = sandbox
        .cmd("desk-1")
        .args(["--format", "json"])
        .args(acquire_args(&SLOT_900_1000))
        .output()
        .unwrap();
    assert!(output.status.success());

    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["client_id"], "desk-1");
    assert_eq!(body["created"], true);
    assert!(body["lock_id"].as_str().is_some());
}

#[test]
fn test_conflict_json_output_lists_holders() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(acquire_args(&SLOT_900_1000))
        .assert()
        .success();

    let output = sandbox
        .cmd("desk-2")
        .args(["--format", "json"])
        .args(acquire_args(&SLOT_900_1000))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["code"], "E300");
    assert_eq!(body["conflicts"][0]["client_id"], "desk-1");
}

#[test]
fn test_invalid_slot_rejected() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args([
            "acquire",
            "--date",
            "2024-05-01",
            "--start",
            "1000",
            "--end",
            "900",
            "--provider",
            "7",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid schedule slot"));
}

#[test]
fn test_protect_conflict_and_unprotect() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(["protect", "--appointment", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Protected appointment 42"));

    sandbox
        .cmd("desk-2")
        .args(["protect", "--appointment", "42"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("locked by desk-1 until"));

    sandbox
        .cmd("desk-2")
        .args(["conflicts", "--appointment", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("locked by desk-1"));

    sandbox
        .cmd("desk-1")
        .args(["unprotect", "--appointment", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released"));

    sandbox
        .cmd("desk-2")
        .args(["protect", "--appointment", "42"])
        .assert()
        .success();
}

#[test]
fn test_refresh_by_other_client_conflicts() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(["protect", "--appointment", "8", "--duration", "60"])
        .assert()
        .success();

    sandbox
        .cmd("desk-1")
        .args(["refresh", "--appointment", "8", "--duration", "120"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Refreshed protection on appointment 8"));

    sandbox
        .cmd("desk-2")
        .args(["refresh", "--appointment", "8"])
        .assert()
        .code(2);
}

#[test]
fn test_purge_on_empty_table() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 expired lock(s)."));
}

#[test]
fn test_locks_empty() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .arg("locks")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active locks."));
}

#[test]
fn test_config_set_get_reset() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(["config", "set", "locking.schedule_lock_ttl_secs", "120"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set locking.schedule_lock_ttl_secs = 120"));

    sandbox
        .cmd("desk-1")
        .args(["config", "get", "locking.schedule_lock_ttl_secs"])
        .assert()
        .success()
        .stdout(predicate::str::diff("120\n"));

    sandbox
        .cmd("desk-1")
        .args(["config", "reset"])
        .assert()
        .success();

    sandbox
        .cmd("desk-1")
        .args(["config", "get", "locking.schedule_lock_ttl_secs"])
        .assert()
        .success()
        .stdout(predicate::str::diff("300\n"));
}

#[test]
fn test_config_rejects_bad_value() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(["config", "set", "locking.protection_lock_ttl_secs", "99999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds"));
}

#[test]
fn test_config_unknown_key() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd("desk-1")
        .args(["config", "get", "nonexistent.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}
