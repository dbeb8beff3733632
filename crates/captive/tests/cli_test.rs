//! Integration tests for the `captive` CLI binary.
//!
//! Everything here runs without a router: argument parsing, completions,
//! config editing, and `--dry-run` against the in-memory device.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command with env isolation, config rooted at `home`.
fn captive_cmd(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("captive");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("CAPTIVE_PROFILE")
        .env_remove("CAPTIVE_URL")
        .env_remove("CAPTIVE_USERNAME")
        .env_remove("CAPTIVE_PASSWORD")
        .env_remove("CAPTIVE_OUTPUT")
        .env_remove("CAPTIVE_INSECURE")
        .env_remove("CAPTIVE_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn isolated() -> (tempfile::TempDir, assert_cmd::Command) {
    let home = tempfile::tempdir().unwrap();
    let cmd = captive_cmd(home.path());
    (home, cmd)
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let (_home, mut cmd) = isolated();
    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let (_home, mut cmd) = isolated();
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("provision")
            .and(predicate::str::contains("admit"))
            .and(predicate::str::contains("revoke"))
            .and(predicate::str::contains("sweep")),
    );
}

#[test]
fn test_version_flag() {
    let (_home, mut cmd) = isolated();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("captive"));
}

#[test]
fn test_completions_zsh() {
    let (_home, mut cmd) = isolated();
    cmd.args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_bash() {
    let (_home, mut cmd) = isolated();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let (_home, mut cmd) = isolated();
    let output = cmd.arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

#[test]
fn test_clients_without_router_is_usage_error() {
    let (_home, mut cmd) = isolated();
    let output = cmd.arg("clients").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No router configured"));
}

#[test]
fn test_payment_redirect_rejects_bad_mac() {
    let (_home, mut cmd) = isolated();
    let output = cmd
        .args(["payment-redirect", "not-a-mac", "https://pay.example.com", "--dry-run"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("mac"));
}

#[test]
fn test_name_requires_building() {
    let (_home, mut cmd) = isolated();
    cmd.args(["provision", "--name", "north", "--dry-run"])
        .assert()
        .code(2);
}

// ── Dry run ─────────────────────────────────────────────────────────

#[test]
fn test_provision_dry_run_prints_commands() {
    let (_home, mut cmd) = isolated();
    cmd.args(["provision", "--dry-run", "--color", "never"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("# dry run")
                .and(predicate::str::contains("/ip/pool/add"))
                .and(predicate::str::contains("/ip/hotspot/add"))
                .and(predicate::str::contains("created")),
        );
}

#[test]
fn test_provision_dry_run_plain_report() {
    let (_home, mut cmd) = isolated();
    cmd.args(["provision", "--dry-run", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("isolate-wan").and(predicate::str::contains("hotspot created")));
}

#[test]
fn test_admit_before_provisioning_reports_missing_pool() {
    let (_home, mut cmd) = isolated();
    let output = cmd.args(["admit", "user-42", "--dry-run"]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("hs-pool-1"));
}

#[test]
fn test_publish_dry_run_uploads_directory() {
    let (home, mut cmd) = isolated();
    let pages = home.path().join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    std::fs::write(pages.join("login.html"), "<html>login</html>").unwrap();

    cmd.args(["publish", "--dry-run"])
        .arg(&pages)
        .assert()
        .success()
        .stdout(predicate::str::contains("/file/print"))
        .stderr(predicate::str::contains("uploaded login.html"));
}

#[test]
fn test_publish_empty_directory_is_rejected() {
    let (home, mut cmd) = isolated();
    let pages = home.path().join("empty");
    std::fs::create_dir_all(&pages).unwrap();
    cmd.args(["publish", "--dry-run"]).arg(&pages).assert().code(2);
}

#[test]
fn test_sweep_without_profiles_fails_every_user() {
    let (_home, mut cmd) = isolated();
    let output = cmd
        .args(["sweep", "user-1", "user-2", "--dry-run", "-o", "json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"user_id\": \"user-1\""));
    assert!(stdout.contains("No router serves user"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_set_then_show() {
    let home = tempfile::tempdir().unwrap();
    captive_cmd(home.path())
        .args(["config", "set", "url", "https://10.0.0.1"])
        .assert()
        .success();
    captive_cmd(home.path())
        .args(["config", "set", "users", "user-42, user-43"])
        .assert()
        .success();

    captive_cmd(home.path())
        .args(["config", "show", "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("https://10.0.0.1")
                .and(predicate::str::contains("user-43")),
        );
}

#[test]
fn test_config_set_rejects_unknown_key() {
    let (_home, mut cmd) = isolated();
    cmd.args(["config", "set", "site", "default"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown config key"));
}

#[test]
fn test_config_use_unknown_profile() {
    let (_home, mut cmd) = isolated();
    cmd.args(["config", "use", "south"]).assert().code(4);
}
