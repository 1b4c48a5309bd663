//! CLI smoke tests against the stub tool server
//!
//! Each invocation is a separate process with `BRDFLOW_HOME` pointing at a
//! temp directory, so runs are driven the way an operator drives them:
//! `run` exits at the review gate and `reply` picks the run up again.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BRD: &str = "\
# Online Store

## Functional Requirements
- FR1: User registration: create an account with email; verify the email address
- FR2: Product search
- FR3: Shopping cart: keep items between sessions
- FR4: Checkout

## Non-Functional Requirements
- NFR1: Page load: pages render within 2 seconds
- NFR2: Security - all traffic uses TLS
";

fn stub_command() -> String {
    env!("CARGO_BIN_EXE_brdflow-tool-stub").to_string()
}

fn brdflow(home: &Path) -> Command {
    brdflow_with_tool(home, &stub_command())
}

#[allow(clippy::expect_used)]
fn brdflow_with_tool(home: &Path, tool_command: &str) -> Command {
    let mut cmd = Command::cargo_bin("brdflow").expect("brdflow binary");
    cmd.current_dir(home)
        .env("BRDFLOW_HOME", home.join(".brdflow"))
        .env_remove("RUST_LOG")
        .args(["--min-wait-before-call-ms", "0", "--tool-command", tool_command]);
    cmd
}

#[allow(clippy::expect_used)]
fn write_brd(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("requirements.md");
    std::fs::write(&path, BRD).expect("write BRD");
    path
}

#[test]
fn test_help_lists_commands() {
    brdflow(Path::new("."))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("reply"))
        .stdout(predicate::str::contains("resume"));
}

#[test]
fn test_run_stops_at_review_then_reply_completes() {
    let dir = TempDir::new().unwrap();
    let brd = write_brd(&dir);

    brdflow(dir.path())
        .args(["run", "shop-1", "--platform", "jira", "--brd"])
        .arg(&brd)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Gate B"))
        .stdout(predicate::str::contains("brdflow reply shop-1"));

    brdflow(dir.path())
        .args(["status", "shop-1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"awaiting_gate\""))
        .stdout(predicate::str::contains("\"total_items\":12"));

    brdflow(dir.path())
        .args(["reply", "shop-1", "approve"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("created:      12"));

    assert!(
        dir.path()
            .join(".brdflow/runs/shop-1/artifacts/summary.md")
            .exists()
    );

    // A closed run cannot be resumed
    brdflow(dir.path())
        .args(["resume", "shop-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already finished"));
}

#[test]
fn test_rejected_creations_escalate_with_compensation() {
    let dir = TempDir::new().unwrap();
    let brd = write_brd(&dir);
    let stub = format!("{} --fail-title Checkout", stub_command());

    brdflow_with_tool(dir.path(), &stub)
        .args(["run", "shop-2", "--platform", "jira", "--brd"])
        .arg(&brd)
        .assert()
        .code(3);

    // Four stories at one level; one failure is 25%, above the threshold
    brdflow_with_tool(dir.path(), &stub)
        .args(["reply", "shop-2", "approve"])
        .assert()
        .code(12)
        .stderr(predicate::str::contains("compensation"));
}

#[test]
fn test_status_of_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    brdflow(dir.path())
        .args(["status", "nope"])
        .assert()
        .failure();
}

#[test]
fn test_unusable_run_id_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let brd = write_brd(&dir);
    brdflow(dir.path())
        .args(["run", "../..", "--platform", "jira", "--brd"])
        .arg(&brd)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("run_id"));
}

#[test]
fn test_config_show_attributes_cli_values() {
    let dir = TempDir::new().unwrap();
    brdflow(dir.path())
        .args(["--max-retries", "5", "config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries"))
        .stdout(predicate::str::contains("5  (cli)"));
}

#[test]
fn test_cancel_then_resume_returns_to_gate() {
    let dir = TempDir::new().unwrap();
    let brd = write_brd(&dir);

    brdflow(dir.path())
        .args(["cancel", "shop-3"])
        .assert()
        .failure();

    brdflow(dir.path())
        .args(["run", "shop-3", "--platform", "jira", "--brd"])
        .arg(&brd)
        .assert()
        .code(3);

    brdflow(dir.path())
        .args(["cancel", "shop-3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancellation requested"));
    assert!(dir.path().join(".brdflow/runs/shop-3/cancel").exists());

    brdflow(dir.path())
        .args(["resume", "shop-3"])
        .assert()
        .code(3);
    assert!(!dir.path().join(".brdflow/runs/shop-3/cancel").exists());
}
