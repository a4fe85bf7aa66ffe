//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `tollgate` binary and verify exit codes,
//! stdout content, and stderr content.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `tollgate` binary, rooted at workspace.
fn tollgate() -> Command {
    let mut cmd = cargo_bin_cmd!("tollgate");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("run tollgate");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    tollgate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("participant approval pipeline"));
}

#[test]
fn version_exits_0() {
    tollgate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tollgate"));
}

#[test]
fn unknown_subcommand_fails() {
    tollgate().arg("approve").assert().failure();
}

// ──────────────────────────────────────────────
// 2. stages
// ──────────────────────────────────────────────

#[test]
fn stages_prints_table_text() {
    tollgate()
        .arg("stages")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "TRAINING_VERIFIED -> REVIEW_WAITING, REVIEW_VERIFIED, REVIEW_REVISION",
        ))
        .stdout(predicate::str::contains("LOA_PUBLISHED (terminal)"));
}

#[test]
fn stages_json_lists_every_stage() {
    let json = stdout_json(tollgate().args(["--output", "json", "stages"]));
    assert_eq!(json["initial"], "PAYMENT_REQUIRED");
    assert_eq!(json["terminal"], "LOA_PUBLISHED");
    let transitions = json["transitions"].as_array().unwrap();
    assert_eq!(transitions.len(), 15);
    assert_eq!(transitions[6]["from"], "ARTICLE_VERIFIED");
    assert_eq!(transitions[6]["to"], serde_json::json!(["TRAINING_WAITING"]));
}

// ──────────────────────────────────────────────
// 3. walk
// ──────────────────────────────────────────────

#[test]
fn walk_reaches_published_certificate() {
    tollgate()
        .args(["walk", "--participant", "ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ARTICLE_VERIFIED -> TRAINING_WAITING by ada (SELECT_TRAINING)"))
        .stdout(predicate::str::contains("REVIEW_VERIFIED -> LOA_WAITING by SYSTEM"))
        .stdout(predicate::str::contains("final stage: LOA_PUBLISHED"));
}

#[test]
fn walk_json_includes_flow_and_audit() {
    let json = stdout_json(tollgate().args(["walk", "--output", "json"]));
    assert_eq!(json["flow"]["stage"], "LOA_PUBLISHED");
    assert_eq!(json["flow"]["participant_id"], "participant-1");
    assert_eq!(json["flow"]["reserved_session_id"], "walk-session");
    let audit = json["audit"].as_array().unwrap();
    assert_eq!(audit.len(), 10);
    assert_eq!(audit[0]["from"], "PAYMENT_REQUIRED");
    assert_eq!(audit[9]["metadata"]["action"], "UPLOAD_LOA");
}

// ──────────────────────────────────────────────
// 4. race
// ──────────────────────────────────────────────

#[test]
fn race_never_oversells() {
    let json = stdout_json(tollgate().args([
        "--output",
        "json",
        "race",
        "--capacity",
        "3",
        "--participants",
        "20",
    ]));
    assert_eq!(json["reserved"], 3);
    assert_eq!(json["exhausted"], 17);
    assert_eq!(json["capacity_remaining"], 0);
}

#[test]
fn race_for_started_session_is_all_expired() {
    let json = stdout_json(tollgate().args([
        "--output",
        "json",
        "race",
        "--capacity",
        "5",
        "--participants",
        "4",
        "--starts-in-secs",
        "-60",
    ]));
    assert_eq!(json["reserved"], 0);
    assert_eq!(json["expired"], 4);
    assert_eq!(json["capacity_remaining"], 5);
}

#[test]
fn race_text_summary() {
    tollgate()
        .args(["race", "--capacity", "2", "--participants", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reserved:  2"))
        .stdout(predicate::str::contains("remaining: 0"));
}

#[test]
fn race_with_out_of_range_start_exits_1() {
    tollgate()
        .args([
            "race",
            "--capacity",
            "1",
            "--participants",
            "1",
            "--starts-in-secs",
            "9223372036854775807",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error: --starts-in-secs"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn race_with_far_past_start_exits_1_as_json() {
    tollgate()
        .args([
            "--output",
            "json",
            "race",
            "--capacity",
            "1",
            "--participants",
            "1",
            "--starts-in-secs",
            "-9223372036854775808",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn race_requires_capacity() {
    tollgate()
        .args(["race", "--participants", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--capacity"));
}

// ──────────────────────────────────────────────
// 5. config
// ──────────────────────────────────────────────

#[test]
fn config_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tollgate.toml");
    fs::write(&path, "log_level = \"warn\"\n\n[reservation]\nmax_attempts = 5\n").unwrap();

    tollgate()
        .args(["--config", path.to_str().unwrap(), "stages"])
        .assert()
        .success();
}

#[test]
fn invalid_config_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[reservation]\nmax_attempts = \"lots\"\n").unwrap();

    tollgate()
        .args(["--config", path.to_str().unwrap(), "stages"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn missing_config_json_error() {
    tollgate()
        .args(["--output", "json", "--config", "no/such/file.toml", "stages"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"error\""));
}
