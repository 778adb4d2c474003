//! `tds validate` through the built binary.

use crate::common::{tds_cmd, write_screenplay};

#[test]
fn valid_screenplay_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: T\noutput: demo\nscenarios:\n  - label: a\n    actions: [\"echo hi\"]\n",
    );
    let output = tds_cmd().arg("validate").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn invalid_screenplay_exits_two_with_field_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(dir.path(), "title: T\noutput: demo\nscenarios: []\n");
    let output = tds_cmd().arg("validate").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scenarios"), "stderr: {stderr}");
}

#[test]
fn key_in_interactive_lane_is_rejected_at_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: T\noutput: demo\nscenarios:\n  - label: a\n    execution_mode: interactive\n    actions:\n      - key: enter\n",
    );
    let output = tds_cmd().arg("validate").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("interactive primitive unsupported in pty lane"),
        "stderr: {stderr}"
    );
}

#[test]
fn explain_prints_normalized_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: Demo Title\noutput: demo\nscenarios:\n  - label: intro\n    actions:\n      - command: echo hi\n      - sleep: 1s\n",
    );
    let output = tds_cmd()
        .arg("validate")
        .arg("--explain")
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("intro"));
    assert!(stdout.contains("command"));
    assert!(stdout.contains("sleep"));
}

#[test]
fn json_schema_is_valid_json() {
    let output = tds_cmd()
        .arg("validate")
        .arg("--json-schema")
        .arg("unused.yaml")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let schema: serde_json::Value = serde_json::from_str(&stdout).expect("schema parses");
    assert!(schema.get("$schema").is_some() || schema.get("title").is_some());
}

#[test]
fn unknown_action_key_suggests_nearest() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: T\noutput: demo\nscenarios:\n  - label: a\n    actions:\n      - wait_fro: x\n",
    );
    let output = tds_cmd().arg("validate").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("wait_for"), "stderr: {stderr}");
}
