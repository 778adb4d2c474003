//! `tds lint` through the built binary.

use crate::common::{tds_cmd, write_screenplay};

const APPROVE_WITHOUT_ALLOW: &str = r#"
title: T
output: demo
agent_prompts:
  mode: approve
  prompt_regex: "Proceed\\?"
  max_rounds: 2
scenarios:
  - label: a
    execution_mode: visual
    actions: ["echo hi"]
"#;

#[test]
fn approve_without_allow_regex_warns_but_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(dir.path(), APPROVE_WITHOUT_ALLOW);
    let output = tds_cmd().arg("lint").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("allow_regex"), "stderr: {stderr}");
}

#[test]
fn strict_promotes_warning_to_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(dir.path(), APPROVE_WITHOUT_ALLOW);
    let output = tds_cmd().arg("lint").arg("--strict").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unscoped_allow_regex_fails_without_strict() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        r#"
title: T
output: demo
agent_prompts:
  mode: approve
  prompt_regex: "Proceed\\?"
  allow_regex: ".*"
  max_rounds: 2
scenarios:
  - label: a
    execution_mode: visual
    actions: ["echo hi"]
"#,
    );
    let output = tds_cmd().arg("lint").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn json_output_parses_and_carries_field_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(dir.path(), APPROVE_WITHOUT_ALLOW);
    let output = tds_cmd().arg("lint").arg("--json").arg(&path).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let findings: Vec<serde_json::Value> = serde_json::from_str(&stdout).expect("json findings");
    assert!(!findings.is_empty());
    assert!(findings.iter().any(|f| {
        f["field_path"]
            .as_str()
            .is_some_and(|p| p.contains("allow_regex"))
    }));
}

#[test]
fn clean_screenplay_lints_clean() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: T\noutput: demo\nscenarios:\n  - label: a\n    actions: [\"echo hi\"]\n",
    );
    let output = tds_cmd().arg("lint").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("clean"), "stdout: {stdout}");
}
