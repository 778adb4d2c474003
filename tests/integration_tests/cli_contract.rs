//! End-to-end `tds run` through the built binary: stdout contract, exit
//! codes, and `tds debug` over the produced run directory.
//!
//! Only the interactive lane runs here - it needs nothing beyond `sh`.

use crate::common::{contract_value, parse_contract, tds_cmd, write_screenplay};

#[test]
fn run_emits_stdout_contract_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        r#"
title: Contract
output: contract
scenarios:
  - label: gate
    execution_mode: interactive
    actions:
      - command: "false"
      - expect_exit_code: 1
"#,
    );

    let output = tds_cmd()
        .arg("run")
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pairs = parse_contract(&stdout);

    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
    assert_eq!(contract_value(&pairs, "STATUS"), Some("success"));
    let run_dir = contract_value(&pairs, "RUN_DIR").expect("RUN_DIR line");
    assert!(run_dir.contains(".terminal_demo_studio_runs/run-"));
    assert!(contract_value(&pairs, "SUMMARY").is_some());
    assert!(contract_value(&pairs, "EVENTS").is_some());
}

#[test]
fn run_failure_exits_one_with_failed_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        r#"
title: Contract
output: contract
scenarios:
  - label: gate
    execution_mode: interactive
    actions:
      - command: "false"
      - expect_exit_code: 0
"#,
    );

    let output = tds_cmd()
        .arg("run")
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pairs = parse_contract(&stdout);

    assert_eq!(output.status.code(), Some(1), "stdout: {stdout}");
    assert_eq!(contract_value(&pairs, "STATUS"), Some("failed"));
}

#[test]
fn debug_triages_a_failed_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        r#"
title: Contract
output: contract
scenarios:
  - label: gate
    execution_mode: interactive
    actions:
      - command: "true"
      - expect_exit_code: 9
"#,
    );

    let run_output = tds_cmd()
        .arg("run")
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&run_output.stdout);
    let pairs = parse_contract(&stdout);
    let run_dir = contract_value(&pairs, "RUN_DIR").expect("RUN_DIR line");

    let debug_output = tds_cmd()
        .arg("debug")
        .arg("--json")
        .arg(run_dir)
        .output()
        .unwrap();
    assert_eq!(debug_output.status.code(), Some(0));
    let triage: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&debug_output.stdout)).unwrap();
    assert_eq!(triage["summary"]["status"], "failed");
    assert!(
        triage["failure_reason"]
            .as_str()
            .is_some_and(|r| r.contains("expected exit code 9"))
    );
}

#[test]
fn doctor_reports_all_lanes() {
    let output = tds_cmd().arg("doctor").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SCRIPTED"));
    assert!(stdout.contains("INTERACTIVE"));
    assert!(stdout.contains("VISUAL"));
}

#[test]
fn forced_local_scripted_without_tools_exits_three() {
    // Only meaningful when vhs is absent, which is the common CI case
    if which_has("vhs") {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_screenplay(
        dir.path(),
        "title: T\noutput: demo\nscenarios:\n  - label: a\n    actions: [\"echo hi\"]\n",
    );
    let output = tds_cmd()
        .arg("run")
        .arg("--local")
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

fn which_has(tool: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {tool}"))
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
