//! Run-directory contract: layout, invariants between summary and failure
//! bundle, event ordering.

use crate::common::LaneFixture;
use terminal_demo_studio::artifacts::RUNS_DIR_NAME;
use terminal_demo_studio::lanes::{finish_run, pty};
use terminal_demo_studio::screenplay::Screenplay;

fn play(source: &str) -> Screenplay {
    Screenplay::from_yaml(source, std::path::Path::new("/tmp")).expect("valid screenplay")
}

#[test]
fn successful_run_has_summary_and_no_failure_dir() {
    let play = play(
        r#"
title: Layout
output: layout
scenarios:
  - label: one
    execution_mode: interactive
    actions:
      - command: echo done-one
      - wait_for: done-one
        wait_timeout: 5s
  - label: two
    execution_mode: interactive
    actions:
      - command: echo done-two
      - wait_for: done-two
        wait_timeout: 5s
"#,
    );
    let fixture = LaneFixture::new();
    let ctx = fixture.context(&play);

    let result = pty::run(&ctx).expect("lane runs");
    let summary = finish_run(&ctx, &result, "interactive").expect("summary");

    assert_eq!(summary.scenarios.len(), 2);
    assert!(fixture.run.summary_path().exists());
    assert!(fixture.run.events_path().exists());
    // No failure bundle on success
    assert!(!fixture.run.failure_dir().exists());

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixture.run.summary_path()).unwrap())
            .unwrap();
    assert_eq!(parsed["status"], "success");
}

#[test]
fn failed_run_summary_matches_failure_bundle() {
    let play = play(
        r#"
title: Layout
output: layout
scenarios:
  - label: boom
    execution_mode: interactive
    actions:
      - command: "true"
      - expect_exit_code: 7
"#,
    );
    let fixture = LaneFixture::new();
    let ctx = fixture.context(&play);

    let result = pty::run(&ctx).expect("lane runs");
    finish_run(&ctx, &result, "interactive").expect("summary");

    // Invariant: failure bundle present <=> status failed
    assert!(fixture.run.failure_dir().join("reason.txt").exists());
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixture.run.summary_path()).unwrap())
            .unwrap();
    assert_eq!(parsed["status"], "failed");
}

#[test]
fn run_dir_lives_under_canonical_root() {
    let fixture = LaneFixture::new();
    let path = fixture.run.path();
    assert!(path.starts_with(fixture.run_root.path().join(RUNS_DIR_NAME)));
    assert!(fixture.run.id().len() >= 12);
}

#[test]
fn event_sequence_is_strictly_monotonic() {
    let play = play(
        r#"
title: Events
output: events
scenarios:
  - label: seq
    execution_mode: interactive
    actions:
      - command: echo a
      - command: echo b
      - command: echo c
"#,
    );
    let fixture = LaneFixture::new();
    let ctx = fixture.context(&play);

    pty::run(&ctx).expect("lane runs");

    let events = std::fs::read_to_string(fixture.run.events_path()).unwrap();
    let seqs: Vec<u64> = events
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["seq"].as_u64().unwrap())
        .collect();
    assert!(!seqs.is_empty());
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "seqs: {seqs:?}");

    let ts: Vec<u64> = events
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["ts_ms"].as_u64().unwrap())
        .collect();
    assert!(ts.windows(2).all(|w| w[0] <= w[1]), "timestamps: {ts:?}");
}

#[test]
fn redacted_values_never_reach_failure_artifacts() {
    let play = play(
        r#"
title: Redact
output: redact
variables:
  DEMO_API_KEY: sekrit-value-123
scenarios:
  - label: leak
    execution_mode: interactive
    actions:
      - command: "echo sekrit-value-123 && false"
      - expect_exit_code: 0
"#,
    );
    let fixture = LaneFixture::new();
    let ctx = fixture.context(&play);

    let result = pty::run(&ctx).expect("lane runs");
    assert!(result.failure.is_some());

    for name in ["reason.txt", "screen.txt", "step.json"] {
        let path = fixture.run.failure_dir().join(name);
        if path.exists() {
            let content = std::fs::read_to_string(&path).unwrap();
            assert!(
                !content.contains("sekrit-value-123"),
                "{name} leaked the secret: {content}"
            );
        }
    }
}
