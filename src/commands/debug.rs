//! `tds debug` - triage summary from a run directory's artifacts.

use std::path::Path;

use serde_json::Value;

use terminal_demo_studio::error::{EXIT_EXECUTION_FAILURE, EXIT_SUCCESS};
use terminal_demo_studio::styling::{
    eprintln, error_message, format_heading, format_with_gutter, print, println, success_message,
};

/// How many trailing events the text triage shows.
const EVENT_TAIL: usize = 10;

pub fn execute(run_dir: &Path, json: bool) -> i32 {
    if !run_dir.is_dir() {
        eprintln!(
            "{}",
            error_message(format!("{} is not a run directory", run_dir.display()))
        );
        return EXIT_EXECUTION_FAILURE;
    }

    let summary = read_json(&run_dir.join("summary.json"));
    let manifest = read_json(&run_dir.join("manifest.json"));
    let events = read_events(&run_dir.join("runtime").join("events.jsonl"));
    let failure_reason = std::fs::read_to_string(run_dir.join("failure").join("reason.txt")).ok();
    let failure_step = read_json(&run_dir.join("failure").join("step.json"));

    if json {
        let triage = serde_json::json!({
            "run_dir": run_dir.display().to_string(),
            "manifest": manifest,
            "summary": summary,
            "last_events": events.iter().rev().take(EVENT_TAIL).rev().collect::<Vec<_>>(),
            "failure_reason": failure_reason,
            "failure_step": failure_step,
        });
        println!("{}", serde_json::to_string_pretty(&triage).unwrap_or_default());
        return EXIT_SUCCESS;
    }

    let status = summary
        .as_ref()
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let lane = summary
        .as_ref()
        .and_then(|s| s.get("lane"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    println!("{}", format_heading("RUN", Some(&run_dir.display().to_string())));
    match status {
        "success" => println!("{}", success_message(format!("status: success (lane: {lane})"))),
        other => println!("{}", error_message(format!("status: {other} (lane: {lane})"))),
    }

    if let Some(manifest) = &manifest {
        if let Some(title) = manifest.get("title").and_then(Value::as_str) {
            println!("title: {title}");
        }
        if let Some(digest) = manifest.get("input_digest").and_then(Value::as_str) {
            println!("input: {}", &digest[..digest.len().min(12)]);
        }
    }

    if !events.is_empty() {
        println!();
        println!("{}", format_heading("LAST EVENTS", None));
        for event in events.iter().rev().take(EVENT_TAIL).rev() {
            let line = format!(
                "#{} s{}.a{} {} @{}ms",
                event.get("seq").and_then(Value::as_u64).unwrap_or(0),
                event.get("scenario").and_then(Value::as_u64).unwrap_or(0),
                event.get("step").and_then(Value::as_u64).unwrap_or(0),
                event.get("kind").and_then(Value::as_str).unwrap_or("?"),
                event.get("ts_ms").and_then(Value::as_u64).unwrap_or(0),
            );
            println!("  {line}");
        }
    }

    if let Some(reason) = &failure_reason {
        println!();
        println!("{}", format_heading("FAILURE", None));
        print!("{}", format_with_gutter(reason.trim_end()));
        if let Some(step) = &failure_step {
            if let Some(action) = step.get("action") {
                println!(
                    "offending step: {}",
                    serde_json::to_string(action).unwrap_or_default()
                );
            }
        }
    }

    EXIT_SUCCESS
}

fn read_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn read_events(path: &Path) -> Vec<Value> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
