//! Artifact writer: the canonical run directory.
//!
//! Layout, stable across lanes:
//!
//! ```text
//! <run_root>/.terminal_demo_studio_runs/run-<id>/
//!   manifest.json         # input digest, lane, settings, tool versions
//!   summary.json          # status, lane, media paths, timings, counters
//!   media/*.gif|*.mp4
//!   scenes/scene_<i>.mp4  # scripted and visual lanes
//!   tapes/scene_<i>.tape  # scripted lane only
//!   runtime/events.jsonl  # interactive and visual lanes
//!   failure/              # created only on failure, fully value-redacted
//! ```
//!
//! The run directory is the unit of isolation: nothing outside this module
//! mutates it. Manifest and summary are written atomically (write-then-
//! rename); events are appended line-by-line, each line self-contained JSON
//! with a monotonic sequence number.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::redact::RedactionSet;
use crate::screenplay::Settings;
use crate::utils;

/// Directory under the run root that holds all runs.
pub const RUNS_DIR_NAME: &str = ".terminal_demo_studio_runs";

/// Event kinds in the per-step event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Dispatched,
    Waiting,
    Asserting,
    Passed,
    Failed,
    TimedOut,
    Approved,
    Denied,
}

/// One line of `events.jsonl`.
#[derive(Debug, Serialize)]
pub struct Event {
    pub seq: u64,
    pub scenario: usize,
    pub step: usize,
    pub kind: EventKind,
    /// Milliseconds since the run started, from a monotonic clock.
    pub ts_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Final run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// `manifest.json`: what this run was asked to do.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub run_id: String,
    /// SHA-256 of the input document, hex-encoded.
    pub input_digest: String,
    pub lane: String,
    pub title: String,
    pub output: String,
    pub settings: Settings,
    pub created_at: String,
    /// Probed `tool --version` lines, keyed by tool name.
    pub tool_versions: IndexMap<String, String>,
}

/// Per-scenario outcome recorded in the summary.
#[derive(Debug, Serialize)]
pub struct ScenarioOutcome {
    pub label: String,
    pub status: RunStatus,
    pub duration_ms: u64,
}

/// `summary.json`: what happened.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub status: RunStatus,
    pub lane: String,
    pub media: Vec<PathBuf>,
    pub scenarios: Vec<ScenarioOutcome>,
    pub started_at: String,
    pub duration_ms: u64,
    pub event_count: u64,
}

/// What goes into `failure/` on the first unrecoverable failure.
#[derive(Debug, Default)]
pub struct FailureBundle {
    pub reason: String,
    /// Final screen snapshot, when a lane has one.
    pub screen: Option<String>,
    /// Offending step payload.
    pub step: Option<serde_json::Value>,
    /// Process logs from the visual lane's recorder stack.
    pub video_runner_log: Option<String>,
}

/// Handle to one run's directory.
#[derive(Debug)]
pub struct RunDir {
    id: String,
    path: PathBuf,
    started: Instant,
    started_at: String,
}

impl RunDir {
    /// Create the canonical directory for a fresh run under `run_root`.
    pub fn create(run_root: &Path) -> std::io::Result<Self> {
        let id = utils::generate_run_id();
        let path = run_root.join(RUNS_DIR_NAME).join(format!("run-{id}"));
        fs::create_dir_all(&path)?;
        Ok(Self {
            id,
            path,
            started: Instant::now(),
            started_at: utils::now_iso8601(),
        })
    }

    /// Open an existing run directory (for `tds debug`).
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if !path.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a run directory", path.display()),
            ));
        }
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("run-"))
            .unwrap_or("unknown")
            .to_string();
        Ok(Self {
            id,
            path: path.to_path_buf(),
            started: Instant::now(),
            started_at: utils::now_iso8601(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Milliseconds since this run directory was created (monotonic).
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn media_dir(&self) -> std::io::Result<PathBuf> {
        self.subdir("media")
    }

    pub fn scenes_dir(&self) -> std::io::Result<PathBuf> {
        self.subdir("scenes")
    }

    pub fn tapes_dir(&self) -> std::io::Result<PathBuf> {
        self.subdir("tapes")
    }

    pub fn runtime_dir(&self) -> std::io::Result<PathBuf> {
        self.subdir("runtime")
    }

    fn subdir(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.path.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join("manifest.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join("summary.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.path.join("runtime").join("events.jsonl")
    }

    pub fn failure_dir(&self) -> PathBuf {
        self.path.join("failure")
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> std::io::Result<()> {
        self.write_json_atomic(&self.manifest_path(), manifest)
    }

    pub fn write_summary(&self, summary: &Summary) -> std::io::Result<()> {
        self.write_json_atomic(&self.summary_path(), summary)
    }

    /// Write-then-rename so readers never observe a torn file.
    fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Open the append-only event log for this run.
    pub fn events_writer(&self) -> std::io::Result<EventsWriter> {
        let dir = self.runtime_dir()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;
        Ok(EventsWriter {
            file,
            seq: 0,
            started: self.started,
        })
    }

    /// Write the failure bundle. Every text artifact is value-redacted;
    /// failure-artifact redaction is always on regardless of the media mode.
    pub fn write_failure_bundle(
        &self,
        bundle: &FailureBundle,
        redact: &RedactionSet,
    ) -> std::io::Result<()> {
        let dir = self.failure_dir();
        fs::create_dir_all(&dir)?;

        fs::write(dir.join("reason.txt"), redact.apply(&bundle.reason))?;

        if let Some(screen) = &bundle.screen {
            fs::write(dir.join("screen.txt"), redact.apply(screen))?;
        }

        if let Some(step) = &bundle.step {
            let json = serde_json::to_string_pretty(step)?;
            fs::write(dir.join("step.json"), redact.apply(&json))?;
        }

        if let Some(log) = &bundle.video_runner_log {
            fs::write(dir.join("video_runner.log"), redact.apply(log))?;
        }

        Ok(())
    }

    /// Emit the `KEY=VALUE` stdout contract for external tools.
    pub fn emit_stdout_contract(&self, summary: &Summary) {
        println!("STATUS={}", summary.status);
        println!("RUN_DIR={}", self.path.display());
        for media in &summary.media {
            match media.extension().and_then(|e| e.to_str()) {
                Some("gif") => println!("MEDIA_GIF={}", media.display()),
                Some("mp4") => println!("MEDIA_MP4={}", media.display()),
                _ => {}
            }
        }
        println!("SUMMARY={}", self.summary_path().display());
        if self.events_path().exists() {
            println!("EVENTS={}", self.events_path().display());
        }
    }
}

/// Append-only writer for `events.jsonl`.
///
/// Each line is self-contained JSON carrying a strictly monotonic `seq`, so a
/// partially written final line never corrupts earlier events.
#[derive(Debug)]
pub struct EventsWriter {
    file: File,
    seq: u64,
    started: Instant,
}

impl EventsWriter {
    pub fn append(
        &mut self,
        scenario: usize,
        step: usize,
        kind: EventKind,
        payload: Option<serde_json::Value>,
    ) -> std::io::Result<u64> {
        let seq = self.seq;
        self.seq += 1;
        let event = Event {
            seq,
            scenario,
            step,
            kind,
            ts_ms: self.started.elapsed().as_millis() as u64,
            payload,
        };
        let line = serde_json::to_string(&event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(seq)
    }

    pub fn count(&self) -> u64 {
        self.seq
    }
}

/// SHA-256 digest of the raw input document, hex-encoded for the manifest.
pub fn input_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screenplay::Settings;

    fn run_dir() -> (tempfile::TempDir, RunDir) {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDir::create(tmp.path()).unwrap();
        (tmp, run)
    }

    #[test]
    fn test_create_makes_canonical_layout() {
        let (tmp, run) = run_dir();
        assert!(run.path().starts_with(tmp.path().join(RUNS_DIR_NAME)));
        assert!(run.path().is_dir());
        assert!(
            run.path()
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("run-")
        );
        assert!(run.id().len() >= 12);
    }

    #[test]
    fn test_manifest_written_atomically() {
        let (_tmp, run) = run_dir();
        let manifest = Manifest {
            run_id: run.id().to_string(),
            input_digest: input_digest("doc"),
            lane: "scripted".to_string(),
            title: "Demo".to_string(),
            output: "demo".to_string(),
            settings: Settings::default(),
            created_at: crate::utils::now_iso8601(),
            tool_versions: IndexMap::new(),
        };
        run.write_manifest(&manifest).unwrap();
        let content = fs::read_to_string(run.manifest_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["lane"], "scripted");
        assert_eq!(parsed["input_digest"], input_digest("doc"));
    }

    #[test]
    fn test_events_seq_is_monotonic() {
        let (_tmp, run) = run_dir();
        let mut events = run.events_writer().unwrap();
        events.append(0, 0, EventKind::Dispatched, None).unwrap();
        events.append(0, 0, EventKind::Waiting, None).unwrap();
        events
            .append(0, 0, EventKind::Passed, Some(serde_json::json!({"matched": "hello"})))
            .unwrap();

        let content = fs::read_to_string(run.events_path()).unwrap();
        let seqs: Vec<u64> = content
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["seq"]
                .as_u64()
                .unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        // Timestamps never jump backward
        let ts: Vec<u64> = content
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["ts_ms"]
                .as_u64()
                .unwrap())
            .collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_failure_bundle_is_redacted() {
        use crate::screenplay::Screenplay;
        let (_tmp, run) = run_dir();
        let play = Screenplay::from_yaml(
            "title: T\noutput: o\nvariables:\n  MY_TOKEN: tok123\nscenarios:\n  - label: a\n    actions: [x]\n",
            std::path::Path::new("/tmp"),
        )
        .unwrap();
        let redact = RedactionSet::from_screenplay(&play, &[]);

        let bundle = FailureBundle {
            reason: "command with tok123 failed".to_string(),
            screen: Some("screen shows tok123".to_string()),
            step: Some(serde_json::json!({"command": "echo tok123"})),
            video_runner_log: None,
        };
        run.write_failure_bundle(&bundle, &redact).unwrap();

        let reason = fs::read_to_string(run.failure_dir().join("reason.txt")).unwrap();
        assert!(!reason.contains("tok123"));
        let screen = fs::read_to_string(run.failure_dir().join("screen.txt")).unwrap();
        assert!(!screen.contains("tok123"));
        let step = fs::read_to_string(run.failure_dir().join("step.json")).unwrap();
        assert!(!step.contains("tok123"));
    }

    #[test]
    fn test_summary_round_trips_status() {
        let (_tmp, run) = run_dir();
        let summary = Summary {
            status: RunStatus::Failed,
            lane: "interactive".to_string(),
            media: vec![],
            scenarios: vec![ScenarioOutcome {
                label: "a".to_string(),
                status: RunStatus::Failed,
                duration_ms: 12,
            }],
            started_at: run.started_at().to_string(),
            duration_ms: run.elapsed_ms(),
            event_count: 3,
        };
        run.write_summary(&summary).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run.summary_path()).unwrap()).unwrap();
        assert_eq!(parsed["status"], "failed");
        assert_eq!(parsed["scenarios"][0]["label"], "a");
    }

    #[test]
    fn test_input_digest_is_stable() {
        assert_eq!(input_digest("abc"), input_digest("abc"));
        assert_ne!(input_digest("abc"), input_digest("abd"));
        assert_eq!(input_digest("abc").len(), 64);
    }

    #[test]
    fn test_open_rejects_missing_dir() {
        assert!(RunDir::open(Path::new("/nonexistent/run-x")).is_err());
    }
}
