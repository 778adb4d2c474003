//! Shared helpers for integration tests.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use terminal_demo_studio::artifacts::RunDir;
use terminal_demo_studio::lanes::{MediaFormat, Playback, RunContext};
use terminal_demo_studio::redact::{RedactMode, RedactionSet};
use terminal_demo_studio::screenplay::Screenplay;

/// Command for the built `tds` binary with a quiet, isolated environment.
pub fn tds_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tds"));
    // Keep user config out of test runs
    cmd.env("TDS_CONFIG_PATH", "/nonexistent/tds-config.toml");
    cmd.env_remove("TDS_SETUP_TIMEOUT_SECONDS");
    cmd
}

/// Write a screenplay document into `dir` and return its path.
pub fn write_screenplay(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("demo.yaml");
    std::fs::write(&path, contents).expect("write screenplay");
    path
}

/// Everything a library-level lane test needs, with owned temp dirs so
/// artifacts survive as long as the fixture.
pub struct LaneFixture {
    pub run_root: tempfile::TempDir,
    pub tmp_root: tempfile::TempDir,
    pub run: RunDir,
}

impl LaneFixture {
    pub fn new() -> Self {
        let run_root = tempfile::tempdir().expect("run root");
        let tmp_root = tempfile::tempdir().expect("tmp root");
        let run = RunDir::create(run_root.path()).expect("run dir");
        Self {
            run_root,
            tmp_root,
            run,
        }
    }

    /// Build a run context over a screenplay with test-friendly timeouts.
    pub fn context<'a>(&'a self, play: &'a Screenplay) -> RunContext<'a> {
        RunContext {
            play,
            run: &self.run,
            redact: RedactionSet::from_screenplay(play, &[]),
            media_mode: RedactMode::Off,
            formats: vec![MediaFormat::Gif],
            playback: Playback::Sequential,
            output_dir: None,
            setup_timeout: Duration::from_secs(30),
            default_wait_timeout: Duration::from_secs(10),
            cancelled: Arc::new(AtomicBool::new(false)),
            tmp_root: self.tmp_root.path().to_path_buf(),
        }
    }
}

/// Parse the `KEY=VALUE` stdout contract into pairs.
pub fn parse_contract(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                Some((key.to_string(), value.to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Look up one contract key.
pub fn contract_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
