//! Lane runtimes.
//!
//! Three peer runtimes share nothing at the I/O level but everything above
//! it: the screenplay model, the wait/assert evaluator, the policy engine,
//! the redaction pipeline, and the artifact writer. This module holds the
//! shared pieces - preinstall/setup execution, the per-action state machine,
//! cancellation, and the summary flush every lane performs on its way out.
//!
//! Per action, every lane follows the same state machine:
//! `pending → dispatched → waiting → asserting → (passed | failed |
//! timed_out)`. The failure states are terminal: the lane writes the failure
//! bundle and stops the scenario.

pub mod pty;
pub mod scripted;
pub mod visual;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::Serialize;

use crate::artifacts::{FailureBundle, RunDir, RunStatus, ScenarioOutcome, Summary};
use crate::error::StudioError;
use crate::redact::{RedactMode, RedactionSet};
use crate::screenplay::{Action, Screenplay};
use crate::shell_exec::{self, TimedRun};

/// Media container formats the compositor can produce.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaFormat {
    Gif,
    Mp4,
}

/// How multi-scene media is composed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Playback {
    /// Scenes concatenated with a deterministic transition.
    #[default]
    Sequential,
    /// Scenes side by side, aligned to the longest scenario.
    Simultaneous,
}

/// Immutable per-run context handed from the dispatcher to the selected
/// lane. Environment is resolved once at dispatcher entry; lanes never read
/// it themselves.
pub struct RunContext<'a> {
    pub play: &'a Screenplay,
    pub run: &'a RunDir,
    pub redact: RedactionSet,
    pub media_mode: RedactMode,
    pub formats: Vec<MediaFormat>,
    pub playback: Playback,
    /// Where composed media is copied after the run, when requested.
    pub output_dir: Option<PathBuf>,
    pub setup_timeout: Duration,
    pub default_wait_timeout: Duration,
    pub cancelled: Arc<AtomicBool>,
    /// Run-scoped temp root backing `{tmp_dir}` and per-scenario sockets.
    pub tmp_root: PathBuf,
}

impl<'a> RunContext<'a> {
    /// The wait deadline for one action: the per-step timeout when declared,
    /// otherwise the run default.
    pub fn wait_timeout(&self, action: &Action) -> Duration {
        action
            .timeout
            .map(|t| t.as_duration())
            .unwrap_or(self.default_wait_timeout)
    }
}

/// What a lane hands back to the dispatcher.
pub struct LaneResult {
    pub scenarios: Vec<ScenarioOutcome>,
    pub media: Vec<PathBuf>,
    pub failure: Option<StudioError>,
    pub event_count: u64,
}

impl LaneResult {
    pub fn status(&self) -> RunStatus {
        if self.failure.is_none() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        }
    }
}

/// Run the preinstall command list, then each scenario's setup list is run by
/// the lane itself through [`run_command_list`].
///
/// A non-zero exit or a timeout aborts before any scenario executes.
pub fn run_preinstall(ctx: &RunContext) -> Result<(), StudioError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| ctx.tmp_root.clone());
    run_command_list(&ctx.play.preinstall, &cwd, ctx.setup_timeout, &ctx.redact)
}

/// Run a setup/preinstall command list sequentially with the configured
/// timeout, failing fast on the first non-zero exit.
pub fn run_command_list(
    commands: &[String],
    cwd: &Path,
    timeout: Duration,
    redact: &RedactionSet,
) -> Result<(), StudioError> {
    for command in commands {
        match shell_exec::run_with_timeout(command, cwd, timeout) {
            Ok(TimedRun::Completed(output)) if output.status.success() => {}
            Ok(TimedRun::Completed(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(StudioError::Setup {
                    command: redact.apply(command),
                    detail: redact.apply(&crate::utils::truncate_tail(&stderr, 4096)),
                });
            }
            Ok(TimedRun::TimedOut) => {
                return Err(StudioError::Setup {
                    command: redact.apply(command),
                    detail: format!("timed out after {}s", timeout.as_secs()),
                });
            }
            Err(e) => {
                return Err(StudioError::Setup {
                    command: redact.apply(command),
                    detail: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Install the SIGINT handler that flips the shared cancellation flag. Lanes
/// check the flag at every sampling tick and stop dispatching new actions.
pub fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag));
    }
    flag
}

/// Terminate a child process: SIGTERM, a grace period, then SIGKILL. Safe to
/// call on an already-dead child.
#[cfg(unix)]
pub fn reap_child(child: &mut std::process::Child, grace: Duration) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    let pid = Pid::from_raw(child.id() as i32);
    let _ = kill(pid, Signal::SIGTERM);

    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let _ = kill(pid, Signal::SIGKILL);
    let _ = child.wait();
}

#[cfg(not(unix))]
pub fn reap_child(child: &mut std::process::Child, _grace: Duration) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Flush the summary and write the failure bundle for a finished lane, then
/// emit the stdout contract. Every lane exits through here, on success and on
/// failure alike.
pub fn finish_run(ctx: &RunContext, result: &LaneResult, lane: &str) -> std::io::Result<Summary> {
    if let Some(failure) = &result.failure {
        let bundle = FailureBundle {
            reason: format!("{}\n{}", failure.kind(), failure.bundle_reason()),
            ..Default::default()
        };
        // A lane that captured richer context (screen, step payload) has
        // already written its bundle; don't clobber it
        if !ctx.run.failure_dir().join("reason.txt").exists() {
            ctx.run.write_failure_bundle(&bundle, &ctx.redact)?;
        }
    }

    let summary = Summary {
        status: result.status(),
        lane: lane.to_string(),
        media: result.media.clone(),
        scenarios: result
            .scenarios
            .iter()
            .map(|s| ScenarioOutcome {
                label: s.label.clone(),
                status: s.status,
                duration_ms: s.duration_ms,
            })
            .collect(),
        started_at: ctx.run.started_at().to_string(),
        duration_ms: ctx.run.elapsed_ms(),
        event_count: result.event_count,
    };
    ctx.run.write_summary(&summary)?;
    ctx.run.emit_stdout_contract(&summary);
    Ok(summary)
}

/// Copy composed media into the caller's `--output-dir`, when one was given.
pub fn export_media(ctx: &RunContext, media: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let Some(out_dir) = &ctx.output_dir else {
        return Ok(media.to_vec());
    };
    std::fs::create_dir_all(out_dir)?;
    let mut exported = Vec::new();
    for path in media {
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = out_dir.join(name);
        std::fs::copy(path, &dest)?;
        exported.push(dest);
    }
    Ok(exported)
}
