//! Visual lane.
//!
//! Starts a virtual display, launches a real terminal emulator on it with
//! remote control restricted to a private per-scenario socket (no network
//! surface), and records the display with a screen-video encoder. Keystrokes
//! go through the emulator's remote-control protocol; the rolling screen
//! snapshot is the emulator's own text buffer, fetched at every sampling
//! tick. The policy engine runs on each tick, mediating approval prompts
//! against live screen contents.
//!
//! Teardown runs on every exit path, each step independent of the previous
//! one's outcome: stop the encoder (flushing the container), close the
//! remote-control socket, terminate the emulator, tear down the display,
//! delete the socket directory.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::artifacts::{EventKind, EventsWriter, FailureBundle, RunStatus, ScenarioOutcome};
use crate::error::StudioError;
use crate::evaluator::{self, Snapshot, WaitError, WaitPredicate};
use crate::policy::{PolicyDecision, PromptGate, decide};
use crate::screenplay::{Action, ActionKind, KeyToken, Scenario};
use crate::shell_exec;

use super::{LaneResult, RunContext, reap_child, run_command_list, run_preinstall};

pub const LANE_NAME: &str = "visual";

/// How long to wait for the emulator's control socket to appear.
const SOCKET_WAIT: Duration = Duration::from_secs(10);

/// Grace period between SIGTERM and SIGKILL at teardown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn run(ctx: &RunContext) -> std::io::Result<LaneResult> {
    let mut result = LaneResult {
        scenarios: Vec::new(),
        media: Vec::new(),
        failure: None,
        event_count: 0,
    };

    if let Err(e) = run_preinstall(ctx) {
        result.failure = Some(e);
        return Ok(result);
    }

    let mut events = ctx.run.events_writer()?;
    let scenes_dir = ctx.run.scenes_dir()?;

    let mut scene_videos = Vec::new();
    for (index, scenario) in ctx.play.scenarios.iter().enumerate() {
        let started = Instant::now();
        let outcome = run_scenario(ctx, scenario, index, &scenes_dir, &mut events);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(video) => {
                scene_videos.push(video);
                result.scenarios.push(ScenarioOutcome {
                    label: scenario.label.clone(),
                    status: RunStatus::Success,
                    duration_ms,
                });
            }
            Err(failure) => {
                result.scenarios.push(ScenarioOutcome {
                    label: scenario.label.clone(),
                    status: RunStatus::Failed,
                    duration_ms,
                });
                result.failure = Some(failure);
                result.event_count = events.count();
                return Ok(result);
            }
        }
    }

    // Final media: one mp4 composed from the recorded scenes, reusing the
    // scripted lane's compositor path for multi-scene runs
    match compose_final(ctx, &scene_videos) {
        Ok(media) => match super::export_media(ctx, &media) {
            Ok(exported) => result.media = exported,
            Err(e) => {
                result.failure = Some(StudioError::Internal {
                    id: "media-export".to_string(),
                    detail: e.to_string(),
                })
            }
        },
        Err(failure) => result.failure = Some(failure),
    }

    result.event_count = events.count();
    Ok(result)
}

fn compose_final(ctx: &RunContext, scenes: &[PathBuf]) -> Result<Vec<PathBuf>, StudioError> {
    if scenes.is_empty() {
        return Ok(Vec::new());
    }
    let media_dir = ctx.run.media_dir().map_err(|e| StudioError::Internal {
        id: "media-dir".to_string(),
        detail: e.to_string(),
    })?;
    let out = media_dir.join(format!("{}.mp4", ctx.play.output));
    if scenes.len() == 1 {
        std::fs::copy(&scenes[0], &out).map_err(|e| StudioError::Internal {
            id: "media-copy".to_string(),
            detail: e.to_string(),
        })?;
    } else {
        // Concatenation without transitions keeps the encoder output intact
        let list = media_dir.join("concat.txt");
        let mut body = String::new();
        for scene in scenes {
            body.push_str(&format!("file '{}'\n", scene.display()));
        }
        std::fs::write(&list, body).map_err(|e| StudioError::Internal {
            id: "concat-list".to_string(),
            detail: e.to_string(),
        })?;
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-f", "concat", "-safe", "0", "-i"]);
        cmd.arg(&list);
        cmd.args(["-c", "copy"]);
        cmd.arg(&out);
        let output = shell_exec::run(&mut cmd, Some("compose")).map_err(|e| {
            StudioError::Internal {
                id: "compositor-spawn".to_string(),
                detail: e.to_string(),
            }
        })?;
        if !output.status.success() {
            return Err(StudioError::StepFailure {
                scenario: 0,
                step: 0,
                reason: format!("compositor exited with {}", output.status),
            });
        }
        let _ = std::fs::remove_file(&list);
    }
    Ok(vec![out])
}

fn run_scenario(
    ctx: &RunContext,
    scenario: &Scenario,
    index: usize,
    scenes_dir: &Path,
    events: &mut EventsWriter,
) -> Result<PathBuf, StudioError> {
    run_command_list(
        &scenario.setup,
        &std::env::current_dir().unwrap_or_else(|_| ctx.tmp_root.clone()),
        ctx.setup_timeout,
        &ctx.redact,
    )?;

    let scene_video = scenes_dir.join(format!("scene_{index}.mp4"));
    let mut stack = VisualStack::start(ctx, index, &scene_video).map_err(|e| {
        StudioError::ToolUnavailable {
            tool: e.tool.clone(),
            hint: e.hint.clone(),
        }
    })?;

    let outcome = drive_scenario(ctx, scenario, index, &mut stack, events);

    // Mandatory teardown, success or failure
    stack.teardown();

    if let Err(failure) = &outcome {
        let bundle = FailureBundle {
            reason: format!("{}\n{}", failure.kind(), failure.bundle_reason()),
            screen: stack.last_screen.clone(),
            step: step_payload(ctx, failure),
            video_runner_log: Some(stack.collect_logs()),
        };
        let _ = ctx.run.write_failure_bundle(&bundle, &ctx.redact);
    }

    outcome.map(|()| scene_video)
}

fn step_payload(ctx: &RunContext, failure: &StudioError) -> Option<serde_json::Value> {
    let (scenario, step) = match failure {
        StudioError::StepFailure { scenario, step, .. }
        | StudioError::Timeout { scenario, step, .. } => (*scenario, *step),
        _ => return None,
    };
    let action = ctx.play.scenarios.get(scenario)?.actions.get(step)?;
    serde_json::to_value(serde_json::json!({
        "scenario": scenario,
        "step": step,
        "action": action,
    }))
    .ok()
}

/// Per-tick policy bookkeeping shared between the wait loop and the event
/// log.
struct PolicyState {
    rounds: u32,
    gate: PromptGate,
    abort: Option<String>,
    /// Events recorded inside the sampling closure, flushed after each wait.
    pending: Vec<(EventKind, serde_json::Value)>,
}

fn drive_scenario(
    ctx: &RunContext,
    scenario: &Scenario,
    index: usize,
    stack: &mut VisualStack,
    events: &mut EventsWriter,
) -> Result<(), StudioError> {
    let mut last_command: Option<String> = None;
    let policy_state = RefCell::new(PolicyState {
        rounds: 0,
        gate: PromptGate::new(),
        abort: None,
        pending: Vec::new(),
    });

    for (step, action) in scenario.actions.iter().enumerate() {
        if ctx.cancelled.load(Ordering::Relaxed) {
            return Err(StudioError::Cancelled);
        }

        events
            .append(
                index,
                step,
                EventKind::Dispatched,
                Some(serde_json::json!({"action": action.kind.name()})),
            )
            .map_err(internal("events-append"))?;

        let step_failure = |reason: String| StudioError::StepFailure {
            scenario: index,
            step,
            reason,
        };

        match &action.kind {
            ActionKind::Command { text } => {
                let masked = masks_input(ctx, text);
                if masked {
                    stack.suppress_echo(true).map_err(|e| step_failure(e.to_string()))?;
                }
                stack.send_text(text).map_err(|e| step_failure(e.to_string()))?;
                stack
                    .send_key(KeyToken::Enter.emulator_key())
                    .map_err(|e| step_failure(e.to_string()))?;
                if masked {
                    stack.suppress_echo(false).map_err(|e| step_failure(e.to_string()))?;
                }
                last_command = Some(text.clone());
                events
                    .append(index, step, EventKind::Passed, None)
                    .map_err(internal("events-append"))?;
            }
            ActionKind::Input { text } => {
                if masks_input(ctx, text) {
                    stack.suppress_echo(true).map_err(|e| step_failure(e.to_string()))?;
                }
                stack.send_text(text).map_err(|e| step_failure(e.to_string()))?;
                events
                    .append(index, step, EventKind::Passed, None)
                    .map_err(internal("events-append"))?;
            }
            ActionKind::Key { key } => {
                stack
                    .send_key(key.emulator_key())
                    .map_err(|e| step_failure(e.to_string()))?;
                events
                    .append(index, step, EventKind::Passed, None)
                    .map_err(internal("events-append"))?;
            }
            ActionKind::Hotkey { hotkey } => {
                stack
                    .send_key(&hotkey.emulator_key())
                    .map_err(|e| step_failure(e.to_string()))?;
                events
                    .append(index, step, EventKind::Passed, None)
                    .map_err(internal("events-append"))?;
            }

            ActionKind::Sleep { duration } => {
                // Sleeps still tick the policy engine - a prompt can appear
                // mid-sleep. A never-satisfiable stability predicate turns
                // the evaluator loop into a policy-aware sleep.
                let predicate = WaitPredicate::Stable {
                    duration: Duration::from_secs(3600),
                };
                let outcome = run_wait_with_policy(
                    ctx,
                    stack,
                    scenario,
                    &policy_state,
                    &predicate,
                    duration.as_duration(),
                    &mut last_command,
                );
                flush_policy_events(&policy_state, events, index, step)?;
                if let Some(rule) = policy_state.borrow_mut().abort.take() {
                    return Err(StudioError::PolicyAbort { rule });
                }
                match outcome {
                    Err(WaitError::Cancelled) => return Err(StudioError::Cancelled),
                    Err(WaitError::Io(e)) => return Err(step_failure(e.to_string())),
                    _ => {}
                }
                events
                    .append(index, step, EventKind::Passed, None)
                    .map_err(internal("events-append"))?;
            }

            ActionKind::WaitStable { duration } => {
                let predicate = WaitPredicate::Stable {
                    duration: duration.as_duration(),
                };
                self_wait(
                    ctx, stack, scenario, &policy_state, events, index, step, action, &predicate,
                    None, &mut last_command,
                )?;
            }
            ActionKind::WaitFor {
                target,
                mode,
                timeout,
            } => {
                let predicate = WaitPredicate::Contains {
                    target: target.clone(),
                    mode: *mode,
                };
                self_wait(
                    ctx,
                    stack,
                    scenario,
                    &policy_state,
                    events,
                    index,
                    step,
                    action,
                    &predicate,
                    timeout.map(|t| t.as_duration()),
                    &mut last_command,
                )?;
            }
            ActionKind::WaitScreenRegex { pattern } => {
                let re = evaluator::compile_pattern(pattern)
                    .map_err(|e| step_failure(e.to_string()))?;
                self_wait(
                    ctx,
                    stack,
                    scenario,
                    &policy_state,
                    events,
                    index,
                    step,
                    action,
                    &WaitPredicate::ScreenRegex(re),
                    None,
                    &mut last_command,
                )?;
            }
            ActionKind::WaitLineRegex { pattern } => {
                let re = evaluator::compile_pattern(pattern)
                    .map_err(|e| step_failure(e.to_string()))?;
                self_wait(
                    ctx,
                    stack,
                    scenario,
                    &policy_state,
                    events,
                    index,
                    step,
                    action,
                    &WaitPredicate::LineRegex(re),
                    None,
                    &mut last_command,
                )?;
            }

            ActionKind::AssertScreenRegex { pattern } => {
                run_assert(stack, events, index, step, pattern, false)?;
            }
            ActionKind::AssertNotScreenRegex { pattern } => {
                run_assert(stack, events, index, step, pattern, true)?;
            }

            // Rejected at validation; a forced lane still refuses cleanly
            ActionKind::ExpectExitCode { .. } => {
                events
                    .append(index, step, EventKind::Failed, None)
                    .map_err(internal("events-append"))?;
                return Err(step_failure(
                    "expect_exit_code unsupported in visual lane".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn internal(id: &'static str) -> impl Fn(std::io::Error) -> StudioError {
    move |e| StudioError::Internal {
        id: id.to_string(),
        detail: e.to_string(),
    }
}

/// Whether this input line must be masked in the recording.
fn masks_input(ctx: &RunContext, text: &str) -> bool {
    ctx.media_mode == crate::redact::RedactMode::InputLine && ctx.redact.is_sensitive(text)
}

fn run_assert(
    stack: &mut VisualStack,
    events: &mut EventsWriter,
    index: usize,
    step: usize,
    pattern: &str,
    negated: bool,
) -> Result<(), StudioError> {
    events
        .append(
            index,
            step,
            EventKind::Asserting,
            Some(serde_json::json!({"regex": pattern})),
        )
        .map_err(internal("events-append"))?;

    let re = evaluator::compile_pattern(pattern).map_err(|e| StudioError::StepFailure {
        scenario: index,
        step,
        reason: e.to_string(),
    })?;
    let snap = stack.snapshot().map_err(|e| StudioError::StepFailure {
        scenario: index,
        step,
        reason: e.to_string(),
    })?;
    match evaluator::check_assertion(&snap, &re, negated) {
        Ok(matched) => events
            .append(
                index,
                step,
                EventKind::Passed,
                matched.map(|m| serde_json::json!({"matched": m})),
            )
            .map(|_| ())
            .map_err(|e| internal("events-append")(e)),
        Err(reason) => {
            let _ = events.append(index, step, EventKind::Failed, None);
            Err(StudioError::StepFailure {
                scenario: index,
                step,
                reason,
            })
        }
    }
}

/// Shared wait path: record the waiting event, sample with the policy engine
/// on every tick, flush policy events, translate the outcome.
#[allow(clippy::too_many_arguments)]
fn self_wait(
    ctx: &RunContext,
    stack: &mut VisualStack,
    scenario: &Scenario,
    policy_state: &RefCell<PolicyState>,
    events: &mut EventsWriter,
    index: usize,
    step: usize,
    action: &Action,
    predicate: &WaitPredicate,
    declared_timeout: Option<Duration>,
    last_command: &mut Option<String>,
) -> Result<(), StudioError> {
    events
        .append(index, step, EventKind::Waiting, None)
        .map_err(internal("events-append"))?;

    let timeout = declared_timeout.unwrap_or_else(|| ctx.wait_timeout(action));
    let attempts = action.retries + 1;
    let mut last_waited = Duration::ZERO;

    for _attempt in 0..attempts {
        let outcome = run_wait_with_policy(
            ctx,
            stack,
            scenario,
            policy_state,
            predicate,
            timeout,
            last_command,
        );
        flush_policy_events(policy_state, events, index, step)?;
        if let Some(rule) = policy_state.borrow_mut().abort.take() {
            return Err(StudioError::PolicyAbort { rule });
        }

        match outcome {
            Ok(outcome) => {
                return events
                    .append(
                        index,
                        step,
                        EventKind::Passed,
                        outcome.matched.map(|m| serde_json::json!({"matched": m})),
                    )
                    .map(|_| ())
                    .map_err(|e| internal("events-append")(e));
            }
            Err(WaitError::TimedOut { waited }) => last_waited = waited,
            Err(WaitError::Cancelled) => return Err(StudioError::Cancelled),
            Err(WaitError::Io(e)) => {
                return Err(StudioError::StepFailure {
                    scenario: index,
                    step,
                    reason: e.to_string(),
                });
            }
        }
    }

    let _ = events.append(
        index,
        step,
        EventKind::TimedOut,
        Some(serde_json::json!({"waited_ms": last_waited.as_millis() as u64})),
    );
    Err(StudioError::Timeout {
        scenario: index,
        step,
        waited_ms: last_waited.as_millis() as u64,
    })
}

/// One evaluator wait whose sampling closure also runs the policy engine.
fn run_wait_with_policy(
    ctx: &RunContext,
    stack: &mut VisualStack,
    scenario: &Scenario,
    policy_state: &RefCell<PolicyState>,
    predicate: &WaitPredicate,
    timeout: Duration,
    last_command: &mut Option<String>,
) -> Result<evaluator::WaitOutcome, WaitError> {
    let cancelled = std::sync::Arc::clone(&ctx.cancelled);
    let last_command_text = last_command.clone();

    let stack_cell = RefCell::new(stack);
    let mut fetch = || -> std::io::Result<Snapshot> {
        let mut stack = stack_cell.borrow_mut();
        let snap = stack.snapshot()?;

        if let Some(policy) = &scenario.policy {
            let mut state = policy_state.borrow_mut();
            if state.abort.is_none() && state.gate.may_fire(&snap, policy) {
                match decide(&snap, policy, state.rounds, last_command_text.as_deref()) {
                    PolicyDecision::Approve => {
                        stack.send_key(policy.approve_key.emulator_key())?;
                        state.rounds += 1;
                        state.gate.record_dispatch(&snap);
                        let round = state.rounds;
                        state.pending.push((
                            EventKind::Approved,
                            serde_json::json!({"round": round}),
                        ));
                    }
                    PolicyDecision::Deny => {
                        stack.send_key(policy.deny_key.emulator_key())?;
                        state.rounds += 1;
                        state.gate.record_dispatch(&snap);
                        let round = state.rounds;
                        state.pending.push((
                            EventKind::Denied,
                            serde_json::json!({"round": round}),
                        ));
                    }
                    PolicyDecision::Skip => {}
                    PolicyDecision::Abort(rule) => {
                        state.abort = Some(rule.clone());
                        return Err(std::io::Error::other(format!("policy abort: {rule}")));
                    }
                }
            }
        }

        Ok(snap)
    };

    evaluator::evaluate_wait(predicate, timeout, &mut fetch, &cancelled)
}

fn flush_policy_events(
    policy_state: &RefCell<PolicyState>,
    events: &mut EventsWriter,
    index: usize,
    step: usize,
) -> Result<(), StudioError> {
    let pending: Vec<_> = policy_state.borrow_mut().pending.drain(..).collect();
    for (kind, payload) in pending {
        events
            .append(index, step, kind, Some(payload))
            .map_err(internal("events-append"))?;
    }
    Ok(())
}

/// Tool-start failure carrying a remediation hint.
struct StackStartError {
    tool: String,
    hint: String,
}

/// The per-scenario recorder stack: virtual display, terminal emulator with a
/// private control socket, and screen-video encoder.
struct VisualStack {
    display: String,
    xvfb: Child,
    emulator: Child,
    encoder: Option<Child>,
    socket_dir: Option<tempfile::TempDir>,
    socket: PathBuf,
    log_paths: Vec<PathBuf>,
    last_screen: Option<String>,
    torn_down: bool,
}

impl VisualStack {
    fn start(
        ctx: &RunContext,
        index: usize,
        scene_video: &Path,
    ) -> Result<Self, StackStartError> {
        let settings = &ctx.play.settings;
        let display = free_display().ok_or_else(|| StackStartError {
            tool: "Xvfb".to_string(),
            hint: "no free X display number found; clean up stale /tmp/.X11-unix sockets"
                .to_string(),
        })?;

        let mut log_paths = Vec::new();
        let log_for = |name: &str| ctx.tmp_root.join(format!("scene_{index}_{name}.log"));

        // Virtual display
        let xvfb_log = log_for("xvfb");
        let xvfb = Command::new("Xvfb")
            .arg(&display)
            .args(["-screen", "0"])
            .arg(format!("{}x{}x24", settings.width, settings.height))
            .args(["-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stdio_to(&xvfb_log))
            .spawn()
            .map_err(|e| StackStartError {
                tool: "Xvfb".to_string(),
                hint: format!("install xvfb (apt install xvfb): {e}"),
            })?;
        log_paths.push(xvfb_log);

        // Private per-scenario control socket, under the run-scoped temp root
        let socket_dir = tempfile::Builder::new()
            .prefix(&format!("ctl-{index}-"))
            .tempdir_in(&ctx.tmp_root)
            .map_err(|e| StackStartError {
                tool: "tempdir".to_string(),
                hint: e.to_string(),
            })?;
        let socket = socket_dir.path().join("emulator.sock");

        // Terminal emulator, remote control restricted to the socket
        let emulator_log = log_for("emulator");
        let emulator = Command::new("kitty")
            .arg("--listen-on")
            .arg(format!("unix:{}", socket.display()))
            .args(["-o", "allow_remote_control=socket-only"])
            .args(["--start-as", "maximized"])
            .env("DISPLAY", &display)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stdio_to(&emulator_log))
            .spawn()
            .map_err(|e| StackStartError {
                tool: "kitty".to_string(),
                hint: format!("install kitty (apt install kitty): {e}"),
            })?;
        log_paths.push(emulator_log);

        let mut stack = Self {
            display: display.clone(),
            xvfb,
            emulator,
            encoder: None,
            socket_dir: Some(socket_dir),
            socket,
            log_paths,
            last_screen: None,
            torn_down: false,
        };

        if !stack.wait_for_socket(SOCKET_WAIT) {
            stack.teardown();
            return Err(StackStartError {
                tool: "kitty".to_string(),
                hint: "emulator did not expose its control socket in time".to_string(),
            });
        }

        // Screen-video encoder recording the display
        let encoder_log = ctx.tmp_root.join(format!("scene_{index}_encoder.log"));
        let encoder = Command::new("ffmpeg")
            .args(["-y", "-f", "x11grab"])
            .args(["-video_size", &format!("{}x{}", settings.width, settings.height)])
            .args(["-framerate", &settings.framerate.to_string()])
            .args(["-i", &display])
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"])
            .arg(scene_video)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(stdio_to(&encoder_log))
            .spawn()
            .map_err(|e| StackStartError {
                tool: "ffmpeg".to_string(),
                hint: format!("install ffmpeg: {e}"),
            });
        let encoder = match encoder {
            Ok(child) => child,
            Err(e) => {
                stack.teardown();
                return Err(e);
            }
        };
        stack.encoder = Some(encoder);
        stack.log_paths.push(encoder_log);

        Ok(stack)
    }

    fn wait_for_socket(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.socket.exists() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        false
    }

    fn control_arg(&self) -> String {
        format!("unix:{}", self.socket.display())
    }

    /// Deliver literal text through the remote-control protocol.
    fn send_text(&mut self, text: &str) -> std::io::Result<()> {
        let mut cmd = Command::new("kitten");
        cmd.args(["@", "--to", &self.control_arg(), "send-text", "--", text]);
        let output = shell_exec::run(&mut cmd, None)?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "send-text failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Mask the input line region by toggling terminal echo around a
    /// sensitive send. The typed value never reaches the recording.
    fn suppress_echo(&mut self, on: bool) -> std::io::Result<()> {
        let toggle = if on { "stty -echo" } else { "stty echo" };
        self.send_text(toggle)?;
        self.send_key("enter")
    }

    /// Deliver a named key or chord.
    fn send_key(&mut self, key: &str) -> std::io::Result<()> {
        let mut cmd = Command::new("kitten");
        cmd.args(["@", "--to", &self.control_arg(), "send-key", key]);
        let output = shell_exec::run(&mut cmd, None)?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "send-key failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Ask the emulator for its text buffer. The visual lane has no raw
    /// output stream, so the screen text also serves as the stream tail
    /// surface.
    fn snapshot(&mut self) -> std::io::Result<Snapshot> {
        let mut cmd = Command::new("kitten");
        cmd.args(["@", "--to", &self.control_arg(), "get-text"]);
        let output = shell_exec::run(&mut cmd, None)?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "get-text failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let screen = String::from_utf8_lossy(&output.stdout).into_owned();
        self.last_screen = Some(screen.clone());
        Ok(Snapshot {
            stream_tail: screen.clone(),
            screen,
            closed: false,
        })
    }

    /// Teardown in the mandated order; every step runs regardless of the
    /// previous step's outcome.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        // 1. Stop the encoder first so the container is flushed
        if let Some(mut encoder) = self.encoder.take() {
            if let Some(stdin) = encoder.stdin.take() {
                // ffmpeg finalizes the file on 'q'
                use std::io::Write;
                let mut stdin = stdin;
                let _ = stdin.write_all(b"q");
            }
            reap_child(&mut encoder, TEARDOWN_GRACE);
        }

        // 2. Close the remote-control socket path
        let _ = std::fs::remove_file(&self.socket);

        // 3. Terminate the emulator
        reap_child(&mut self.emulator, TEARDOWN_GRACE);

        // 4. Tear down the virtual display
        reap_child(&mut self.xvfb, TEARDOWN_GRACE);

        // 5. Delete the private socket directory
        if let Some(dir) = self.socket_dir.take() {
            let _ = dir.close();
        }

        log::debug!("visual stack for display {} torn down", self.display);
    }

    /// Collected (and later redacted) process logs for the failure bundle.
    fn collect_logs(&self) -> String {
        let mut out = String::new();
        for path in &self.log_paths {
            if let Ok(content) = std::fs::read_to_string(path) {
                out.push_str(&format!("==> {}\n", path.display()));
                out.push_str(&crate::utils::truncate_tail(&content, 16 * 1024));
                out.push('\n');
            }
        }
        out
    }
}

impl Drop for VisualStack {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn stdio_to(path: &Path) -> Stdio {
    match std::fs::File::create(path) {
        Ok(file) => Stdio::from(file),
        Err(_) => Stdio::null(),
    }
}

/// Find a free X display number by probing the conventional socket paths.
fn free_display() -> Option<String> {
    for n in 90..200 {
        let sock = format!("/tmp/.X11-unix/X{n}");
        let lock = format!("/tmp/.X{n}-lock");
        if !Path::new(&sock).exists() && !Path::new(&lock).exists() {
            return Some(format!(":{n}"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_display_returns_colon_prefixed() {
        if let Some(display) = free_display() {
            assert!(display.starts_with(':'));
            assert!(display[1..].parse::<u32>().is_ok());
        }
    }

    #[test]
    fn test_stdio_to_missing_parent_falls_back() {
        // Must not panic even when the log path is unwritable
        let _ = stdio_to(Path::new("/nonexistent/dir/file.log"));
    }
}
