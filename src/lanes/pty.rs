//! Interactive (PTY) lane.
//!
//! Spawns one persistent child shell per scenario behind a pseudoterminal. A
//! background reader thread ships raw output over a channel; the lane drains
//! it at each sampling tick into the stream tail and an in-memory vt100
//! screen model, so the evaluator sees both surfaces without the reader ever
//! becoming a pub/sub interface.
//!
//! No media is produced here: `events.jsonl` and `summary.json` are the sole
//! outputs besides the failure bundle.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use portable_pty::{CommandBuilder, PtySize, native_pty_system};

use crate::artifacts::{EventKind, EventsWriter, RunStatus, ScenarioOutcome};
use crate::error::StudioError;
use crate::evaluator::{self, Snapshot, StreamTail, WaitError, WaitPredicate};
use crate::screenplay::{Action, ActionKind, Scenario};

use super::{LaneResult, RunContext, run_command_list, run_preinstall};

pub const LANE_NAME: &str = "interactive";

/// Hard ceiling on one scenario's wall-clock time; the tightest of step,
/// scenario, and global deadlines binds.
const SCENARIO_DEADLINE: Duration = Duration::from_secs(900);

/// Approximate cell geometry used to size the screen model from the pixel
/// dimensions the settings declare.
const CELL_WIDTH_PX: u32 = 10;
const CELL_HEIGHT_PX: u32 = 20;

/// Prefix of the exit-status sentinel echoed after a command when an
/// `expect_exit_code` step needs the shell's `$?`. Lines carrying it are
/// internal bookkeeping, not scenario output.
const EXIT_MARKER_PREFIX: &str = "__tds_rc_";

/// Drop sentinel lines (the echoed `echo` input and its expansion) from a
/// snapshot surface, preserving every other line as-is.
fn strip_sentinel_lines(text: &str) -> String {
    if !text.contains(EXIT_MARKER_PREFIX) {
        return text.to_string();
    }
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.contains(EXIT_MARKER_PREFIX))
        .collect();
    let mut out = kept.join("\n");
    if text.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Execute every scenario in the interactive lane.
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

    for (index, scenario) in ctx.play.scenarios.iter().enumerate() {
        let started = Instant::now();
        let outcome = run_scenario(ctx, scenario, index, &mut events);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => result.scenarios.push(ScenarioOutcome {
                label: scenario.label.clone(),
                status: RunStatus::Success,
                duration_ms,
            }),
            Err(failure) => {
                result.scenarios.push(ScenarioOutcome {
                    label: scenario.label.clone(),
                    status: RunStatus::Failed,
                    duration_ms,
                });
                result.failure = Some(failure);
                break;
            }
        }
    }

    result.event_count = events.count();
    Ok(result)
}

fn run_scenario(
    ctx: &RunContext,
    scenario: &Scenario,
    index: usize,
    events: &mut EventsWriter,
) -> Result<(), StudioError> {
    run_command_list(
        &scenario.setup,
        &std::env::current_dir().unwrap_or_else(|_| ctx.tmp_root.clone()),
        ctx.setup_timeout,
        &ctx.redact,
    )?;

    let mut session = PtySession::spawn(ctx, scenario).map_err(|e| StudioError::Internal {
        id: "pty-spawn".to_string(),
        detail: e.to_string(),
    })?;

    let deadline = Instant::now() + SCENARIO_DEADLINE;
    let mut driver = StepDriver {
        ctx,
        session: &mut session,
        scenario_index: index,
        scenario_deadline: deadline,
        events,
    };

    let outcome = driver.run_actions(&scenario.actions);

    session.shutdown();

    if let Err(failure) = &outcome {
        write_step_bundle(ctx, &mut session, failure);
    }
    outcome
}

/// Capture the final screen and offending step into the failure bundle.
fn write_step_bundle(ctx: &RunContext, session: &mut PtySession, failure: &StudioError) {
    let screen = session.snapshot().ok().map(|s| s.screen);
    let step = step_payload_for(ctx, failure);
    let bundle = crate::artifacts::FailureBundle {
        reason: format!("{}\n{}", failure.kind(), failure.bundle_reason()),
        screen,
        step,
        video_runner_log: None,
    };
    let _ = ctx.run.write_failure_bundle(&bundle, &ctx.redact);
}

fn step_payload_for(ctx: &RunContext, failure: &StudioError) -> Option<serde_json::Value> {
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

/// Drives one scenario's actions through the shared state machine.
struct StepDriver<'a, 'b> {
    ctx: &'a RunContext<'a>,
    session: &'b mut PtySession,
    scenario_index: usize,
    scenario_deadline: Instant,
    events: &'b mut EventsWriter,
}

impl StepDriver<'_, '_> {
    fn run_actions(&mut self, actions: &[Action]) -> Result<(), StudioError> {
        for (step, action) in actions.iter().enumerate() {
            if self.ctx.cancelled.load(Ordering::Relaxed) {
                return Err(StudioError::Cancelled);
            }
            self.run_action(step, action)?;
        }
        Ok(())
    }

    fn event(
        &mut self,
        step: usize,
        kind: EventKind,
        payload: Option<serde_json::Value>,
    ) -> Result<(), StudioError> {
        self.events
            .append(self.scenario_index, step, kind, payload)
            .map_err(|e| StudioError::Internal {
                id: "events-append".to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    fn step_failure(&self, step: usize, reason: impl Into<String>) -> StudioError {
        StudioError::StepFailure {
            scenario: self.scenario_index,
            step,
            reason: reason.into(),
        }
    }

    /// The deadline for a wait on this step: the tightest of the per-step
    /// timeout and the remaining scenario budget.
    fn effective_timeout(&self, action: &Action) -> Duration {
        let step = self.ctx.wait_timeout(action);
        let scenario_remaining = self
            .scenario_deadline
            .saturating_duration_since(Instant::now());
        step.min(scenario_remaining)
    }

    fn run_action(&mut self, step: usize, action: &Action) -> Result<(), StudioError> {
        self.event(
            step,
            EventKind::Dispatched,
            Some(serde_json::json!({"action": action.kind.name()})),
        )?;

        match &action.kind {
            ActionKind::Command { text } => {
                self.session
                    .send_line(text)
                    .map_err(|e| self.step_failure(step, e.to_string()))?;
                self.event(step, EventKind::Passed, None)?;
            }

            // Guardrail: validation catches these when the mode is declared,
            // but a forced lane must fail at first dispatch
            ActionKind::Input { .. } | ActionKind::Key { .. } | ActionKind::Hotkey { .. } => {
                self.event(step, EventKind::Failed, None)?;
                return Err(
                    self.step_failure(step, "interactive primitive unsupported in pty lane")
                );
            }

            ActionKind::Sleep { duration } => {
                self.sleep_cancellable(duration.as_duration())?;
                self.event(step, EventKind::Passed, None)?;
            }

            ActionKind::ExpectExitCode { code } => {
                let actual = self
                    .session
                    .capture_exit_code(step, self.effective_timeout(action))
                    .map_err(|e| self.step_failure(step, e))?;
                if actual == *code {
                    self.event(
                        step,
                        EventKind::Passed,
                        Some(serde_json::json!({"exit_code": actual})),
                    )?;
                } else {
                    self.event(
                        step,
                        EventKind::Failed,
                        Some(serde_json::json!({"expected": code, "actual": actual})),
                    )?;
                    return Err(self.step_failure(
                        step,
                        format!("expected exit code {code}, got {actual}"),
                    ));
                }
            }

            ActionKind::AssertScreenRegex { pattern } => {
                self.run_assertion(step, pattern, false)?;
            }
            ActionKind::AssertNotScreenRegex { pattern } => {
                self.run_assertion(step, pattern, true)?;
            }

            ActionKind::WaitStable { duration } => {
                let predicate = WaitPredicate::Stable {
                    duration: duration.as_duration(),
                };
                self.run_wait(step, action, &predicate, None)?;
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
                self.run_wait(step, action, &predicate, timeout.map(|t| t.as_duration()))?;
            }
            ActionKind::WaitScreenRegex { pattern } => {
                let re = evaluator::compile_pattern(pattern)
                    .map_err(|e| self.step_failure(step, e.to_string()))?;
                let predicate = WaitPredicate::ScreenRegex(re);
                self.run_wait(step, action, &predicate, None)?;
            }
            ActionKind::WaitLineRegex { pattern } => {
                let re = evaluator::compile_pattern(pattern)
                    .map_err(|e| self.step_failure(step, e.to_string()))?;
                let predicate = WaitPredicate::LineRegex(re);
                self.run_wait(step, action, &predicate, None)?;
            }
        }

        Ok(())
    }

    fn run_assertion(
        &mut self,
        step: usize,
        pattern: &str,
        negated: bool,
    ) -> Result<(), StudioError> {
        self.event(
            step,
            EventKind::Asserting,
            Some(serde_json::json!({"regex": pattern})),
        )?;
        let re = evaluator::compile_pattern(pattern)
            .map_err(|e| self.step_failure(step, e.to_string()))?;
        let snap = self
            .session
            .snapshot()
            .map_err(|e| self.step_failure(step, e.to_string()))?;
        match evaluator::check_assertion(&snap, &re, negated) {
            Ok(matched) => self.event(
                step,
                EventKind::Passed,
                matched.map(|m| serde_json::json!({"matched": m})),
            ),
            Err(reason) => {
                self.event(step, EventKind::Failed, None)?;
                Err(self.step_failure(step, reason))
            }
        }
    }

    fn run_wait(
        &mut self,
        step: usize,
        action: &Action,
        predicate: &WaitPredicate,
        declared_timeout: Option<Duration>,
    ) -> Result<(), StudioError> {
        self.event(step, EventKind::Waiting, None)?;

        let timeout = declared_timeout
            .unwrap_or_else(|| self.effective_timeout(action))
            .min(self.effective_timeout(action));
        let attempts = action.retries + 1;
        let mut last_waited = Duration::ZERO;
        let cancelled = std::sync::Arc::clone(&self.ctx.cancelled);

        for _attempt in 0..attempts {
            let session = &mut *self.session;
            let mut fetch = || session.snapshot();
            match evaluator::evaluate_wait(predicate, timeout, &mut fetch, &cancelled) {
                Ok(outcome) => {
                    return self.event(
                        step,
                        EventKind::Passed,
                        outcome.matched.map(|m| serde_json::json!({"matched": m})),
                    );
                }
                Err(WaitError::TimedOut { waited }) => {
                    last_waited = waited;
                }
                Err(WaitError::Cancelled) => return Err(StudioError::Cancelled),
                Err(WaitError::Io(e)) => return Err(self.step_failure(step, e.to_string())),
            }
        }

        self.event(
            step,
            EventKind::TimedOut,
            Some(serde_json::json!({"waited_ms": last_waited.as_millis() as u64})),
        )?;
        Err(StudioError::Timeout {
            scenario: self.scenario_index,
            step,
            waited_ms: last_waited.as_millis() as u64,
        })
    }

    fn sleep_cancellable(&self, duration: Duration) -> Result<(), StudioError> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.ctx.cancelled.load(Ordering::Relaxed) {
                return Err(StudioError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(evaluator::SAMPLE_INTERVAL.min(remaining));
        }
        Ok(())
    }
}

/// One child shell behind a PTY, with its reader thread and screen model.
struct PtySession {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    writer: Box<dyn std::io::Write + Send>,
    rx: Receiver<Vec<u8>>,
    parser: vt100::Parser,
    tail: StreamTail,
    closed: bool,
}

impl PtySession {
    fn spawn(ctx: &RunContext, scenario: &Scenario) -> anyhow::Result<Self> {
        let settings = &ctx.play.settings;
        let rows = (settings.height / CELL_HEIGHT_PX).clamp(10, 200) as u16;
        let cols = (settings.width / CELL_WIDTH_PX).clamp(20, 400) as u16;

        let pty = native_pty_system();
        let pair = pty.openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let shell = scenario.shell.as_deref().unwrap_or(default_shell());
        let mut cmd = CommandBuilder::new(shell);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        // Keep the child's prompt machinery quiet and predictable
        cmd.env("TERM", "xterm-256color");
        cmd.env("PS1", "$ ");

        let child = pair.slave.spawn_command(cmd)?;
        drop(pair.slave); // Close slave in parent

        let mut reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;

        // The single background reader. Dropping the sender on EOF is the
        // close signal the snapshot side observes.
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            child,
            writer,
            rx,
            parser: vt100::Parser::new(rows, cols, 0),
            tail: StreamTail::new(),
            closed: false,
        })
    }

    /// Send text followed by a carriage return (submit).
    fn send_line(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\r")?;
        self.writer.flush()
    }

    /// Drain pending output into the screen model and stream tail.
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => {
                    self.parser.process(&bytes);
                    self.tail.push(&bytes);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    /// Build the snapshot the evaluator sees. Exit-status sentinel lines
    /// (the echoed `echo "__tds_rc_..."` input and its expansion) are
    /// stripped from both surfaces so screenplay predicates never observe
    /// the lane's own bookkeeping.
    fn snapshot(&mut self) -> std::io::Result<Snapshot> {
        self.drain();
        Ok(Snapshot {
            screen: strip_sentinel_lines(&self.parser.screen().contents()),
            stream_tail: strip_sentinel_lines(&self.tail.as_text()),
            closed: self.closed,
        })
    }

    /// Record the shell's last exit status by echoing a step-unique marker
    /// and waiting for its expansion in the raw stream tail. The marker is
    /// read from the unfiltered tail; `snapshot()` strips it.
    fn capture_exit_code(&mut self, step: usize, timeout: Duration) -> Result<i32, String> {
        let marker = format!("{EXIT_MARKER_PREFIX}{step}_");
        // The echoed command text contains `$?`, not digits, so the pattern
        // below can only match the expanded output line
        self.send_line(&format!("echo \"{marker}$?__\""))
            .map_err(|e| e.to_string())?;

        let pattern = format!("{regex}(\\d+)__", regex = regex::escape(&marker));
        let re = evaluator::compile_pattern(&pattern).map_err(|e| e.to_string())?;

        let deadline = Instant::now() + timeout;
        loop {
            self.drain();
            let raw_tail = self.tail.as_text();
            if let Some(caps) = re.captures(&raw_tail) {
                return caps[1]
                    .parse::<i32>()
                    .map_err(|_| "malformed exit status marker".to_string());
            }
            if self.closed {
                return Err("shell exited before reporting an exit status".to_string());
            }
            if Instant::now() >= deadline {
                return Err("timed out waiting for exit status".to_string());
            }
            std::thread::sleep(evaluator::SAMPLE_INTERVAL);
        }
    }

    /// Kill and reap the child; always runs, success or failure.
    fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.closed = true;
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) { "powershell.exe" } else { "sh" }
}
