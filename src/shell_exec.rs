//! Subprocess execution.
//!
//! Every external process the studio starts goes through this module:
//! recorder/compositor/emulator invocations take the argv path via [`run`],
//! and preinstall/setup command strings take the shell path via
//! [`run_with_timeout`]. Routing everything through one choke point keeps
//! subprocess logging and timing uniform, which `tds -v` relies on for
//! triage.
//!
//! Command strings are interpreted by `sh -c` on Unix and
//! `powershell -NoProfile -Command` on Windows. The lanes themselves only
//! ever need argv invocations; the shell path exists for the screenplay's
//! own preinstall/setup lists.

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

/// Build the platform shell invocation for a command string.
fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    #[cfg(windows)]
    {
        let mut cmd = Command::new("powershell.exe");
        cmd.arg("-NoProfile").arg("-Command").arg(command);
        cmd
    }
}

/// Execute a command, logging the invocation and its timing at debug level.
///
/// ```text
/// $ vhs scenes/scene_0.tape [scene_0]
/// [tds-trace] context=scene_0 cmd="vhs scenes/scene_0.tape" dur=8123.4ms ok=true
/// ```
///
/// The `context` parameter is typically the scenario label, or `None` for
/// standalone probes.
pub fn run(cmd: &mut Command, context: Option<&str>) -> std::io::Result<Output> {
    let rendered = render_command(cmd);
    let ctx_prefix = context
        .map(|c| format!("context={c} "))
        .unwrap_or_default();

    match context {
        Some(ctx) => log::debug!("$ {rendered} [{ctx}]"),
        None => log::debug!("$ {rendered}"),
    }

    let started = Instant::now();
    let result = cmd.output();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let outcome = match &result {
        Ok(output) => format!("ok={}", output.status.success()),
        Err(e) => format!("err=\"{e}\""),
    };
    log::debug!("[tds-trace] {ctx_prefix}cmd=\"{rendered}\" dur={duration_ms:.1}ms {outcome}");

    result
}

/// Outcome of a bounded command execution.
#[derive(Debug)]
pub enum TimedRun {
    /// Command finished within the deadline.
    Completed(Output),
    /// Deadline elapsed; the child was killed and reaped.
    TimedOut,
}

/// Run a shell command string with a deadline.
///
/// Used for preinstall and scenario setup, where a hung command must not hang
/// the run. stdout/stderr are captured; on timeout the child is killed and
/// reaped before returning.
pub fn run_with_timeout(
    command: &str,
    cwd: &std::path::Path,
    timeout: Duration,
) -> std::io::Result<TimedRun> {
    log::debug!("$ {} (timeout {}s)", command, timeout.as_secs());

    let mut child = shell_command(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Take pipe handles before wait_timeout (which reaps the process)
    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    match child.wait_timeout(timeout)? {
        Some(status) => {
            use std::io::Read;
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(h) = stdout_handle.as_mut() {
                let _ = h.read_to_end(&mut stdout);
            }
            if let Some(h) = stderr_handle.as_mut() {
                let _ = h.read_to_end(&mut stderr);
            }
            Ok(TimedRun::Completed(Output {
                status,
                stdout,
                stderr,
            }))
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Ok(TimedRun::TimedOut)
        }
    }
}

/// Build the loggable form of a command.
fn render_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
