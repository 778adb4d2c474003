//! Dispatcher: effective lane and execution location.
//!
//! Environment is resolved exactly once at entry into an immutable
//! [`EnvConfig`] and passed down; lanes never read the environment
//! themselves. Fallback between local and container execution happens only
//! on tool-availability failures - an executing run never switches lanes or
//! locations after start.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use indexmap::IndexMap;

use crate::artifacts::{Manifest, RunDir, RunStatus, input_digest};
use crate::config::StudioConfig;
use crate::error::StudioError;
use crate::evaluator::DEFAULT_WAIT_TIMEOUT;
use crate::lanes::{self, LaneResult, MediaFormat, Playback, RunContext};
use crate::redact::{RedactMode, RedactionSet, effective_media_mode};
use crate::screenplay::{ExecutionMode, PolicyMode, Screenplay};
use crate::shell_exec;

/// Default container image for `--docker` execution.
const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/terminal-demo-studio/runner:latest";

/// Environment configuration, resolved once at dispatcher entry.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `TDS_SETUP_TIMEOUT_SECONDS` (default 120)
    pub setup_timeout: Duration,
    /// `TDS_DOCKER_HARDENING` (on by default)
    pub docker_hardening: bool,
    /// `TDS_DOCKER_PIDS_LIMIT` (default 512)
    pub docker_pids_limit: u32,
    /// `TDS_DOCKER_NETWORK`
    pub docker_network: Option<String>,
    /// `TDS_DOCKER_READ_ONLY`
    pub docker_read_only: bool,
    /// `TDS_DOCKER_IMAGE` (defaults to the published runner image)
    pub docker_image: String,
    /// `TDS_DOCKER_IMAGE_RETENTION` (default 3)
    pub docker_image_retention: u32,
}

impl EnvConfig {
    pub fn resolve() -> Self {
        Self {
            setup_timeout: Duration::from_secs(env_u64("TDS_SETUP_TIMEOUT_SECONDS", 120)),
            docker_hardening: env_flag("TDS_DOCKER_HARDENING", true),
            docker_pids_limit: env_u64("TDS_DOCKER_PIDS_LIMIT", 512) as u32,
            docker_network: std::env::var("TDS_DOCKER_NETWORK").ok().filter(|s| !s.is_empty()),
            docker_read_only: env_flag("TDS_DOCKER_READ_ONLY", false),
            docker_image: std::env::var("TDS_DOCKER_IMAGE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_DOCKER_IMAGE.to_string()),
            docker_image_retention: env_u64("TDS_DOCKER_IMAGE_RETENTION", 3) as u32,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"),
        Err(_) => default,
    }
}

/// Where the run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// Lane-aware: local first, container fallback where the lane allows it.
    #[default]
    Auto,
    /// `--local`: fail fast on missing tooling.
    Local,
    /// `--docker`: fail fast if the container runtime is absent.
    Docker,
}

/// Caller preferences assembled by the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// The screenplay document path, for container re-invocation.
    pub screenplay: PathBuf,
    /// Explicit lane (`--mode`); `None` means auto.
    pub mode: Option<ExecutionMode>,
    pub location: Location,
    pub formats: Vec<MediaFormat>,
    pub output_dir: Option<PathBuf>,
    pub playback: Playback,
    /// `--agent-prompts` override merged into every scenario policy.
    pub prompts_override: Option<PolicyMode>,
    pub redact_mode: RedactMode,
}

/// Resolve the effective lane from screenplay + caller preference.
pub fn resolve_lane(
    play: &Screenplay,
    explicit: Option<ExecutionMode>,
) -> Result<ExecutionMode, StudioError> {
    let Some(lane) = explicit else {
        return Ok(play.auto_mode());
    };

    // A scripted scenario can be lifted into any lane; anything else must
    // match the forced lane exactly
    for (i, scenario) in play.scenarios.iter().enumerate() {
        if scenario.mode != lane && scenario.mode != ExecutionMode::Scripted {
            return Err(StudioError::Validation {
                issues: vec![crate::error::FieldIssue::new(
                    format!("scenarios[{i}].execution_mode"),
                    format!(
                        "scenario declares '{}' which is incompatible with forced lane '{lane}'",
                        scenario.mode
                    ),
                )],
            });
        }
    }
    Ok(lane)
}

/// One external tool a lane needs, with the remediation hint `doctor`
/// prints.
pub struct ToolSpec {
    pub name: &'static str,
    pub hint: &'static str,
}

/// The external tools the given lane shells out to.
pub fn required_tools(lane: ExecutionMode) -> Vec<ToolSpec> {
    match lane {
        ExecutionMode::Scripted => vec![
            ToolSpec {
                name: "vhs",
                hint: "install vhs: https://github.com/charmbracelet/vhs",
            },
            ToolSpec {
                name: "ffmpeg",
                hint: "install ffmpeg from your package manager",
            },
            ToolSpec {
                name: "ffprobe",
                hint: "ffprobe ships with ffmpeg",
            },
        ],
        ExecutionMode::Interactive => vec![],
        ExecutionMode::Visual => vec![
            ToolSpec {
                name: "Xvfb",
                hint: "install xvfb (apt install xvfb)",
            },
            ToolSpec {
                name: "kitty",
                hint: "install kitty (apt install kitty)",
            },
            ToolSpec {
                name: "kitten",
                hint: "kitten ships with kitty >= 0.28",
            },
            ToolSpec {
                name: "ffmpeg",
                hint: "install ffmpeg from your package manager",
            },
        ],
    }
}

/// Probe one tool: present in PATH, plus its `--version` first line when it
/// will talk to us.
pub fn probe_tool(name: &str) -> Option<String> {
    which::which(name).ok()?;
    let mut cmd = Command::new(name);
    cmd.arg("--version");
    match shell_exec::run(&mut cmd, None) {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Some(stdout.lines().next().unwrap_or("").trim().to_string())
        }
        // Present but uncooperative (Xvfb has no --version exit 0 contract)
        _ => Some(String::new()),
    }
}

/// The first missing tool for a lane, if any.
pub fn missing_tool(lane: ExecutionMode) -> Option<ToolSpec> {
    required_tools(lane)
        .into_iter()
        .find(|tool| which::which(tool.name).is_err())
}

fn docker_available() -> bool {
    which::which("docker").is_ok()
}

/// Execute a validated screenplay. Returns the process exit code.
pub fn dispatch(
    play: &Screenplay,
    source: &str,
    options: &RunOptions,
    env: &EnvConfig,
    user_config: &StudioConfig,
    tmp_root: PathBuf,
) -> Result<i32, StudioError> {
    let lane = resolve_lane(play, options.mode)?;

    let use_docker = match options.location {
        Location::Local => {
            if let Some(tool) = missing_tool(lane) {
                return Err(StudioError::ToolUnavailable {
                    tool: tool.name.to_string(),
                    hint: tool.hint.to_string(),
                });
            }
            false
        }
        Location::Docker => {
            if !docker_available() {
                return Err(StudioError::ToolUnavailable {
                    tool: "docker".to_string(),
                    hint: "install docker or drop --docker".to_string(),
                });
            }
            true
        }
        Location::Auto => match lane {
            // Interactive stays local
            ExecutionMode::Interactive => false,
            ExecutionMode::Scripted | ExecutionMode::Visual => match missing_tool(lane) {
                None => false,
                Some(tool) => {
                    if docker_available() {
                        log::debug!("{} missing locally; falling back to container", tool.name);
                        true
                    } else {
                        return Err(StudioError::ToolUnavailable {
                            tool: tool.name.to_string(),
                            hint: tool.hint.to_string(),
                        });
                    }
                }
            },
        },
    };

    if use_docker {
        return run_in_container(options, env, lane);
    }

    run_local(play, source, options, env, user_config, lane, tmp_root)
}

fn run_local(
    play: &Screenplay,
    source: &str,
    options: &RunOptions,
    env: &EnvConfig,
    user_config: &StudioConfig,
    lane: ExecutionMode,
    tmp_root: PathBuf,
) -> Result<i32, StudioError> {
    let run_root = std::env::current_dir().map_err(StudioError::from)?;
    let run = RunDir::create(&run_root).map_err(StudioError::from)?;

    let mut tool_versions = IndexMap::new();
    for tool in required_tools(lane) {
        if let Some(version) = probe_tool(tool.name) {
            tool_versions.insert(tool.name.to_string(), version);
        }
    }

    let lane_name = match lane {
        ExecutionMode::Scripted => lanes::scripted::LANE_NAME,
        ExecutionMode::Interactive => lanes::pty::LANE_NAME,
        ExecutionMode::Visual => lanes::visual::LANE_NAME,
    };

    run.write_manifest(&Manifest {
        run_id: run.id().to_string(),
        input_digest: input_digest(source),
        lane: lane_name.to_string(),
        title: play.title.clone(),
        output: play.output.clone(),
        settings: play.settings.clone(),
        created_at: crate::utils::now_iso8601(),
        tool_versions,
    })
    .map_err(StudioError::from)?;

    // The caller's --agent-prompts override lands in every scenario policy
    let play_with_override;
    let play = if options.prompts_override.is_some() {
        let mut adjusted = play.clone();
        for scenario in &mut adjusted.scenarios {
            let base = scenario.policy.clone().unwrap_or_default();
            scenario.policy = Some(base.with_mode_override(options.prompts_override));
        }
        play_with_override = adjusted;
        &play_with_override
    } else {
        play
    };

    let redact = RedactionSet::from_screenplay(play, &user_config.redact.variable_patterns);
    let media_mode = effective_media_mode(options.redact_mode, &redact);

    let formats = if options.formats.is_empty() {
        default_formats(user_config)
    } else {
        options.formats.clone()
    };

    let output_dir = options
        .output_dir
        .clone()
        .or_else(|| user_config.expanded_output_dir());

    let ctx = RunContext {
        play,
        run: &run,
        redact,
        media_mode,
        formats,
        playback: options.playback,
        output_dir,
        setup_timeout: env.setup_timeout,
        default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
        cancelled: lanes::install_cancel_handler(),
        tmp_root,
    };

    let result: LaneResult = match lane {
        ExecutionMode::Scripted => lanes::scripted::run(&ctx),
        ExecutionMode::Interactive => lanes::pty::run(&ctx),
        ExecutionMode::Visual => lanes::visual::run(&ctx),
    }
    .map_err(StudioError::from)?;

    let summary = lanes::finish_run(&ctx, &result, lane_name).map_err(StudioError::from)?;

    match (&result.failure, summary.status) {
        (Some(failure), _) => {
            crate::styling::eprintln!("{failure}");
            Ok(failure.exit_code())
        }
        (None, RunStatus::Success) => Ok(crate::error::EXIT_SUCCESS),
        (None, RunStatus::Failed) => Ok(crate::error::EXIT_EXECUTION_FAILURE),
    }
}

fn default_formats(user_config: &StudioConfig) -> Vec<MediaFormat> {
    let configured: Vec<MediaFormat> = user_config
        .output_formats
        .iter()
        .filter_map(|f| f.parse().ok())
        .collect();
    if configured.is_empty() {
        vec![MediaFormat::Gif]
    } else {
        configured
    }
}

/// Re-invoke the CLI inside the hardened container image. The container sees
/// the working directory (and its run artifacts) through a bind mount.
fn run_in_container(
    options: &RunOptions,
    env: &EnvConfig,
    lane: ExecutionMode,
) -> Result<i32, StudioError> {
    let cwd = std::env::current_dir().map_err(StudioError::from)?;
    let cwd = dunce::canonicalize(&cwd).map_err(StudioError::from)?;

    let mut cmd = Command::new("docker");
    cmd.args(["run", "--rm"]);
    if env.docker_hardening {
        cmd.args(["--pids-limit", &env.docker_pids_limit.to_string()]);
        cmd.args(["--security-opt", "no-new-privileges"]);
        cmd.args(["--cap-drop", "ALL"]);
    }
    if let Some(network) = &env.docker_network {
        cmd.args(["--network", network]);
    }
    if env.docker_read_only {
        cmd.arg("--read-only");
        cmd.args(["--tmpfs", "/tmp"]);
    }
    cmd.arg("-v");
    cmd.arg(format!("{}:/work", cwd.display()));
    cmd.args(["-w", "/work"]);
    cmd.arg(&env.docker_image);

    // Rebuild the run invocation for the inner CLI, forcing local execution
    // so the container never recurses
    cmd.args(["tds", "run", "--local"]);
    cmd.args(["--mode", &lane.to_string()]);
    for format in &options.formats {
        cmd.args(["--output", &format.to_string()]);
    }
    cmd.args(["--playback", &options.playback.to_string()]);
    cmd.arg(&options.screenplay);

    let output = shell_exec::run(&mut cmd, Some("docker")).map_err(StudioError::from)?;
    // The inner run already printed the stdout contract; forward it
    print!("{}", String::from_utf8_lossy(&output.stdout));
    crate::styling::eprint!("{}", String::from_utf8_lossy(&output.stderr));
    Ok(output.status.code().unwrap_or(crate::error::EXIT_EXECUTION_FAILURE))
}
