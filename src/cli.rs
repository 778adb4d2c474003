//! CLI argument surface.

use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use terminal_demo_studio::dispatch::Location;
use terminal_demo_studio::lanes::{MediaFormat, Playback};
use terminal_demo_studio::redact::RedactMode;
use terminal_demo_studio::screenplay::{ExecutionMode, PolicyMode};

/// Custom styles for help output
fn help_styles() -> Styles {
    Styles::styled()
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}

/// Help template for commands
const HELP_TEMPLATE: &str = "\
{before-help}{name} - {about-with-newline}
Usage: {usage}

{all-args}{after-help}";

#[derive(Parser)]
#[command(name = "tds")]
#[command(about = "Deterministic terminal demo media from a declarative screenplay", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
#[command(styles = help_styles())]
#[command(help_template = HELP_TEMPLATE)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "\
Getting started

  tds validate demo.yaml        Check a screenplay without running it
  tds run demo.yaml             Execute and capture media
  tds doctor                    Probe for the external tools each lane needs
")]
pub struct Cli {
    /// Path to the user config file
    #[arg(long, global = true, value_name = "path", help_heading = "Global Options")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, help_heading = "Global Options")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Lane selection on the command line; `auto` resolves from the screenplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ModeArg {
    #[default]
    Auto,
    Scripted,
    Interactive,
    Visual,
}

impl ModeArg {
    pub fn as_explicit(self) -> Option<ExecutionMode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::Scripted => Some(ExecutionMode::Scripted),
            ModeArg::Interactive => Some(ExecutionMode::Interactive),
            ModeArg::Visual => Some(ExecutionMode::Visual),
        }
    }
}

/// `--agent-prompts` override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PromptsArg {
    #[default]
    Auto,
    Manual,
    Approve,
    Deny,
}

impl PromptsArg {
    pub fn as_override(self) -> Option<PolicyMode> {
        match self {
            PromptsArg::Auto => None,
            PromptsArg::Manual => Some(PolicyMode::Manual),
            PromptsArg::Approve => Some(PolicyMode::Approve),
            PromptsArg::Deny => Some(PolicyMode::Deny),
        }
    }
}

/// Flags shared by `run` and `render`.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Screenplay document to execute
    #[arg(value_name = "screenplay")]
    pub screenplay: PathBuf,

    /// Execution lane; auto resolves from the screenplay's scenarios
    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Force local execution; fail fast on missing tooling
    #[arg(long, conflicts_with = "docker")]
    pub local: bool,

    /// Force container execution; fail fast if the runtime is absent
    #[arg(long)]
    pub docker: bool,

    /// Media format to produce (repeatable)
    #[arg(long = "output", value_enum, value_name = "format")]
    pub output: Vec<MediaFormat>,

    /// Directory to copy composed media into
    #[arg(long, value_name = "path")]
    pub output_dir: Option<PathBuf>,

    /// How multi-scene media is composed
    #[arg(long, value_enum, default_value_t = Playback::Sequential)]
    pub playback: Playback,

    /// Override the screenplay's prompt policy mode
    #[arg(long = "agent-prompts", value_enum, default_value_t = PromptsArg::Auto)]
    pub agent_prompts: PromptsArg,

    /// Media redaction mode
    #[arg(long, value_enum, default_value_t = RedactMode::Auto)]
    pub redact: RedactMode,
}

impl RunArgs {
    pub fn location(&self) -> Location {
        if self.local {
            Location::Local
        } else if self.docker {
            Location::Docker
        } else {
            Location::Auto
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a screenplay and produce media
    Run(RunArgs),

    /// Synonym of run
    Render(RunArgs),

    /// Schema pass only; exits 2 when the screenplay is invalid
    Validate {
        /// Screenplay document to check
        #[arg(value_name = "screenplay")]
        screenplay: PathBuf,

        /// Print the normalized model after validation
        #[arg(long)]
        explain: bool,

        /// Print the document JSON schema and exit
        #[arg(long)]
        json_schema: bool,
    },

    /// Lint pass on the validated model
    Lint {
        /// Screenplay document to lint
        #[arg(value_name = "screenplay")]
        screenplay: PathBuf,

        /// Promote warnings to errors
        #[arg(long)]
        strict: bool,

        /// Emit findings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe tool availability with remediation hints
    Doctor {
        /// Limit probing to one lane's tools
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Triage summary from a run directory's artifacts
    Debug {
        /// Run directory (.../run-<id>)
        #[arg(value_name = "run_dir")]
        run_dir: PathBuf,

        /// Emit the triage summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_arg_mapping() {
        assert_eq!(ModeArg::Auto.as_explicit(), None);
        assert_eq!(ModeArg::Visual.as_explicit(), Some(ExecutionMode::Visual));
    }

    #[test]
    fn test_prompts_arg_mapping() {
        assert_eq!(PromptsArg::Auto.as_override(), None);
        assert_eq!(PromptsArg::Deny.as_override(), Some(PolicyMode::Deny));
    }

    #[test]
    fn test_local_and_docker_conflict() {
        let result = Cli::try_parse_from(["tds", "run", "--local", "--docker", "demo.yaml"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_args_parse_repeatable_output() {
        let cli = Cli::try_parse_from([
            "tds", "run", "--output", "gif", "--output", "mp4", "demo.yaml",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.output, vec![MediaFormat::Gif, MediaFormat::Mp4]);
            }
            _ => panic!("expected run"),
        }
    }
}
