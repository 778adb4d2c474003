//! `tds run` / `tds render`.

use terminal_demo_studio::config::StudioConfig;
use terminal_demo_studio::dispatch::{self, EnvConfig, RunOptions};
use terminal_demo_studio::error::EXIT_EXECUTION_FAILURE;
use terminal_demo_studio::screenplay::{LintSeverity, lint};
use terminal_demo_studio::styling::{eprintln, error_message, warning_message};

use crate::cli::RunArgs;

pub fn execute(args: &RunArgs) -> i32 {
    let user_config = match StudioConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", error_message(e.to_string()));
            return EXIT_EXECUTION_FAILURE;
        }
    };

    // Run-scoped temp root: backs {tmp_dir} interpolation and per-scenario
    // sockets; removed on drop regardless of outcome
    let tmp_root = match tempfile::Builder::new().prefix("tds-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{}", error_message(format!("Cannot create temp root: {e}")));
            return EXIT_EXECUTION_FAILURE;
        }
    };

    let (play, source) = match super::load_screenplay(&args.screenplay, tmp_root.path()) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    // Non-strict lint runs before execution so unsafe policies are at least
    // visible; only `tds lint --strict` makes them fatal
    for finding in lint(&play, false) {
        if finding.severity == LintSeverity::Warning {
            eprintln!(
                "{}",
                warning_message(format!("{}: {}", finding.field_path, finding.message))
            );
        }
    }

    let env = EnvConfig::resolve();
    let options = RunOptions {
        screenplay: args.screenplay.clone(),
        mode: args.mode.as_explicit(),
        location: args.location(),
        formats: args.output.clone(),
        output_dir: args.output_dir.clone(),
        playback: args.playback,
        prompts_override: args.agent_prompts.as_override(),
        redact_mode: args.redact,
    };

    match dispatch::dispatch(
        &play,
        &source,
        &options,
        &env,
        &user_config,
        tmp_root.path().to_path_buf(),
    ) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    }
}
