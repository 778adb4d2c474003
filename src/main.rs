use clap::Parser;
use std::process;

use terminal_demo_studio::config::set_config_path;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    // Tell crossterm to always emit ANSI sequences
    crossterm::style::force_color_output(true);

    let cli = Cli::parse();

    if let Some(path) = cli.config {
        set_config_path(path);
    }

    // Configure logging based on --verbose flag or RUST_LOG env var
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "off" }),
    )
    .format_timestamp_millis()
    .init();

    let exit_code = match cli.command {
        Commands::Run(args) | Commands::Render(args) => commands::run::execute(&args),
        Commands::Validate {
            screenplay,
            explain,
            json_schema,
        } => commands::validate::execute(&screenplay, explain, json_schema),
        Commands::Lint {
            screenplay,
            strict,
            json,
        } => commands::lint::execute(&screenplay, strict, json),
        Commands::Doctor { mode } => commands::doctor::execute(mode),
        Commands::Debug { run_dir, json } => commands::debug::execute(&run_dir, json),
    };

    process::exit(exit_code);
}
