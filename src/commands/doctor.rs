//! `tds doctor` - tool availability probe with remediation hints.

use terminal_demo_studio::dispatch::{probe_tool, required_tools};
use terminal_demo_studio::error::{EXIT_MISSING_TOOLING, EXIT_SUCCESS};
use terminal_demo_studio::screenplay::ExecutionMode;
use terminal_demo_studio::styling::{
    eprintln, format_heading, hint_message, println, success_message, warning_message,
};

use crate::cli::ModeArg;

pub fn execute(mode: Option<ModeArg>) -> i32 {
    let lanes: Vec<ExecutionMode> = match mode.and_then(ModeArg::as_explicit) {
        Some(lane) => vec![lane],
        None => vec![
            ExecutionMode::Scripted,
            ExecutionMode::Interactive,
            ExecutionMode::Visual,
        ],
    };

    let mut missing_any = false;

    for lane in &lanes {
        println!("{}", format_heading(&lane.to_string().to_uppercase(), None));
        let tools = required_tools(*lane);
        if tools.is_empty() {
            println!("{}", success_message("no external tools required"));
            println!();
            continue;
        }
        for tool in tools {
            match probe_tool(tool.name) {
                Some(version) if !version.is_empty() => {
                    println!("{}", success_message(format!("{} ({version})", tool.name)));
                }
                Some(_) => {
                    println!("{}", success_message(tool.name));
                }
                None => {
                    missing_any = true;
                    eprintln!("{}", warning_message(format!("{} not found", tool.name)));
                    eprintln!("{}", hint_message(tool.hint));
                }
            }
        }
        println!();
    }

    // An explicitly probed lane with missing tools is a hard answer; the
    // full survey is informational
    if missing_any && mode.is_some() {
        EXIT_MISSING_TOOLING
    } else {
        EXIT_SUCCESS
    }
}
