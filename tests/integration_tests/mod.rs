// Integration tests are Unix-only: the interactive lane drives a real `sh`
// child behind a PTY, and validation tests shell out to the built binary.
#![cfg(unix)]

pub mod artifacts_layout;
pub mod cli_contract;
pub mod lint_cli;
pub mod pty_lane;
pub mod validate_cli;
