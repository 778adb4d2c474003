//! Error types and formatting.
//!
//! One enum covers the whole failure taxonomy. The evaluator and policy
//! engine only signal; lane runtimes own the failure boundary (they write the
//! failure bundle and flush the summary), and the dispatcher translates the
//! final error into a process exit code via [`StudioError::exit_code`].

use crate::styling::{ERROR_EMOJI, HINT_EMOJI, format_with_gutter};
use color_print::cformat;

/// Process exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for an execution failure (failure bundle present).
pub const EXIT_EXECUTION_FAILURE: i32 = 1;
/// Process exit code for a validation or lint failure.
pub const EXIT_VALIDATION_FAILURE: i32 = 2;
/// Process exit code for missing tooling under strict `--local`/`--docker`.
pub const EXIT_MISSING_TOOLING: i32 = 3;

/// A single schema or lint violation with the path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path into the document, e.g. `scenarios[0].actions[2].wait_mode`
    pub field_path: String,
    pub reason: String,
}

impl FieldIssue {
    pub fn new(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field_path, self.reason)
    }
}

#[derive(Debug)]
pub enum StudioError {
    /// Input failed schema validation or strict lint. No run directory is
    /// created for this kind.
    Validation { issues: Vec<FieldIssue> },
    /// A required external tool is missing for the chosen execution location.
    ToolUnavailable { tool: String, hint: String },
    /// Preinstall or scenario setup failed or timed out.
    Setup { command: String, detail: String },
    /// A predicate did not hold, an exit code mismatched, or a forbidden
    /// primitive was dispatched in this lane.
    StepFailure {
        scenario: usize,
        step: usize,
        reason: String,
    },
    /// A wait predicate exceeded its deadline.
    Timeout {
        scenario: usize,
        step: usize,
        waited_ms: u64,
    },
    /// The policy engine aborted autonomous prompt handling; `rule` names the
    /// decision rule that fired.
    PolicyAbort { rule: String },
    /// External interrupt; the run was terminated with a clean teardown.
    Cancelled,
    /// Invariant violation. `id` is a stable identifier for triage.
    Internal { id: String, detail: String },
}

impl StudioError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            StudioError::Validation { .. } => EXIT_VALIDATION_FAILURE,
            StudioError::ToolUnavailable { .. } => EXIT_MISSING_TOOLING,
            StudioError::Setup { .. }
            | StudioError::StepFailure { .. }
            | StudioError::Timeout { .. }
            | StudioError::PolicyAbort { .. }
            | StudioError::Cancelled
            | StudioError::Internal { .. } => EXIT_EXECUTION_FAILURE,
        }
    }

    /// Short machine-readable kind, used in failure bundles and events.
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::Validation { .. } => "validation",
            StudioError::ToolUnavailable { .. } => "tool_unavailable",
            StudioError::Setup { .. } => "setup",
            StudioError::StepFailure { .. } => "step_failure",
            StudioError::Timeout { .. } => "timed_out",
            StudioError::PolicyAbort { .. } => "policy_abort",
            StudioError::Cancelled => "cancelled",
            StudioError::Internal { .. } => "internal",
        }
    }

    /// The unstyled failure reason recorded in `failure/reason.txt`.
    ///
    /// Media-facing output goes through [`std::fmt::Display`]; this form is
    /// plain text so artifact files carry no ANSI sequences.
    pub fn bundle_reason(&self) -> String {
        match self {
            StudioError::Validation { issues } => {
                let mut out = String::from("validation failed\n");
                for issue in issues {
                    out.push_str(&format!("  {issue}\n"));
                }
                out
            }
            StudioError::ToolUnavailable { tool, .. } => {
                format!("required tool unavailable: {tool}")
            }
            StudioError::Setup { command, detail } => {
                format!("setup command failed: {command}\n{detail}")
            }
            StudioError::StepFailure {
                scenario,
                step,
                reason,
            } => format!("scenario {scenario} step {step}: {reason}"),
            StudioError::Timeout {
                scenario,
                step,
                waited_ms,
            } => format!("scenario {scenario} step {step}: timed_out after {waited_ms}ms"),
            StudioError::PolicyAbort { rule } => format!("policy abort: {rule}"),
            StudioError::Cancelled => "cancelled".to_string(),
            StudioError::Internal { id, detail } => format!("internal error [{id}]: {detail}"),
        }
    }
}

impl std::fmt::Display for StudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StudioError::Validation { issues } => {
                writeln!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>Screenplay failed validation</>")
                )?;
                let joined = issues
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                write!(f, "{}", format_with_gutter(&joined))?;
                write!(
                    f,
                    "{}",
                    cformat!("{HINT_EMOJI} <dim>Run 'tds validate --explain' for the full model</>")
                )
            }

            StudioError::ToolUnavailable { tool, hint } => {
                write!(
                    f,
                    "{}\n\n{}",
                    cformat!("{ERROR_EMOJI} <red>Required tool not found: <bold>{tool}</></>"),
                    cformat!("{HINT_EMOJI} <dim>{hint}</>")
                )
            }

            StudioError::Setup { command, detail } => {
                writeln!(f, "{}", cformat!("{ERROR_EMOJI} <red>Setup command failed</>"))?;
                write!(f, "{}", format_with_gutter(command))?;
                if !detail.trim().is_empty() {
                    write!(f, "{}", format_with_gutter(detail.trim()))?;
                }
                Ok(())
            }

            StudioError::StepFailure {
                scenario,
                step,
                reason,
            } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Step failed (scenario <bold>{scenario}</>, step <bold>{step}</>): {reason}</>"
                    )
                )
            }

            StudioError::Timeout {
                scenario,
                step,
                waited_ms,
            } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Wait timed out after <bold>{waited_ms}ms</> (scenario {scenario}, step {step})</>"
                    )
                )
            }

            StudioError::PolicyAbort { rule } => {
                write!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>Prompt policy aborted the run: {rule}</>")
                )
            }

            StudioError::Cancelled => {
                write!(f, "{}", cformat!("{ERROR_EMOJI} <red>Run cancelled</>"))
            }

            StudioError::Internal { id, detail } => {
                write!(
                    f,
                    "{}\n\n{}",
                    cformat!("{ERROR_EMOJI} <red>Internal error <bold>[{id}]</>: {detail}</>"),
                    cformat!("{HINT_EMOJI} <dim>This is a bug - please report it with the run directory attached</>")
                )
            }
        }
    }
}

impl std::error::Error for StudioError {}

impl From<std::io::Error> for StudioError {
    fn from(e: std::io::Error) -> Self {
        StudioError::Internal {
            id: "io".to_string(),
            detail: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            StudioError::Validation { issues: vec![] }.exit_code(),
            EXIT_VALIDATION_FAILURE
        );
        assert_eq!(
            StudioError::ToolUnavailable {
                tool: "vhs".into(),
                hint: "install vhs".into()
            }
            .exit_code(),
            EXIT_MISSING_TOOLING
        );
        assert_eq!(StudioError::Cancelled.exit_code(), EXIT_EXECUTION_FAILURE);
        assert_eq!(
            StudioError::Timeout {
                scenario: 0,
                step: 1,
                waited_ms: 500
            }
            .exit_code(),
            EXIT_EXECUTION_FAILURE
        );
    }

    #[test]
    fn test_bundle_reason_has_no_ansi() {
        let err = StudioError::StepFailure {
            scenario: 0,
            step: 3,
            reason: "assert_screen_regex did not match".into(),
        };
        let reason = err.bundle_reason();
        assert!(!reason.contains('\u{1b}'));
        assert!(reason.contains("step 3"));
    }

    #[test]
    fn test_timeout_bundle_reason_contains_timed_out() {
        let err = StudioError::Timeout {
            scenario: 0,
            step: 0,
            waited_ms: 500,
        };
        assert!(err.bundle_reason().contains("timed_out"));
    }

    #[test]
    fn test_validation_display_lists_field_paths() {
        let err = StudioError::Validation {
            issues: vec![FieldIssue::new("scenarios[0].actions", "must not be empty")],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("scenarios[0].actions"));
        assert!(rendered.contains("must not be empty"));
    }

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(StudioError::Cancelled.kind(), "cancelled");
        assert_eq!(
            StudioError::PolicyAbort {
                rule: "max_rounds".into()
            }
            .kind(),
            "policy_abort"
        );
    }
}
