//! Lint pass over the validated model.
//!
//! Lint catches screenplays that are legal but unsafe to run autonomously -
//! mostly policy declarations that would turn `approve` into a rubber stamp.
//! Outcomes are `error` or `warning`; `--strict` promotes warnings to errors.

use serde::Serialize;

use super::policy::{PolicyMode, is_scoped_allow_regex};
use super::{ActionKind, Screenplay, WaitMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LintSeverity {
    Error,
    Warning,
}

/// One lint finding, addressed by field path like validation issues.
#[derive(Debug, Clone, Serialize)]
pub struct LintFinding {
    pub severity: LintSeverity,
    pub field_path: String,
    pub message: String,
}

impl LintFinding {
    fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: LintSeverity::Error,
            field_path: path.into(),
            message: message.into(),
        }
    }

    fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: LintSeverity::Warning,
            field_path: path.into(),
            message: message.into(),
        }
    }
}

/// Run the lint pass. `strict` promotes warnings to errors.
pub fn lint(play: &Screenplay, strict: bool) -> Vec<LintFinding> {
    let mut findings = Vec::new();

    for (i, scenario) in play.scenarios.iter().enumerate() {
        let path = format!("scenarios[{i}]");

        if let Some(policy) = &scenario.policy {
            let active = matches!(policy.mode, PolicyMode::Approve | PolicyMode::Deny);

            if active && policy.prompt_regex.is_none() {
                findings.push(LintFinding::error(
                    format!("{path}.agent_prompts.prompt_regex"),
                    format!(
                        "mode '{}' is active but no prompt_regex is declared; the policy can never fire",
                        policy.mode
                    ),
                ));
            }

            if policy.mode == PolicyMode::Approve {
                match &policy.allow_regex {
                    None => findings.push(LintFinding::warning(
                        format!("{path}.agent_prompts.allow_regex"),
                        "approve without allow_regex aborts at the first prompt; declare the context that makes approval safe",
                    )),
                    Some(pattern) if !is_scoped_allow_regex(pattern) => {
                        findings.push(LintFinding::error(
                            format!("{path}.agent_prompts.allow_regex"),
                            format!("allow_regex '{pattern}' matches everything; approve must be scoped"),
                        ))
                    }
                    Some(_) => {}
                }
            }

            if active && policy.max_rounds.is_none() {
                findings.push(LintFinding::error(
                    format!("{path}.agent_prompts.max_rounds"),
                    "unbounded max_rounds; declare a bound (1..=6)",
                ));
            }
        }

        for (j, action) in scenario.actions.iter().enumerate() {
            if let ActionKind::WaitFor { mode, .. } = &action.kind {
                if *mode == WaitMode::Default {
                    findings.push(LintFinding::warning(
                        format!("{path}.actions[{j}].wait_for"),
                        "wait_for defaults to the stream tail; wait_mode: screen is more robust for TUI output",
                    ));
                }
            }
        }
    }

    if strict {
        for finding in &mut findings {
            finding.severity = LintSeverity::Error;
        }
    }

    findings
}

/// Whether a set of findings should fail the lint command.
pub fn has_errors(findings: &[LintFinding]) -> bool {
    findings.iter().any(|f| f.severity == LintSeverity::Error)
}
