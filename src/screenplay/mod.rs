//! Screenplay model and validation
//!
//! A screenplay is the input document describing a demo: visual settings,
//! environment setup, and one or more scenarios of actions. This module owns
//! the typed representation and the path from a parsed YAML document to a
//! validated model:
//!
//! 1. [`interpolate`] substitutes `{name}` variables (plus the system
//!    `tmp_dir`) into the raw document,
//! 2. [`build`] transforms the interpolated document into the typed model,
//!    rejecting invalid inputs with precise field-path errors,
//! 3. [`lint`] flags legal-but-unsafe policies on the validated model.
//!
//! Validation is total: a screenplay that builds is fully executable, and
//! partial screenplays are never executed. The model is built once and never
//! mutated.

mod action;
mod build;
mod interpolate;
mod lint;
mod policy;

pub use action::{Action, ActionKind, DurationSpec, Hotkey, KeyToken, WaitMode};
pub use build::{RECOGNIZED_ACTION_KEYS, build};
pub use interpolate::interpolate;
pub use lint::{LintFinding, LintSeverity, has_errors, lint};
pub use policy::{PolicyMode, PromptPolicy};

use std::path::Path;

use schemars::JsonSchema;
use serde::Serialize;

use crate::error::FieldIssue;

/// Visual settings for recorded media.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub theme: String,
    pub font_family: Option<String>,
    pub framerate: u32,
    pub padding: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            theme: "dark".to_string(),
            font_family: None,
            framerate: 30,
            padding: 24,
        }
    }
}

/// How a scenario is executed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionMode {
    /// Compiled to a directive program for the headless recorder.
    #[default]
    Scripted,
    /// Drives a persistent child shell through a pseudoterminal.
    Interactive,
    /// Drives a real terminal emulator on a virtual display.
    Visual,
}

/// One ordered sequence of actions, rendered as one scene.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub label: String,
    pub mode: ExecutionMode,
    /// Shell selector (e.g. `bash`); lanes fall back to the platform shell.
    pub shell: Option<String>,
    /// Commands run before the first action, subject to the setup timeout.
    pub setup: Vec<String>,
    pub actions: Vec<Action>,
    /// Scenario-level prompt policy, already merged over the global policy.
    pub policy: Option<PromptPolicy>,
}

/// The validated input document for one run.
#[derive(Debug, Clone, Serialize)]
pub struct Screenplay {
    pub title: String,
    /// Filesystem-safe token naming the composed media files.
    pub output: String,
    pub settings: Settings,
    pub scenarios: Vec<Scenario>,
    /// Declared variable bindings, in declaration order.
    pub variables: indexmap::IndexMap<String, String>,
    /// Commands run once before any scenario, subject to the setup timeout.
    pub preinstall: Vec<String>,
}

impl Screenplay {
    /// Parse, interpolate, and validate a YAML screenplay document.
    ///
    /// `tmp_dir` is the run-scoped directory backing the `{tmp_dir}`
    /// interpolation variable.
    pub fn from_yaml(source: &str, tmp_dir: &Path) -> Result<Self, Vec<FieldIssue>> {
        let doc: serde_yaml::Value = serde_yaml::from_str(source)
            .map_err(|e| vec![FieldIssue::new("(document)", format!("invalid YAML: {e}"))])?;
        let doc = interpolate(&doc, tmp_dir)?;
        build(&doc)
    }

    /// The execution mode the dispatcher resolves for `--mode auto`:
    /// `visual` if any scenario declares it, else `interactive` if any does,
    /// else `scripted`.
    pub fn auto_mode(&self) -> ExecutionMode {
        if self.scenarios.iter().any(|s| s.mode == ExecutionMode::Visual) {
            ExecutionMode::Visual
        } else if self
            .scenarios
            .iter()
            .any(|s| s.mode == ExecutionMode::Interactive)
        {
            ExecutionMode::Interactive
        } else {
            ExecutionMode::Scripted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(mode: &str) -> String {
        format!(
            r#"
title: Demo
output: demo
scenarios:
  - label: intro
    execution_mode: {mode}
    actions:
      - command: echo hello
"#
        )
    }

    #[test]
    fn test_from_yaml_minimal() {
        let tmp = tempfile::tempdir().unwrap();
        let play = Screenplay::from_yaml(&minimal("scripted"), tmp.path()).unwrap();
        assert_eq!(play.title, "Demo");
        assert_eq!(play.scenarios.len(), 1);
        assert_eq!(play.scenarios[0].actions.len(), 1);
    }

    #[test]
    fn test_auto_mode_prefers_visual() {
        let tmp = tempfile::tempdir().unwrap();
        let source = r#"
title: Demo
output: demo
scenarios:
  - label: one
    execution_mode: scripted
    actions: ["echo a"]
  - label: two
    execution_mode: visual
    actions: ["echo b"]
"#;
        let play = Screenplay::from_yaml(source, tmp.path()).unwrap();
        assert_eq!(play.auto_mode(), ExecutionMode::Visual);
    }

    #[test]
    fn test_auto_mode_interactive_over_scripted() {
        let tmp = tempfile::tempdir().unwrap();
        let play = Screenplay::from_yaml(&minimal("interactive"), tmp.path()).unwrap();
        assert_eq!(play.auto_mode(), ExecutionMode::Interactive);
    }

    #[test]
    fn test_invalid_yaml_is_a_document_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Screenplay::from_yaml(": not yaml [", tmp.path()).unwrap_err();
        assert_eq!(err[0].field_path, "(document)");
    }
}
