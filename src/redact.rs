//! Redaction pipeline.
//!
//! Keeps sensitive values out of recorded media and failure artifacts. Media
//! redaction is mode-controlled; failure-artifact redaction is always on
//! regardless of the media mode. Replacement uses one fixed placeholder, so
//! applying redaction twice equals applying it once and a span is never
//! partially masked.

use serde::Serialize;

use crate::screenplay::Screenplay;

/// The fixed replacement for a sensitive span.
pub const PLACEHOLDER: &str = "********";

/// Built-in variable-name globs considered token-like. Deliberately
/// conservative; users extend the set via config.
pub const DEFAULT_VARIABLE_PATTERNS: &[&str] = &["*_API_KEY", "*_TOKEN", "*_SECRET"];

/// Media redaction mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RedactMode {
    /// Enable input-line masking when the screenplay looks sensitive;
    /// failure artifacts are always value-redacted.
    #[default]
    Auto,
    Off,
    /// Mask the screen region of the most recent `Input`/`Command` for its
    /// visible lifetime.
    InputLine,
}

/// The set of sensitive values collected from a screenplay's variables.
#[derive(Debug, Clone, Default)]
pub struct RedactionSet {
    values: Vec<String>,
}

impl RedactionSet {
    /// Collect sensitive values: every declared variable whose name matches a
    /// token-like pattern contributes its value.
    ///
    /// `extra_patterns` come from user config and are merged over
    /// [`DEFAULT_VARIABLE_PATTERNS`].
    pub fn from_screenplay(play: &Screenplay, extra_patterns: &[String]) -> Self {
        let mut patterns: Vec<&str> = DEFAULT_VARIABLE_PATTERNS.to_vec();
        patterns.extend(extra_patterns.iter().map(String::as_str));

        let mut values = Vec::new();
        for (name, value) in &play.variables {
            if value.is_empty() {
                continue;
            }
            if patterns.iter().any(|p| glob_matches(p, name)) {
                values.push(value.clone());
            }
        }
        // Longest first, so a value that contains another value is masked
        // whole rather than leaving a recognizable suffix
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every occurrence of a sensitive value with the placeholder.
    /// Idempotent: the placeholder contains no sensitive value.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for value in &self.values {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), PLACEHOLDER);
            }
        }
        out
    }

    /// Whether auto mode should enable input-line masking for this
    /// screenplay.
    pub fn marks_sensitive(&self) -> bool {
        !self.values.is_empty()
    }

    /// Whether the text contains any sensitive value. Lanes use this to mask
    /// the screen region of an input line for its visible lifetime.
    pub fn is_sensitive(&self, text: &str) -> bool {
        self.values.iter().any(|v| text.contains(v.as_str()))
    }
}

/// Resolve the effective media mode: `auto` enables input-line masking
/// exactly when the screenplay carries token-like variables.
pub fn effective_media_mode(mode: RedactMode, set: &RedactionSet) -> RedactMode {
    match mode {
        RedactMode::Auto if set.marks_sensitive() => RedactMode::InputLine,
        RedactMode::Auto => RedactMode::Off,
        explicit => explicit,
    }
}

/// Case-insensitive match of a `*`-prefix glob (the only shape the pattern
/// set uses) against a variable name.
fn glob_matches(pattern: &str, name: &str) -> bool {
    let name = name.to_ascii_uppercase();
    let pattern = pattern.to_ascii_uppercase();
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    }
}
