//! Consolidated styling module for terminal output.
//!
//! This module uses the anstyle ecosystem:
//! - anstream for auto-detecting color support
//! - anstyle for composable styling
//! - `color_print::cformat` with HTML-like tags for user-facing messages
//!
//! ## stdout vs stderr principle
//!
//! - **stdout**: Primary data output (`KEY=VALUE` run results, JSON)
//! - **stderr**: Status messages (progress, success, errors, hints, warnings)
//!
//! This separation allows piping (`tds run demo.yaml | grep RUN_DIR`) without
//! status messages interfering. Use `println!` for primary output,
//! `eprintln!` for status messages.

use anstyle::{AnsiColor, Color, Style};
use color_print::cformat;

// Re-exports from anstream (auto-detecting output)
pub use anstream::{eprint, eprintln, print, println, stderr, stdout};

/// Gutter style for quoted content (commands, regexes, failure reasons).
///
/// The dimmest background that works on both dark and light terminals among
/// the basic ANSI colors.
pub const GUTTER: Style = Style::new().bg_color(Some(Color::Ansi(AnsiColor::BrightWhite)));

/// Progress emoji: `cformat!("{PROGRESS_EMOJI} <cyan>message</>")`
pub const PROGRESS_EMOJI: &str = "🔄";

/// Success emoji: `cformat!("{SUCCESS_EMOJI} <green>message</>")`
pub const SUCCESS_EMOJI: &str = "✅";

/// Error emoji: `cformat!("{ERROR_EMOJI} <red>message</>")`
pub const ERROR_EMOJI: &str = "❌";

/// Warning emoji: `cformat!("{WARNING_EMOJI} <yellow>message</>")`
pub const WARNING_EMOJI: &str = "🟡";

/// Hint emoji: `cformat!("{HINT_EMOJI} <dim>message</>")`
pub const HINT_EMOJI: &str = "💡";

/// Info emoji - use for neutral status
pub const INFO_EMOJI: &str = "⚪";

/// Format an error message with emoji and red styling.
///
/// Content can include inner styling like `<bold>`:
/// ```
/// use color_print::cformat;
/// use terminal_demo_studio::styling::error_message;
///
/// let label = "intro";
/// println!("{}", error_message(cformat!("Scenario <bold>{label}</> failed")));
/// ```
pub fn error_message(content: impl AsRef<str>) -> String {
    cformat!("{ERROR_EMOJI} <red>{}</>", content.as_ref())
}

/// Format a hint message with emoji and dim styling
pub fn hint_message(content: impl AsRef<str>) -> String {
    cformat!("{HINT_EMOJI} <dim>{}</>", content.as_ref())
}

/// Format a warning message with emoji and yellow styling
pub fn warning_message(content: impl AsRef<str>) -> String {
    cformat!("{WARNING_EMOJI} <yellow>{}</>", content.as_ref())
}

/// Format a success message with emoji and green styling
pub fn success_message(content: impl AsRef<str>) -> String {
    cformat!("{SUCCESS_EMOJI} <green>{}</>", content.as_ref())
}

/// Format a progress message with emoji and cyan styling
pub fn progress_message(content: impl AsRef<str>) -> String {
    cformat!("{PROGRESS_EMOJI} <cyan>{}</>", content.as_ref())
}

/// Format an info message with emoji (no color - neutral status)
pub fn info_message(content: impl AsRef<str>) -> String {
    cformat!("{INFO_EMOJI} {}", content.as_ref())
}

/// Format a section heading (cyan text, no emoji) with optional suffix info.
pub fn format_heading(title: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) => cformat!("<cyan>{}</>  {}", title, s),
        None => cformat!("<cyan>{}</>", title),
    }
}

/// Formats text with a gutter (single-space with background color) on each line.
///
/// This creates a subtle visual separator for quoted content like commands or
/// failure reasons. The gutter appears at column 0, followed by 1 space, then
/// the content starts at column 2 - aligned with message symbols (1 column) +
/// space (1 column).
pub fn format_with_gutter(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        out.push_str(&format!("{GUTTER} {GUTTER:#} {line}\n"));
    }
    if content.lines().next().is_none() {
        out.push_str(&format!("{GUTTER} {GUTTER:#}\n"));
    }
    out
}

/// Suggest the closest match for an unrecognized name.
///
/// Returns `None` when nothing is close enough to be a plausible typo.
/// The threshold is deliberately conservative: a suggestion that's wrong is
/// worse than no suggestion.
pub fn suggest_nearest<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, strsim::jaro_winkler(input, c)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gutter_style() {
        // BrightWhite background is ANSI 107
        let rendered = GUTTER.render().to_string();
        assert!(rendered.contains("107"));
    }

    #[test]
    fn test_error_message() {
        let msg = error_message("Something went wrong");
        assert!(msg.contains("❌"));
        assert!(msg.contains("Something went wrong"));
    }

    #[test]
    fn test_error_message_with_inner_styling() {
        let label = "intro";
        let msg = error_message(cformat!("Scenario <bold>{label}</> failed"));
        assert!(msg.contains("❌"));
        assert!(msg.contains("intro"));
    }

    #[test]
    fn test_hint_message() {
        let msg = hint_message("Try running --help");
        assert!(msg.contains("💡"));
        assert!(msg.contains("Try running --help"));
    }

    #[test]
    fn test_warning_message() {
        let msg = warning_message("Deprecated option");
        assert!(msg.contains("🟡"));
        assert!(msg.contains("Deprecated option"));
    }

    #[test]
    fn test_format_with_gutter_multiline() {
        let formatted = format_with_gutter("line one\nline two");
        assert_eq!(formatted.lines().count(), 2);
        assert!(formatted.contains("line one"));
        assert!(formatted.contains("line two"));
    }

    #[test]
    fn test_format_with_gutter_empty() {
        let formatted = format_with_gutter("");
        assert_eq!(formatted.lines().count(), 1);
    }

    #[test]
    fn test_format_heading_with_suffix() {
        let heading = format_heading("TOOLS", Some("scripted lane"));
        assert!(heading.contains("TOOLS"));
        assert!(heading.contains("scripted lane"));
    }

    #[test]
    fn test_suggest_nearest_close_match() {
        let candidates = ["wait_for", "wait_mode", "wait_timeout"];
        assert_eq!(suggest_nearest("wait_fro", &candidates), Some("wait_for"));
    }

    #[test]
    fn test_suggest_nearest_no_match() {
        let candidates = ["command", "input", "key"];
        assert_eq!(suggest_nearest("zzzzz", &candidates), None);
    }
}
