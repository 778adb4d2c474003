//! The action variant and its leaf value types.
//!
//! Actions form a closed sum type with explicit discriminants; the input
//! document's "mapping with at least one recognized key" shape is normalized
//! into [`ActionKind`] during validation and never inspected again.

use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Exactly the grammar `^\d+(ms|s)$`.
static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(ms|s)$").unwrap());

/// A duration parsed from `<N>ms` or `<N>s`, held as a monotonic-clock-ready
/// [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DURATION_RE
            .captures(s)
            .ok_or_else(|| format!("invalid duration '{s}' (expected <N>ms or <N>s)"))?;
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| format!("duration '{s}' out of range"))?;
        let duration = match &caps[2] {
            "ms" => Duration::from_millis(value),
            _ => Duration::from_secs(value),
        };
        Ok(DurationSpec(duration))
    }
}

impl From<DurationSpec> for String {
    fn from(spec: DurationSpec) -> String {
        let d = spec.0;
        if d.subsec_millis() == 0 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}ms", d.as_millis())
        }
    }
}

/// Normalized named key token.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyToken {
    Enter,
    Escape,
    Tab,
    Space,
    Backspace,
    Up,
    Down,
    Left,
    Right,
}

impl KeyToken {
    /// The directive token the scripted recorder understands.
    pub fn tape_token(&self) -> &'static str {
        match self {
            KeyToken::Enter => "Enter",
            KeyToken::Escape => "Escape",
            KeyToken::Tab => "Tab",
            KeyToken::Space => "Space",
            KeyToken::Backspace => "Backspace",
            KeyToken::Up => "Up",
            KeyToken::Down => "Down",
            KeyToken::Left => "Left",
            KeyToken::Right => "Right",
        }
    }

    /// The key name the terminal emulator's remote control protocol uses.
    pub fn emulator_key(&self) -> &'static str {
        match self {
            KeyToken::Enter => "enter",
            KeyToken::Escape => "escape",
            KeyToken::Tab => "tab",
            KeyToken::Space => "space",
            KeyToken::Backspace => "backspace",
            KeyToken::Up => "up",
            KeyToken::Down => "down",
            KeyToken::Left => "left",
            KeyToken::Right => "right",
        }
    }

    /// The control bytes written to a PTY for this key, when it has a plain
    /// byte encoding.
    pub fn pty_bytes(&self) -> &'static [u8] {
        match self {
            KeyToken::Enter => b"\r",
            KeyToken::Escape => b"\x1b",
            KeyToken::Tab => b"\t",
            KeyToken::Space => b" ",
            KeyToken::Backspace => b"\x7f",
            KeyToken::Up => b"\x1b[A",
            KeyToken::Down => b"\x1b[B",
            KeyToken::Left => b"\x1b[D",
            KeyToken::Right => b"\x1b[C",
        }
    }
}

/// Chord modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
}

/// Chorded key token like `ctrl+c` or `alt+f4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hotkey {
    pub modifiers: Vec<Modifier>,
    /// The final key: a single character or a named token.
    pub key: String,
}

impl FromStr for Hotkey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('+').collect();
        if parts.len() < 2 {
            return Err(format!("invalid hotkey '{s}' (expected modifier+key)"));
        }
        let mut modifiers = Vec::new();
        for part in &parts[..parts.len() - 1] {
            let modifier = part
                .to_ascii_lowercase()
                .parse::<Modifier>()
                .map_err(|_| format!("unknown modifier '{part}' in hotkey '{s}'"))?;
            modifiers.push(modifier);
        }
        let key = parts[parts.len() - 1].trim();
        if key.is_empty() {
            return Err(format!("hotkey '{s}' is missing the final key"));
        }
        Ok(Hotkey {
            modifiers,
            key: key.to_ascii_lowercase(),
        })
    }
}

impl Hotkey {
    /// The recorder directive form, e.g. `Ctrl+C`.
    pub fn tape_token(&self) -> String {
        let mut parts: Vec<String> = self
            .modifiers
            .iter()
            .map(|m| {
                let s = m.to_string();
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => s,
                }
            })
            .collect();
        parts.push(self.key.to_uppercase());
        parts.join("+")
    }

    /// The emulator remote-control form, e.g. `ctrl+c`.
    pub fn emulator_key(&self) -> String {
        let mut parts: Vec<String> = self.modifiers.iter().map(|m| m.to_string()).collect();
        parts.push(self.key.clone());
        parts.join("+")
    }

    /// The raw byte a PTY receives for a plain ctrl chord, when one exists.
    ///
    /// Only `ctrl+<letter>` has a single-byte encoding; everything else is an
    /// emulator-level chord with no PTY representation.
    pub fn pty_byte(&self) -> Option<u8> {
        if self.modifiers == [Modifier::Ctrl] && self.key.len() == 1 {
            let c = self.key.bytes().next().unwrap();
            if c.is_ascii_lowercase() {
                return Some(c - b'a' + 1);
            }
        }
        None
    }
}

/// Which snapshot surface a `wait_for` target is evaluated against.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaitMode {
    /// Match against the stream tail.
    #[default]
    Default,
    /// Match against the visible screen.
    Screen,
    /// Require the target on the current final non-empty line.
    Line,
}

/// The closed action sum type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Send text and submit (append newline).
    Command { text: String },
    /// Send text without submitting.
    Input { text: String },
    Key { key: KeyToken },
    Hotkey { hotkey: Hotkey },
    Sleep { duration: DurationSpec },
    /// Require no screen change for the duration.
    WaitStable { duration: DurationSpec },
    WaitFor {
        target: String,
        mode: WaitMode,
        timeout: Option<DurationSpec>,
    },
    /// Deadline comes from the per-step `timeout` modifier.
    WaitScreenRegex { pattern: String },
    WaitLineRegex { pattern: String },
    AssertScreenRegex { pattern: String },
    AssertNotScreenRegex { pattern: String },
    /// Interactive lane only.
    ExpectExitCode { code: i32 },
}

impl ActionKind {
    /// Short discriminant name, used in events and failure payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Command { .. } => "command",
            ActionKind::Input { .. } => "input",
            ActionKind::Key { .. } => "key",
            ActionKind::Hotkey { .. } => "hotkey",
            ActionKind::Sleep { .. } => "sleep",
            ActionKind::WaitStable { .. } => "wait_stable",
            ActionKind::WaitFor { .. } => "wait_for",
            ActionKind::WaitScreenRegex { .. } => "wait_screen_regex",
            ActionKind::WaitLineRegex { .. } => "wait_line_regex",
            ActionKind::AssertScreenRegex { .. } => "assert_screen_regex",
            ActionKind::AssertNotScreenRegex { .. } => "assert_not_screen_regex",
            ActionKind::ExpectExitCode { .. } => "expect_exit_code",
        }
    }

    /// Whether this is one of the interactive primitives the PTY lane
    /// rejects.
    pub fn is_interactive_primitive(&self) -> bool {
        matches!(
            self,
            ActionKind::Input { .. } | ActionKind::Key { .. } | ActionKind::Hotkey { .. }
        )
    }

    /// Whether this action is an explicit assertion (evaluated before waits
    /// on the same sampling tick).
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            ActionKind::AssertScreenRegex { .. } | ActionKind::AssertNotScreenRegex { .. }
        )
    }
}

/// A single step: the action plus its optional per-step modifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub id: Option<String>,
    /// Per-step deadline; the tightest of step, scenario, and global binds.
    pub timeout: Option<DurationSpec>,
    /// Extra attempts for wait predicates. Non-zero requires an explicit
    /// timeout.
    pub retries: u32,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            id: None,
            timeout: None,
            retries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::millis("500ms", Duration::from_millis(500))]
    #[case::seconds("5s", Duration::from_secs(5))]
    #[case::zero("0s", Duration::ZERO)]
    #[case::large("120s", Duration::from_secs(120))]
    fn test_duration_parse_valid(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(input.parse::<DurationSpec>().unwrap().0, expected);
    }

    #[rstest]
    #[case::bare_number("500")]
    #[case::negative("-5s")]
    #[case::fractional("1.5s")]
    #[case::minutes("2m")]
    #[case::whitespace(" 5s")]
    #[case::empty("")]
    fn test_duration_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<DurationSpec>().is_err());
    }

    #[test]
    fn test_duration_round_trip() {
        let spec: DurationSpec = "500ms".parse().unwrap();
        assert_eq!(String::from(spec), "500ms");
        let spec: DurationSpec = "5s".parse().unwrap();
        assert_eq!(String::from(spec), "5s");
    }

    #[rstest]
    #[case::ctrl_c("ctrl+c", vec![Modifier::Ctrl], "c")]
    #[case::alt_f4("alt+f4", vec![Modifier::Alt], "f4")]
    #[case::chord("ctrl+shift+p", vec![Modifier::Ctrl, Modifier::Shift], "p")]
    fn test_hotkey_parse(
        #[case] input: &str,
        #[case] modifiers: Vec<Modifier>,
        #[case] key: &str,
    ) {
        let hotkey: Hotkey = input.parse().unwrap();
        assert_eq!(hotkey.modifiers, modifiers);
        assert_eq!(hotkey.key, key);
    }

    #[rstest]
    #[case::bare_key("c")]
    #[case::unknown_modifier("super+c")]
    #[case::trailing_plus("ctrl+")]
    fn test_hotkey_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Hotkey>().is_err());
    }

    #[test]
    fn test_hotkey_tape_token() {
        let hotkey: Hotkey = "ctrl+c".parse().unwrap();
        assert_eq!(hotkey.tape_token(), "Ctrl+C");
    }

    #[test]
    fn test_hotkey_pty_byte() {
        let hotkey: Hotkey = "ctrl+c".parse().unwrap();
        assert_eq!(hotkey.pty_byte(), Some(3)); // ETX
        let hotkey: Hotkey = "alt+c".parse().unwrap();
        assert_eq!(hotkey.pty_byte(), None);
    }

    #[test]
    fn test_key_token_parse() {
        assert_eq!("enter".parse::<KeyToken>().unwrap(), KeyToken::Enter);
        assert_eq!("up".parse::<KeyToken>().unwrap(), KeyToken::Up);
        assert!("banana".parse::<KeyToken>().is_err());
    }

    #[test]
    fn test_interactive_primitive_classification() {
        assert!(ActionKind::Key { key: KeyToken::Enter }.is_interactive_primitive());
        assert!(
            ActionKind::Input {
                text: "y".to_string()
            }
            .is_interactive_primitive()
        );
        assert!(
            !ActionKind::Command {
                text: "ls".to_string()
            }
            .is_interactive_primitive()
        );
    }
}
