//! Prompt policy: how autonomous capture responds to interactive approval
//! prompts.

use serde::Serialize;

use super::KeyToken;

/// Hard cap on approval rounds; a policy can never exceed it, even when
/// `max_rounds` is left unset.
pub const MAX_ROUNDS_CAP: u32 = 6;

/// Policy mode for interactive approval prompts.
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
pub enum PolicyMode {
    /// Inherit from the caller (`--agent-prompts`); behaves as `manual` when
    /// nothing overrides it.
    #[default]
    Auto,
    /// Fail fast when a prompt appears - autonomous execution cannot ask a
    /// human.
    Manual,
    Approve,
    Deny,
}

/// Declared policy for mediating interactive approval prompts.
///
/// Scenario-level policies are merged over the global policy field by field:
/// a scenario value wins wherever it is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPolicy {
    pub mode: PolicyMode,
    /// Regex that detects a prompt on the screen. Without it the policy
    /// engine never fires.
    pub prompt_regex: Option<String>,
    /// Regex the screen must additionally match for `approve` to fire.
    pub allow_regex: Option<String>,
    /// When set, the last `Command` action must begin with one of these for
    /// `approve` to fire.
    pub allowed_command_prefixes: Vec<String>,
    /// Bounded approval rounds (1..=6). `None` is legal but linted as
    /// unbounded; the engine clamps to [`MAX_ROUNDS_CAP`] at runtime.
    pub max_rounds: Option<u32>,
    pub approve_key: KeyToken,
    pub deny_key: KeyToken,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Auto,
            prompt_regex: None,
            allow_regex: None,
            allowed_command_prefixes: Vec::new(),
            max_rounds: None,
            approve_key: KeyToken::Enter,
            deny_key: KeyToken::Escape,
        }
    }
}

impl PromptPolicy {
    /// Merge a scenario-level policy over this (global) one. Set fields in
    /// `over` win; unset fields inherit.
    pub fn merged_with(&self, over: &PromptPolicy) -> PromptPolicy {
        PromptPolicy {
            mode: if over.mode == PolicyMode::Auto {
                self.mode
            } else {
                over.mode
            },
            prompt_regex: over.prompt_regex.clone().or_else(|| self.prompt_regex.clone()),
            allow_regex: over.allow_regex.clone().or_else(|| self.allow_regex.clone()),
            allowed_command_prefixes: if over.allowed_command_prefixes.is_empty() {
                self.allowed_command_prefixes.clone()
            } else {
                over.allowed_command_prefixes.clone()
            },
            max_rounds: over.max_rounds.or(self.max_rounds),
            approve_key: over.approve_key,
            deny_key: over.deny_key,
        }
    }

    /// The effective round bound: the declared value clamped to the cap.
    pub fn effective_max_rounds(&self) -> u32 {
        self.max_rounds.unwrap_or(MAX_ROUNDS_CAP).min(MAX_ROUNDS_CAP)
    }

    /// The caller's `--agent-prompts` override resolved into the policy.
    pub fn with_mode_override(&self, mode: Option<PolicyMode>) -> PromptPolicy {
        match mode {
            Some(mode) if mode != PolicyMode::Auto => PromptPolicy {
                mode,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

/// Whether a declared allow regex is scoped: non-trivial and not equivalent
/// to match-all. An unscoped allow regex makes `approve` a rubber stamp.
pub fn is_scoped_allow_regex(pattern: &str) -> bool {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return false;
    }
    // Patterns equivalent to match-all, with or without anchors.
    const MATCH_ALL: &[&str] = &[
        ".*", ".+", ".?", "^.*$", "^.+$", "(.*)", "(.+)", "^(.*)$", "[\\s\\S]*", "[\\s\\S]+",
    ];
    !MATCH_ALL.contains(&trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_merge_scenario_mode_wins() {
        let global = PromptPolicy {
            mode: PolicyMode::Deny,
            prompt_regex: Some("Proceed\\?".to_string()),
            ..Default::default()
        };
        let scenario = PromptPolicy {
            mode: PolicyMode::Approve,
            allow_regex: Some("safe demo".to_string()),
            ..Default::default()
        };
        let merged = global.merged_with(&scenario);
        assert_eq!(merged.mode, PolicyMode::Approve);
        // prompt_regex inherited from global
        assert_eq!(merged.prompt_regex.as_deref(), Some("Proceed\\?"));
        assert_eq!(merged.allow_regex.as_deref(), Some("safe demo"));
    }

    #[test]
    fn test_merge_auto_mode_inherits() {
        let global = PromptPolicy {
            mode: PolicyMode::Deny,
            ..Default::default()
        };
        let scenario = PromptPolicy::default();
        assert_eq!(global.merged_with(&scenario).mode, PolicyMode::Deny);
    }

    #[test]
    fn test_effective_max_rounds_clamps() {
        let policy = PromptPolicy {
            max_rounds: Some(3),
            ..Default::default()
        };
        assert_eq!(policy.effective_max_rounds(), 3);

        let unbounded = PromptPolicy::default();
        assert_eq!(unbounded.effective_max_rounds(), MAX_ROUNDS_CAP);
    }

    #[rstest]
    #[case::empty("", false)]
    #[case::whitespace("  ", false)]
    #[case::dot_star(".*", false)]
    #[case::anchored_dot_star("^.*$", false)]
    #[case::dot_plus(".+", false)]
    #[case::grouped("(.*)", false)]
    #[case::real_pattern("safe demo", true)]
    #[case::anchored_word("^Proceed", true)]
    fn test_is_scoped_allow_regex(#[case] pattern: &str, #[case] scoped: bool) {
        assert_eq!(is_scoped_allow_regex(pattern), scoped);
    }

    #[test]
    fn test_mode_override() {
        let policy = PromptPolicy::default();
        let overridden = policy.with_mode_override(Some(PolicyMode::Deny));
        assert_eq!(overridden.mode, PolicyMode::Deny);
        let unchanged = policy.with_mode_override(None);
        assert_eq!(unchanged.mode, PolicyMode::Auto);
    }
}
