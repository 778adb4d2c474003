//! Policy engine for autonomous approval prompts.
//!
//! A pure decision function over (screen snapshot, merged policy, round
//! counter, last sent command). The engine owns no timers and never recovers:
//! it tells the lane what to send, and the lane owns dispatch, round
//! bookkeeping, and failure.

use crate::evaluator::{Snapshot, compile_pattern};
use crate::screenplay::{PolicyMode, PromptPolicy};

/// What the lane should do on this sampling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Send the policy's approve key as a key event.
    Approve,
    /// Send the policy's deny key.
    Deny,
    /// Do nothing this tick.
    Skip,
    /// Fail the run; the string names the rule that fired.
    Abort(String),
}

/// Evaluate the merged policy against the current screen.
///
/// `round` counts approve/deny dispatches already made for this scenario;
/// `last_command` is the text of the most recent `Command` action, if any.
pub fn decide(
    snap: &Snapshot,
    policy: &PromptPolicy,
    round: u32,
    last_command: Option<&str>,
) -> PolicyDecision {
    let Some(prompt_pattern) = policy.prompt_regex.as_deref() else {
        return PolicyDecision::Skip;
    };
    let Ok(prompt_re) = compile_pattern(prompt_pattern) else {
        // Validation compiles every declared regex; reaching this is a bug
        return PolicyDecision::Abort(format!("prompt_regex '{prompt_pattern}' failed to compile"));
    };

    if !prompt_re.is_match(&snap.screen) {
        return PolicyDecision::Skip;
    }

    if round >= policy.effective_max_rounds() {
        return PolicyDecision::Abort("prompt loop exceeded max_rounds".to_string());
    }

    match policy.mode {
        // Manual is deliberately a fail-fast signal inside autonomous
        // execution
        PolicyMode::Auto | PolicyMode::Manual => {
            PolicyDecision::Abort("manual mode cannot auto-confirm prompt".to_string())
        }
        PolicyMode::Deny => PolicyDecision::Deny,
        PolicyMode::Approve => {
            let allow_matches = policy
                .allow_regex
                .as_deref()
                .and_then(|p| compile_pattern(p).ok())
                .map(|re| re.is_match(&snap.screen))
                .unwrap_or(false);
            if !allow_matches {
                return PolicyDecision::Abort(
                    "approve policy did not match allow_regex".to_string(),
                );
            }

            if !policy.allowed_command_prefixes.is_empty() {
                let permitted = last_command.is_some_and(|cmd| {
                    policy
                        .allowed_command_prefixes
                        .iter()
                        .any(|prefix| cmd.starts_with(prefix.as_str()))
                });
                if !permitted {
                    return PolicyDecision::Abort(
                        "last command does not begin with an allowed prefix".to_string(),
                    );
                }
            }

            PolicyDecision::Approve
        }
    }
}

/// Re-fire gate: after an approve/deny the engine must not fire again until
/// it observes a screen that no longer matches the prompt regex (reset) or a
/// fresh prompt on a later tick.
#[derive(Debug, Default)]
pub struct PromptGate {
    /// Set after a dispatch; cleared when the prompt disappears.
    holding: bool,
    /// Screen hash at dispatch time; a changed hash counts as a fresh prompt.
    dispatched_on: Option<[u8; 32]>,
}

impl PromptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine may evaluate this tick.
    pub fn may_fire(&mut self, snap: &Snapshot, policy: &PromptPolicy) -> bool {
        if !self.holding {
            return true;
        }

        let prompt_visible = policy
            .prompt_regex
            .as_deref()
            .and_then(|p| compile_pattern(p).ok())
            .map(|re| re.is_match(&snap.screen))
            .unwrap_or(false);

        if !prompt_visible {
            // Prompt dismissed - reset and allow the next one
            self.holding = false;
            self.dispatched_on = None;
            return true;
        }

        // Same prompt still on screen only blocks while the screen is
        // unchanged; new content means a fresh prompt
        let hash = crate::evaluator::screen_hash(&snap.screen);
        if self.dispatched_on != Some(hash) {
            self.holding = false;
            self.dispatched_on = None;
            return true;
        }

        false
    }

    /// Record that a key was dispatched in response to this screen.
    pub fn record_dispatch(&mut self, snap: &Snapshot) {
        self.holding = true;
        self.dispatched_on = Some(crate::evaluator::screen_hash(&snap.screen));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screenplay::KeyToken;

    fn snap(screen: &str) -> Snapshot {
        Snapshot {
            screen: screen.to_string(),
            stream_tail: String::new(),
            closed: false,
        }
    }

    fn approve_policy() -> PromptPolicy {
        PromptPolicy {
            mode: PolicyMode::Approve,
            prompt_regex: Some("Proceed\\?".to_string()),
            allow_regex: Some("safe demo".to_string()),
            allowed_command_prefixes: Vec::new(),
            max_rounds: Some(2),
            approve_key: KeyToken::Enter,
            deny_key: KeyToken::Escape,
        }
    }

    #[test]
    fn test_no_prompt_regex_skips() {
        let policy = PromptPolicy {
            prompt_regex: None,
            ..approve_policy()
        };
        assert_eq!(decide(&snap("Proceed?"), &policy, 0, None), PolicyDecision::Skip);
    }

    #[test]
    fn test_prompt_not_on_screen_skips() {
        let policy = approve_policy();
        assert_eq!(
            decide(&snap("compiling..."), &policy, 0, None),
            PolicyDecision::Skip
        );
    }

    #[test]
    fn test_approve_when_allow_matches() {
        let policy = approve_policy();
        let decision = decide(&snap("safe demo\nProceed?"), &policy, 0, None);
        assert_eq!(decision, PolicyDecision::Approve);
    }

    #[test]
    fn test_approve_abort_when_allow_missing() {
        let policy = PromptPolicy {
            allow_regex: None,
            ..approve_policy()
        };
        let decision = decide(&snap("Proceed?"), &policy, 0, None);
        assert_eq!(
            decision,
            PolicyDecision::Abort("approve policy did not match allow_regex".to_string())
        );
    }

    #[test]
    fn test_approve_abort_when_allow_does_not_match() {
        let policy = approve_policy();
        let decision = decide(&snap("DANGER\nProceed?"), &policy, 0, None);
        assert_eq!(
            decision,
            PolicyDecision::Abort("approve policy did not match allow_regex".to_string())
        );
    }

    #[test]
    fn test_max_rounds_aborts_before_mode_check() {
        let policy = approve_policy();
        let decision = decide(&snap("safe demo\nProceed?"), &policy, 2, None);
        assert_eq!(
            decision,
            PolicyDecision::Abort("prompt loop exceeded max_rounds".to_string())
        );
    }

    #[test]
    fn test_max_rounds_one_allows_single_dispatch() {
        let policy = PromptPolicy {
            max_rounds: Some(1),
            ..approve_policy()
        };
        assert_eq!(
            decide(&snap("safe demo\nProceed?"), &policy, 0, None),
            PolicyDecision::Approve
        );
        assert!(matches!(
            decide(&snap("safe demo\nProceed?"), &policy, 1, None),
            PolicyDecision::Abort(_)
        ));
    }

    #[test]
    fn test_manual_mode_fails_fast() {
        let policy = PromptPolicy {
            mode: PolicyMode::Manual,
            ..approve_policy()
        };
        assert_eq!(
            decide(&snap("Proceed?"), &policy, 0, None),
            PolicyDecision::Abort("manual mode cannot auto-confirm prompt".to_string())
        );
    }

    #[test]
    fn test_deny_mode() {
        let policy = PromptPolicy {
            mode: PolicyMode::Deny,
            ..approve_policy()
        };
        assert_eq!(decide(&snap("Proceed?"), &policy, 0, None), PolicyDecision::Deny);
    }

    #[test]
    fn test_command_prefix_gate() {
        let policy = PromptPolicy {
            allowed_command_prefixes: vec!["git ".to_string()],
            ..approve_policy()
        };
        assert_eq!(
            decide(&snap("safe demo\nProceed?"), &policy, 0, Some("git push")),
            PolicyDecision::Approve
        );
        assert!(matches!(
            decide(&snap("safe demo\nProceed?"), &policy, 0, Some("rm -rf /")),
            PolicyDecision::Abort(_)
        ));
        assert!(matches!(
            decide(&snap("safe demo\nProceed?"), &policy, 0, None),
            PolicyDecision::Abort(_)
        ));
    }

    #[test]
    fn test_gate_blocks_same_screen_after_dispatch() {
        let policy = approve_policy();
        let mut gate = PromptGate::new();
        let prompt = snap("safe demo\nProceed?");

        assert!(gate.may_fire(&prompt, &policy));
        gate.record_dispatch(&prompt);
        assert!(!gate.may_fire(&prompt, &policy));
    }

    #[test]
    fn test_gate_resets_when_prompt_clears() {
        let policy = approve_policy();
        let mut gate = PromptGate::new();
        let prompt = snap("safe demo\nProceed?");

        gate.record_dispatch(&prompt);
        assert!(gate.may_fire(&snap("running..."), &policy));
        // And a later prompt fires again
        assert!(gate.may_fire(&prompt, &policy));
    }

    #[test]
    fn test_gate_allows_fresh_prompt_with_new_content() {
        let policy = approve_policy();
        let mut gate = PromptGate::new();
        let first = snap("safe demo\nProceed?");
        let second = snap("safe demo\nstep 2\nProceed?");

        gate.record_dispatch(&first);
        assert!(gate.may_fire(&second, &policy));
    }
}
