//! Raw document → typed model.
//!
//! `build` walks the interpolated YAML value directly instead of deriving
//! serde structs: every rejection needs the dotted path of the offending
//! field, and unknown keys need a nearest-match suggestion, neither of which
//! serde's derived errors carry. Validation is total - all issues are
//! collected in one pass and a partially valid screenplay is never returned.

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::FieldIssue;
use crate::styling::suggest_nearest;

use super::policy::{MAX_ROUNDS_CAP, PolicyMode, PromptPolicy};
use super::{
    Action, ActionKind, DurationSpec, ExecutionMode, Hotkey, KeyToken, Scenario, Screenplay,
    Settings, WaitMode,
};

/// The action keys a mapping-form action may carry, one of which must be
/// present.
pub const RECOGNIZED_ACTION_KEYS: &[&str] = &[
    "command",
    "input",
    "key",
    "hotkey",
    "sleep",
    "wait_stable",
    "wait_for",
    "wait_screen_regex",
    "wait_line_regex",
    "assert_screen_regex",
    "assert_not_screen_regex",
    "expect_exit_code",
];

/// Modifier keys legal alongside a primary action key.
const ACTION_MODIFIER_KEYS: &[&str] = &["id", "timeout", "retries", "wait_mode", "wait_timeout"];

const TOP_LEVEL_KEYS: &[&str] = &[
    "title",
    "output",
    "scenarios",
    "settings",
    "variables",
    "preinstall",
    "agent_prompts",
];

const SCENARIO_KEYS: &[&str] = &[
    "label",
    "actions",
    "surface",
    "execution_mode",
    "shell",
    "setup",
    "agent_prompts",
];

const SETTINGS_KEYS: &[&str] =
    &["width", "height", "theme", "font_family", "framerate", "padding"];

const POLICY_KEYS: &[&str] = &[
    "mode",
    "prompt_regex",
    "allow_regex",
    "allowed_command_prefixes",
    "max_rounds",
    "approve_key",
    "deny_key",
];

/// Transform an interpolated document into the typed model, or the full list
/// of violations.
pub fn build(doc: &Value) -> Result<Screenplay, Vec<FieldIssue>> {
    let mut issues = Vec::new();

    let Some(root) = doc.as_mapping() else {
        return Err(vec![FieldIssue::new(
            "(document)",
            "screenplay must be a mapping",
        )]);
    };

    check_unknown_keys(root, "", TOP_LEVEL_KEYS, &mut issues);

    let title = require_string(root, "", "title", &mut issues);
    let output = require_string(root, "", "output", &mut issues);

    if let Some(output) = &output {
        if !is_filesystem_safe(output) {
            issues.push(FieldIssue::new(
                "output",
                format!("'{output}' is not a filesystem-safe token"),
            ));
        }
    }

    let settings = match root.get("settings") {
        Some(value) => parse_settings(value, &mut issues),
        None => Settings::default(),
    };

    let variables = parse_variables(root, &mut issues);
    let preinstall = parse_command_list(root.get("preinstall"), "preinstall", &mut issues);

    let global_policy = root
        .get("agent_prompts")
        .map(|value| parse_policy(value, "agent_prompts", &mut issues));

    let mut scenarios = Vec::new();
    match root.get("scenarios") {
        None => issues.push(FieldIssue::new("scenarios", "missing required key")),
        Some(Value::Sequence(seq)) if seq.is_empty() => {
            issues.push(FieldIssue::new("scenarios", "must contain at least one scenario"));
        }
        Some(Value::Sequence(seq)) => {
            for (i, raw) in seq.iter().enumerate() {
                if let Some(scenario) =
                    parse_scenario(raw, i, global_policy.as_ref(), &mut issues)
                {
                    scenarios.push(scenario);
                }
            }
        }
        Some(_) => issues.push(FieldIssue::new("scenarios", "must be a sequence")),
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(Screenplay {
        title: title.unwrap_or_default(),
        output: output.unwrap_or_default(),
        settings,
        scenarios,
        variables,
        preinstall,
    })
}

fn parse_scenario(
    raw: &Value,
    index: usize,
    global_policy: Option<&PromptPolicy>,
    issues: &mut Vec<FieldIssue>,
) -> Option<Scenario> {
    let path = format!("scenarios[{index}]");
    let Some(map) = raw.as_mapping() else {
        issues.push(FieldIssue::new(&path, "scenario must be a mapping"));
        return None;
    };

    check_unknown_keys(map, &path, SCENARIO_KEYS, issues);

    let label = require_string(map, &path, "label", issues);

    if let Some(surface) = map.get("surface") {
        if surface.as_str() != Some("terminal") {
            issues.push(FieldIssue::new(
                format!("{path}.surface"),
                "only 'terminal' is supported",
            ));
        }
    }

    let mode = match map.get("execution_mode") {
        None => ExecutionMode::Scripted,
        Some(value) => match value.as_str().and_then(|s| s.parse::<ExecutionMode>().ok()) {
            Some(mode) => mode,
            None => {
                issues.push(FieldIssue::new(
                    format!("{path}.execution_mode"),
                    "expected one of: scripted, interactive, visual",
                ));
                ExecutionMode::Scripted
            }
        },
    };

    let shell = optional_string(map, &path, "shell", issues);
    let setup = parse_command_list(map.get("setup"), &format!("{path}.setup"), issues);

    let scenario_policy = map
        .get("agent_prompts")
        .map(|value| parse_policy(value, &format!("{path}.agent_prompts"), issues));

    let policy = match (global_policy, scenario_policy) {
        (Some(global), Some(scenario)) => Some(global.merged_with(&scenario)),
        (Some(global), None) => Some(global.clone()),
        (None, scenario) => scenario,
    };

    let mut actions = Vec::new();
    match map.get("actions") {
        None => issues.push(FieldIssue::new(format!("{path}.actions"), "missing required key")),
        Some(Value::Sequence(seq)) if seq.is_empty() => {
            issues.push(FieldIssue::new(
                format!("{path}.actions"),
                "must contain at least one action",
            ));
        }
        Some(Value::Sequence(seq)) => {
            for (j, raw_action) in seq.iter().enumerate() {
                let action_path = format!("{path}.actions[{j}]");
                if let Some(action) = parse_action(raw_action, &action_path, mode, issues) {
                    actions.push(action);
                }
            }
        }
        Some(_) => issues.push(FieldIssue::new(format!("{path}.actions"), "must be a sequence")),
    }

    Some(Scenario {
        label: label.unwrap_or_default(),
        mode,
        shell,
        setup,
        actions,
        policy,
    })
}

fn parse_action(
    raw: &Value,
    path: &str,
    mode: ExecutionMode,
    issues: &mut Vec<FieldIssue>,
) -> Option<Action> {
    // A bare string is shorthand for a command
    if let Some(text) = raw.as_str() {
        return Some(Action::new(ActionKind::Command {
            text: text.to_string(),
        }));
    }

    let Some(map) = raw.as_mapping() else {
        issues.push(FieldIssue::new(path, "action must be a string or a mapping"));
        return None;
    };

    let mut primary_keys: Vec<&str> = Vec::new();
    for key in map.keys() {
        let Some(key) = key.as_str() else {
            issues.push(FieldIssue::new(path, "action keys must be strings"));
            return None;
        };
        if RECOGNIZED_ACTION_KEYS.contains(&key) {
            primary_keys.push(key);
        } else if !ACTION_MODIFIER_KEYS.contains(&key) {
            let all: Vec<&str> = RECOGNIZED_ACTION_KEYS
                .iter()
                .chain(ACTION_MODIFIER_KEYS)
                .copied()
                .collect();
            let reason = match suggest_nearest(key, &all) {
                Some(suggestion) => {
                    format!("unknown action field '{key}' (did you mean '{suggestion}'?)")
                }
                None => format!("unknown action field '{key}'"),
            };
            issues.push(FieldIssue::new(format!("{path}.{key}"), reason));
        }
    }

    match primary_keys.len() {
        0 => {
            issues.push(FieldIssue::new(
                path,
                format!("action must contain one of: {}", RECOGNIZED_ACTION_KEYS.join(", ")),
            ));
            return None;
        }
        1 => {}
        _ => {
            issues.push(FieldIssue::new(
                path,
                format!("conflicting action keys: {}", primary_keys.join(", ")),
            ));
            return None;
        }
    }
    let primary = primary_keys[0];

    // wait_mode / wait_timeout only modify wait_for
    if primary != "wait_for" {
        for modifier in ["wait_mode", "wait_timeout"] {
            if map.contains_key(modifier) {
                issues.push(FieldIssue::new(
                    format!("{path}.{modifier}"),
                    format!("requires 'wait_for' (found with '{primary}')"),
                ));
            }
        }
    }

    let kind = parse_action_kind(map, primary, path, issues)?;

    // Lane-compatibility checks happen at validation time so a bad screenplay
    // never starts executing
    match mode {
        ExecutionMode::Interactive if kind.is_interactive_primitive() => {
            issues.push(FieldIssue::new(
                format!("{path}.{primary}"),
                "interactive primitive unsupported in pty lane",
            ));
        }
        ExecutionMode::Scripted | ExecutionMode::Visual
            if matches!(kind, ActionKind::ExpectExitCode { .. }) =>
        {
            issues.push(FieldIssue::new(
                format!("{path}.expect_exit_code"),
                format!("only supported in the interactive lane (scenario mode is '{mode}')"),
            ));
        }
        _ => {}
    }

    let id = optional_string(map, path, "id", issues);
    let timeout = optional_duration(map, path, "timeout", issues);
    let retries = match map.get("retries") {
        None => 0,
        Some(value) => match value.as_u64() {
            Some(n) => n as u32,
            None => {
                issues.push(FieldIssue::new(
                    format!("{path}.retries"),
                    "must be a non-negative integer",
                ));
                0
            }
        },
    };

    if retries > 0 && timeout.is_none() {
        issues.push(FieldIssue::new(
            format!("{path}.retries"),
            "retries > 0 requires an explicit timeout",
        ));
    }

    Some(Action {
        kind,
        id,
        timeout,
        retries,
    })
}

fn parse_action_kind(
    map: &serde_yaml::Mapping,
    primary: &str,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<ActionKind> {
    let value = map.get(primary).expect("primary key present");
    let field = format!("{path}.{primary}");

    let as_string = |value: &Value, issues: &mut Vec<FieldIssue>| -> Option<String> {
        match value.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                issues.push(FieldIssue::new(&field, "must be a string"));
                None
            }
        }
    };

    match primary {
        "command" => Some(ActionKind::Command {
            text: as_string(value, issues)?,
        }),
        "input" => Some(ActionKind::Input {
            text: as_string(value, issues)?,
        }),
        "key" => {
            let raw = as_string(value, issues)?;
            match raw.parse::<KeyToken>() {
                Ok(key) => Some(ActionKind::Key { key }),
                Err(_) => {
                    issues.push(FieldIssue::new(
                        &field,
                        format!("unknown key token '{raw}'"),
                    ));
                    None
                }
            }
        }
        "hotkey" => {
            let raw = as_string(value, issues)?;
            match raw.parse::<Hotkey>() {
                Ok(hotkey) => Some(ActionKind::Hotkey { hotkey }),
                Err(e) => {
                    issues.push(FieldIssue::new(&field, e));
                    None
                }
            }
        }
        "sleep" => Some(ActionKind::Sleep {
            duration: parse_duration_value(value, &field, issues)?,
        }),
        "wait_stable" => Some(ActionKind::WaitStable {
            duration: parse_duration_value(value, &field, issues)?,
        }),
        "wait_for" => {
            let target = as_string(value, issues)?;
            let mode = match map.get("wait_mode") {
                None => WaitMode::Default,
                Some(value) => match value.as_str().and_then(|s| s.parse::<WaitMode>().ok()) {
                    Some(mode) => mode,
                    None => {
                        issues.push(FieldIssue::new(
                            format!("{path}.wait_mode"),
                            "expected one of: default, screen, line",
                        ));
                        WaitMode::Default
                    }
                },
            };
            let timeout = optional_duration(map, path, "wait_timeout", issues);
            Some(ActionKind::WaitFor {
                target,
                mode,
                timeout,
            })
        }
        "wait_screen_regex" => Some(ActionKind::WaitScreenRegex {
            pattern: parse_regex_value(value, &field, issues)?,
        }),
        "wait_line_regex" => Some(ActionKind::WaitLineRegex {
            pattern: parse_regex_value(value, &field, issues)?,
        }),
        "assert_screen_regex" => Some(ActionKind::AssertScreenRegex {
            pattern: parse_regex_value(value, &field, issues)?,
        }),
        "assert_not_screen_regex" => Some(ActionKind::AssertNotScreenRegex {
            pattern: parse_regex_value(value, &field, issues)?,
        }),
        "expect_exit_code" => match value.as_i64() {
            Some(code) if (0..=255).contains(&code) => {
                Some(ActionKind::ExpectExitCode { code: code as i32 })
            }
            _ => {
                issues.push(FieldIssue::new(&field, "must be an integer in 0..=255"));
                None
            }
        },
        _ => unreachable!("primary key is pre-filtered"),
    }
}

fn parse_settings(value: &Value, issues: &mut Vec<FieldIssue>) -> Settings {
    let mut settings = Settings::default();
    let Some(map) = value.as_mapping() else {
        issues.push(FieldIssue::new("settings", "must be a mapping"));
        return settings;
    };

    check_unknown_keys(map, "settings", SETTINGS_KEYS, issues);

    let mut positive = |key: &str, issues: &mut Vec<FieldIssue>| -> Option<u32> {
        match map.get(key) {
            None => None,
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 && n <= u32::MAX as u64 => Some(n as u32),
                _ => {
                    issues.push(FieldIssue::new(
                        format!("settings.{key}"),
                        "must be a positive integer",
                    ));
                    None
                }
            },
        }
    };

    if let Some(width) = positive("width", issues) {
        settings.width = width;
    }
    if let Some(height) = positive("height", issues) {
        settings.height = height;
    }
    if let Some(framerate) = positive("framerate", issues) {
        settings.framerate = framerate;
    }
    // Padding may legitimately be zero
    if let Some(value) = map.get("padding") {
        match value.as_u64() {
            Some(n) if n <= u32::MAX as u64 => settings.padding = n as u32,
            _ => issues.push(FieldIssue::new(
                "settings.padding",
                "must be a non-negative integer",
            )),
        }
    }
    if let Some(theme) = optional_string(map, "settings", "theme", issues) {
        settings.theme = theme;
    }
    settings.font_family = optional_string(map, "settings", "font_family", issues);

    settings
}

fn parse_policy(value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> PromptPolicy {
    let mut policy = PromptPolicy::default();

    // A bare string is shorthand for the mode
    if let Some(mode) = value.as_str() {
        match mode.parse::<PolicyMode>() {
            Ok(mode) => policy.mode = mode,
            Err(_) => issues.push(FieldIssue::new(
                path,
                "expected one of: auto, manual, approve, deny",
            )),
        }
        return policy;
    }

    let Some(map) = value.as_mapping() else {
        issues.push(FieldIssue::new(path, "must be a mode string or a mapping"));
        return policy;
    };

    check_unknown_keys(map, path, POLICY_KEYS, issues);

    if let Some(mode) = optional_string(map, path, "mode", issues) {
        match mode.parse::<PolicyMode>() {
            Ok(mode) => policy.mode = mode,
            Err(_) => issues.push(FieldIssue::new(
                format!("{path}.mode"),
                "expected one of: auto, manual, approve, deny",
            )),
        }
    }

    policy.prompt_regex = optional_regex(map, path, "prompt_regex", issues);
    policy.allow_regex = optional_regex(map, path, "allow_regex", issues);

    if let Some(value) = map.get("allowed_command_prefixes") {
        match value.as_sequence() {
            Some(seq) => {
                for (i, prefix) in seq.iter().enumerate() {
                    match prefix.as_str() {
                        Some(s) => policy.allowed_command_prefixes.push(s.to_string()),
                        None => issues.push(FieldIssue::new(
                            format!("{path}.allowed_command_prefixes[{i}]"),
                            "must be a string",
                        )),
                    }
                }
            }
            None => issues.push(FieldIssue::new(
                format!("{path}.allowed_command_prefixes"),
                "must be a sequence of strings",
            )),
        }
    }

    if let Some(value) = map.get("max_rounds") {
        match value.as_u64() {
            Some(n) if (1..=MAX_ROUNDS_CAP as u64).contains(&n) => {
                policy.max_rounds = Some(n as u32)
            }
            _ => issues.push(FieldIssue::new(
                format!("{path}.max_rounds"),
                format!("must be an integer in 1..={MAX_ROUNDS_CAP}"),
            )),
        }
    }

    for (key, slot) in [
        ("approve_key", &mut policy.approve_key),
        ("deny_key", &mut policy.deny_key),
    ] {
        if let Some(raw) = optional_string(map, path, key, issues) {
            match raw.parse::<KeyToken>() {
                Ok(token) => *slot = token,
                Err(_) => issues.push(FieldIssue::new(
                    format!("{path}.{key}"),
                    format!("unknown key token '{raw}'"),
                )),
            }
        }
    }

    policy
}

fn parse_variables(
    root: &serde_yaml::Mapping,
    issues: &mut Vec<FieldIssue>,
) -> IndexMap<String, String> {
    let mut variables = IndexMap::new();
    let Some(value) = root.get("variables") else {
        return variables;
    };
    let Some(map) = value.as_mapping() else {
        // Already reported by interpolation, but build must stand alone
        issues.push(FieldIssue::new("variables", "must be a mapping"));
        return variables;
    };
    for (key, value) in map {
        let (Some(name), Some(value)) = (
            key.as_str(),
            value.as_str().map(str::to_string).or_else(|| {
                value.as_u64().map(|n| n.to_string()).or_else(|| value.as_bool().map(|b| b.to_string()))
            }),
        ) else {
            issues.push(FieldIssue::new("variables", "names and values must be strings"));
            continue;
        };
        variables.insert(name.to_string(), value);
    }
    variables
}

fn parse_command_list(
    value: Option<&Value>,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Vec<String> {
    let mut commands = Vec::new();
    let Some(value) = value else {
        return commands;
    };
    match value.as_sequence() {
        Some(seq) => {
            for (i, cmd) in seq.iter().enumerate() {
                match cmd.as_str() {
                    Some(s) if !s.trim().is_empty() => commands.push(s.to_string()),
                    Some(_) => issues.push(FieldIssue::new(
                        format!("{path}[{i}]"),
                        "command must not be empty",
                    )),
                    None => issues.push(FieldIssue::new(
                        format!("{path}[{i}]"),
                        "must be a string",
                    )),
                }
            }
        }
        None => issues.push(FieldIssue::new(path, "must be a sequence of strings")),
    }
    commands
}

fn check_unknown_keys(
    map: &serde_yaml::Mapping,
    path: &str,
    known: &[&str],
    issues: &mut Vec<FieldIssue>,
) {
    for key in map.keys() {
        let Some(key) = key.as_str() else { continue };
        if !known.contains(&key) {
            let full = if path.is_empty() {
                key.to_string()
            } else {
                format!("{path}.{key}")
            };
            let reason = match suggest_nearest(key, known) {
                Some(suggestion) => format!("unknown key (did you mean '{suggestion}'?)"),
                None => "unknown key".to_string(),
            };
            issues.push(FieldIssue::new(full, reason));
        }
    }
}

fn require_string(
    map: &serde_yaml::Mapping,
    path: &str,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    let full = if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    };
    match map.get(key) {
        None => {
            issues.push(FieldIssue::new(full, "missing required key"));
            None
        }
        Some(value) => match value.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.to_string()),
            Some(_) => {
                issues.push(FieldIssue::new(full, "must not be empty"));
                None
            }
            None => {
                issues.push(FieldIssue::new(full, "must be a string"));
                None
            }
        },
    }
}

fn optional_string(
    map: &serde_yaml::Mapping,
    path: &str,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    match map.get(key) {
        None => None,
        Some(value) => match value.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                issues.push(FieldIssue::new(format!("{path}.{key}"), "must be a string"));
                None
            }
        },
    }
}

fn optional_duration(
    map: &serde_yaml::Mapping,
    path: &str,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<DurationSpec> {
    let value = map.get(key)?;
    parse_duration_value(value, &format!("{path}.{key}"), issues)
}

fn parse_duration_value(
    value: &Value,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<DurationSpec> {
    let Some(raw) = value.as_str() else {
        issues.push(FieldIssue::new(
            field,
            "must be a duration string (<N>ms or <N>s)",
        ));
        return None;
    };
    match raw.parse::<DurationSpec>() {
        Ok(spec) => Some(spec),
        Err(e) => {
            issues.push(FieldIssue::new(field, e));
            None
        }
    }
}

fn optional_regex(
    map: &serde_yaml::Mapping,
    path: &str,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    let pattern = optional_string(map, path, key, issues)?;
    match regex::Regex::new(&pattern) {
        Ok(_) => Some(pattern),
        Err(e) => {
            issues.push(FieldIssue::new(
                format!("{path}.{key}"),
                format!("invalid regex: {e}"),
            ));
            None
        }
    }
}

fn parse_regex_value(value: &Value, field: &str, issues: &mut Vec<FieldIssue>) -> Option<String> {
    let Some(pattern) = value.as_str() else {
        issues.push(FieldIssue::new(field, "must be a regex string"));
        return None;
    };
    match regex::Regex::new(pattern) {
        Ok(_) => Some(pattern.to_string()),
        Err(e) => {
            issues.push(FieldIssue::new(field, format!("invalid regex: {e}")));
            None
        }
    }
}

/// Whether `token` can be used verbatim as a file name stem on every
/// platform.
fn is_filesystem_safe(token: &str) -> bool {
    !token.is_empty()
        && sanitize_filename::sanitize(token) == token
        && !token.contains(['/', '\\'])
        && !token.starts_with('.')
}
