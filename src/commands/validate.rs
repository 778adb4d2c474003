//! `tds validate` - schema pass only.

use std::path::Path;

use schemars::JsonSchema;
use serde::Serialize;

use terminal_demo_studio::error::EXIT_SUCCESS;
use terminal_demo_studio::styling::{format_heading, println, success_message};

/// Document-shape types, used only to emit the JSON schema of the screenplay
/// format. The runtime model is built by hand for field-path errors; this
/// mirror stays the single place the external format is described.
#[derive(Serialize, JsonSchema)]
#[allow(dead_code)]
struct ScreenplayDoc {
    /// Demo title, shown in overlays and the manifest.
    title: String,
    /// Filesystem-safe token naming the composed media files.
    output: String,
    /// Visual settings for recorded media.
    settings: Option<SettingsDoc>,
    /// Variable bindings substituted into `{name}` tokens before validation.
    variables: Option<std::collections::BTreeMap<String, String>>,
    /// Commands run once before any scenario.
    preinstall: Option<Vec<String>>,
    /// Global prompt policy, merged under each scenario's.
    agent_prompts: Option<PolicyDoc>,
    /// Ordered list of scenarios; at least one is required.
    scenarios: Vec<ScenarioDoc>,
}

#[derive(Serialize, JsonSchema)]
#[allow(dead_code)]
struct SettingsDoc {
    width: Option<u32>,
    height: Option<u32>,
    theme: Option<String>,
    font_family: Option<String>,
    framerate: Option<u32>,
    padding: Option<u32>,
}

#[derive(Serialize, JsonSchema)]
#[allow(dead_code)]
struct ScenarioDoc {
    label: String,
    /// Must be `terminal` when present.
    surface: Option<String>,
    /// One of `scripted`, `interactive`, `visual`.
    execution_mode: Option<String>,
    /// Shell selector for the interactive lane.
    shell: Option<String>,
    /// Commands run before the first action.
    setup: Option<Vec<String>>,
    agent_prompts: Option<PolicyDoc>,
    /// A string (treated as a command) or a mapping with one action key:
    /// command, input, key, hotkey, sleep, wait_stable, wait_for,
    /// wait_screen_regex, wait_line_regex, assert_screen_regex,
    /// assert_not_screen_regex, expect_exit_code.
    actions: Vec<serde_json::Value>,
}

#[derive(Serialize, JsonSchema)]
#[allow(dead_code)]
struct PolicyDoc {
    /// One of `auto`, `manual`, `approve`, `deny`.
    mode: Option<String>,
    prompt_regex: Option<String>,
    allow_regex: Option<String>,
    allowed_command_prefixes: Option<Vec<String>>,
    /// Bounded approval rounds, 1..=6.
    max_rounds: Option<u32>,
    approve_key: Option<String>,
    deny_key: Option<String>,
}

pub fn execute(screenplay: &Path, explain: bool, json_schema: bool) -> i32 {
    if json_schema {
        let schema = schemars::schema_for!(ScreenplayDoc);
        println!("{}", serde_json::to_string_pretty(&schema).unwrap_or_default());
        return EXIT_SUCCESS;
    }

    let tmp = std::env::temp_dir();
    let (play, _source) = match super::load_screenplay(screenplay, &tmp) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    if explain {
        println!("{}", format_heading("SCREENPLAY", Some(&play.title)));
        println!("output: {}", play.output);
        println!(
            "settings: {}x{} {} @{}fps",
            play.settings.width, play.settings.height, play.settings.theme, play.settings.framerate
        );
        for (i, scenario) in play.scenarios.iter().enumerate() {
            println!();
            println!(
                "{}",
                format_heading(
                    &format!("SCENARIO {i}"),
                    Some(&format!("{} ({})", scenario.label, scenario.mode))
                )
            );
            for (j, action) in scenario.actions.iter().enumerate() {
                let id = action
                    .id
                    .as_deref()
                    .map(|id| format!(" id={id}"))
                    .unwrap_or_default();
                println!("  [{j}] {}{id}", action.kind.name());
            }
            if let Some(policy) = &scenario.policy {
                println!("  policy: mode={}", policy.mode);
            }
        }
        println!();
    }

    println!(
        "{}",
        success_message(format!(
            "{} valid ({} scenario{})",
            screenplay.display(),
            play.scenarios.len(),
            if play.scenarios.len() == 1 { "" } else { "s" }
        ))
    );
    EXIT_SUCCESS
}
