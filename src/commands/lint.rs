//! `tds lint` - lint pass on the validated model.

use std::path::Path;

use terminal_demo_studio::error::{EXIT_SUCCESS, EXIT_VALIDATION_FAILURE};
use terminal_demo_studio::screenplay::{LintSeverity, has_errors, lint};
use terminal_demo_studio::styling::{
    eprintln, error_message, println, success_message, warning_message,
};

pub fn execute(screenplay: &Path, strict: bool, json: bool) -> i32 {
    let tmp = std::env::temp_dir();
    let (play, _source) = match super::load_screenplay(screenplay, &tmp) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let findings = lint(&play, strict);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&findings).unwrap_or_default()
        );
    } else if findings.is_empty() {
        println!("{}", success_message(format!("{} is clean", screenplay.display())));
    } else {
        for finding in &findings {
            let line = format!("{}: {}", finding.field_path, finding.message);
            match finding.severity {
                LintSeverity::Error => eprintln!("{}", error_message(line)),
                LintSeverity::Warning => eprintln!("{}", warning_message(line)),
            }
        }
    }

    if has_errors(&findings) {
        EXIT_VALIDATION_FAILURE
    } else {
        EXIT_SUCCESS
    }
}
