//! Command handlers for the `tds` binary. Each returns the process exit
//! code.

pub mod debug;
pub mod doctor;
pub mod lint;
pub mod run;
pub mod validate;

use std::path::Path;

use terminal_demo_studio::error::{EXIT_VALIDATION_FAILURE, StudioError};
use terminal_demo_studio::screenplay::Screenplay;
use terminal_demo_studio::styling::eprintln;

/// Load and validate a screenplay, printing validation errors on failure.
///
/// Returns the model together with the raw source (for the manifest digest).
pub(crate) fn load_screenplay(
    path: &Path,
    tmp_dir: &Path,
) -> Result<(Screenplay, String), i32> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!(
                "{}",
                terminal_demo_studio::styling::error_message(format!(
                    "Cannot read {}: {e}",
                    path.display()
                ))
            );
            return Err(EXIT_VALIDATION_FAILURE);
        }
    };

    match Screenplay::from_yaml(&source, tmp_dir) {
        Ok(play) => Ok((play, source)),
        Err(issues) => {
            let err = StudioError::Validation { issues };
            eprintln!("{err}");
            Err(err.exit_code())
        }
    }
}
