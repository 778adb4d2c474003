//! User-level configuration
//!
//! Personal preferences stored at `~/.config/terminal-demo-studio/config.toml`
//! (or the platform equivalent), not checked into any repository. The file is
//! optional; every field has a default.
//!
//! ```toml
//! # Where composed media is written when --output-dir is not passed
//! output-dir = "~/demos"
//!
//! # Media formats produced by default
//! output-formats = ["gif"]
//!
//! [redact]
//! # Extra variable-name globs treated as secrets (merged over the built-in
//! # *_API_KEY / *_TOKEN / *_SECRET set)
//! variable-patterns = ["*_PASSWORD"]
//! ```

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Override for user config path, set via --config CLI flag
static CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Set the user config path override (called from CLI --config flag)
pub fn set_config_path(path: PathBuf) {
    CONFIG_PATH.set(path).ok();
}

/// Resolve the user config path: `--config` override, then
/// `TDS_CONFIG_PATH`, then the platform config directory.
pub fn get_config_path() -> Option<PathBuf> {
    if let Some(path) = CONFIG_PATH.get() {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var("TDS_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("terminal-demo-studio").join("config.toml"))
}

/// Redaction preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RedactConfig {
    /// Extra variable-name globs treated as secrets, merged over the built-in
    /// conservative set.
    #[serde(default)]
    pub variable_patterns: Vec<String>,
}

/// User configuration for terminal-demo-studio.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StudioConfig {
    /// Default output directory for composed media (tilde-expanded).
    #[serde(default)]
    pub output_dir: Option<String>,

    /// Default media formats when no --output flag is passed.
    #[serde(default)]
    pub output_formats: Vec<String>,

    #[serde(default)]
    pub redact: RedactConfig,
}

impl StudioConfig {
    /// Load the user config, returning defaults when the file is absent.
    ///
    /// A malformed file is an error - silently ignoring a typo'd config is
    /// worse than failing loudly.
    pub fn load() -> anyhow::Result<Self> {
        let Some(path) = get_config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config at {}: {e}", path.display()))
    }

    /// The default output directory with `~` expanded, when configured.
    pub fn expanded_output_dir(&self) -> Option<PathBuf> {
        self.output_dir
            .as_deref()
            .map(|raw| PathBuf::from(shellexpand::tilde(raw).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_empty() {
        let config = StudioConfig::default();
        assert!(config.output_dir.is_none());
        assert!(config.output_formats.is_empty());
        assert!(config.redact.variable_patterns.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config: StudioConfig = toml::from_str(
            r#"
            output-dir = "~/demos"
            output-formats = ["gif", "mp4"]

            [redact]
            variable-patterns = ["*_PASSWORD"]
            "#,
        )
        .unwrap();
        assert_eq!(config.output_dir.as_deref(), Some("~/demos"));
        assert_eq!(config.output_formats, vec!["gif", "mp4"]);
        assert_eq!(config.redact.variable_patterns, vec!["*_PASSWORD"]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<StudioConfig, _> = toml::from_str("outputdir = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_expanded_output_dir() {
        let config: StudioConfig = toml::from_str("output-dir = \"/tmp/demos\"\n").unwrap();
        assert_eq!(
            config.expanded_output_dir(),
            Some(PathBuf::from("/tmp/demos"))
        );
    }
}
