//! Configuration loading and startup validation
//!
//! A TOML file supplies the API credential, store paths, and worker tuning.
//! Paths default under the user data directory; the API key has no default
//! and is checked up front so a misconfigured process fails at startup, not
//! on its first extraction.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file path. See config.sample.toml for the full surface.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Default model used for entity extraction.
pub const DEFAULT_EXTRACT_MODEL: &str = "openai/gpt-4o-mini";

/// Default idle period between queue checks, in seconds.
pub const DEFAULT_QUEUE_CHECK_PERIOD_SECONDS: u64 = 10;

/// Errors from configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("OpenRouter API key not found in configuration")]
    MissingApiKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Credential for the extraction API.
    #[serde(default)]
    pub openrouter_api_key: String,

    /// Directory holding the document and queue databases.
    #[serde(default = "default_data_dir")]
    pub document_db_path: PathBuf,

    /// Path of the graph database file.
    #[serde(default = "default_graph_db_path")]
    pub graph_db_path: PathBuf,

    /// Idle period between queue checks, in seconds.
    #[serde(default = "default_queue_check_period")]
    pub queue_check_period_seconds: u64,

    /// Model identifier for entity extraction.
    #[serde(default = "default_extract_model")]
    pub extract_model: String,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// An explicitly named file that does not exist is an error. The default
    /// path is allowed to be absent — defaults apply, and validation still
    /// requires the API key.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = if path.exists() {
            std::fs::read_to_string(path)?
        } else if path == Path::new(DEFAULT_CONFIG_PATH) {
            String::new()
        } else {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        };
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.openrouter_api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    pub fn queue_check_period(&self) -> Duration {
        Duration::from_secs(self.queue_check_period_seconds)
    }
}

/// Default data directory (~/.local/share/weaver on Linux).
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("weaver")
}

fn default_graph_db_path() -> PathBuf {
    default_data_dir().join("graph.db")
}

fn default_queue_check_period() -> u64 {
    DEFAULT_QUEUE_CHECK_PERIOD_SECONDS
}

fn default_extract_model() -> String {
    DEFAULT_EXTRACT_MODEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn full_config_parses() {
        let (_dir, path) = write_config(
            r#"
            openrouter_api_key = "sk-test"
            document_db_path = "/tmp/weaver-data"
            graph_db_path = "/tmp/weaver-data/graph.db"
            queue_check_period_seconds = 3
            extract_model = "anthropic/claude-3.5-haiku"
            "#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.openrouter_api_key, "sk-test");
        assert_eq!(config.document_db_path, PathBuf::from("/tmp/weaver-data"));
        assert_eq!(config.queue_check_period(), Duration::from_secs(3));
        assert_eq!(config.extract_model, "anthropic/claude-3.5-haiku");
    }

    #[test]
    fn omitted_keys_fall_back_to_defaults() {
        let (_dir, path) = write_config("openrouter_api_key = \"sk-test\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.queue_check_period_seconds,
            DEFAULT_QUEUE_CHECK_PERIOD_SECONDS
        );
        assert_eq!(config.extract_model, DEFAULT_EXTRACT_MODEL);
        assert!(config.graph_db_path.ends_with("graph.db"));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let (_dir, path) = write_config("queue_check_period_seconds = 5\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn missing_explicit_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn missing_default_file_falls_back_to_defaults() {
        // The default path is allowed to be absent; validation then fails on
        // the missing API key rather than on the missing file.
        let err = Config::load(DEFAULT_CONFIG_PATH).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }
}
