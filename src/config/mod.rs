//! Bootstrap configuration loading, validation, and management.
//!
//! This module provides the top-level `Config` structure that aggregates
//! logging, agent, identity, and sink settings. It is read once from a TOML
//! file before the logger is installed and stays immutable afterwards.
//!
//! Runtime settings that may change while the agent runs (forwarder target,
//! sampling interval, log forwarding) do not live here: they are kept in the
//! preference store and re-read on every start, see [`crate::prefs`].

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::{
    agent::{AgentConfig, IdentityConfig, SinkConfig},
    logger::LoggerConfig,
};

pub mod agent;
pub mod logger;

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default()
            ).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default()
            ).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default()
            ).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Generic configuration-related error with a descriptive message.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while accessing configuration files.
    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level bootstrap configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Logging subsystem configuration.
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Preference store location and retry policy.
    #[validate(nested)]
    pub agent: AgentConfig,

    /// Where the robot identity comes from.
    #[validate(nested)]
    pub identity: IdentityConfig,

    /// Fluentd forwarder tuning.
    #[validate(nested)]
    pub sink: SinkConfig,
}

impl Config {
    /// Constructs a new configuration by locating and loading the config file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration file cannot be found,
    /// read, parsed, or validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `FLUENTBOT_CONFIG` environment variable
    /// 2. `/etc/fluentbot/config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var("FLUENTBOT_CONFIG") {
            let path = PathBuf::from(config_path);
            print_info!("Using config from FLUENTBOT_CONFIG: {}", path.display());
            return Ok(path);
        }

        let fallback = Path::new("/etc/fluentbot/config.toml");
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(
            "No configuration file found.".to_string(),
        ))
    }

    /// Loads and validates configuration from the specified path.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(path.to_string_lossy().to_string()));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.logger.level, "info");
        assert_eq!(config.agent.preference_domain, "fluentbot");
        assert_eq!(config.agent.retry_base_delay_secs, 5);
        assert_eq!(config.agent.retry_max_delay_secs, None);
        assert_eq!(config.sink.queue_capacity, 1024);
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [logger]
            level = "debug"

            [agent]
            preferences_path = "/tmp/prefs.toml"
            retry_base_delay_secs = 2
            retry_max_delay_secs = 60

            [identity]
            robot_marker_path = "/run/robot-ready"
        "#;

        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.logger.level, "debug");
        assert_eq!(
            config.agent.preferences_path,
            PathBuf::from("/tmp/prefs.toml")
        );
        assert_eq!(config.agent.retry_base_delay_secs, 2);
        assert_eq!(config.agent.retry_max_delay_secs, Some(60));
        assert_eq!(
            config.identity.robot_marker_path,
            PathBuf::from("/run/robot-ready")
        );
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let err = Config::from_toml_str("[agent]\nretry_base_delay_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let err = Config::from_toml_str("[logger]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml_str("[agent\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sink]\nqueue_capacity = 16").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sink.queue_capacity, 16);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/fluentbot.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }
}
