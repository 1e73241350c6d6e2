use std::time::Duration;

use serde_json::Value;

use super::{PreferenceError, PreferenceStore};
use crate::core::{
    log_stream::LogSeverity,
    sources::{Fields, DEFAULT_SOURCES},
};

/// Preference keys read by the service.
pub mod keys {
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const TAG: &str = "tag";
    pub const METRICS_INTERVAL: &str = "metrics_interval";
    pub const LOG_WATCH: &str = "qi_log";
    pub const LOG_LEVEL: &str = "qi_log_level";
    pub const METRICS_SOURCES: &str = "metrics_sources";
    pub const NET_INTERFACES: &str = "net_interfaces";
}

pub const DEFAULT_PORT: u16 = 24224;
pub const DEFAULT_TAG: &str = "pepper";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Shortest sampling interval; smaller configured values are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Service settings as read from the preference store at each start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Collector host. Without one the service stays inert.
    pub host: Option<String>,
    pub port: u16,
    pub tag: String,
    /// Effective interval, never below [`MIN_INTERVAL`].
    pub metrics_interval: Duration,
    pub log_watch: bool,
    pub log_level: LogSeverity,
    pub sources: Vec<String>,
    /// Interfaces reported by the `net` metric; `None` means all but loopback.
    pub net_interfaces: Option<Vec<String>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            tag: DEFAULT_TAG.to_string(),
            metrics_interval: DEFAULT_INTERVAL,
            log_watch: false,
            log_level: LogSeverity::Info,
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            net_interfaces: None,
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> PreferenceError {
    PreferenceError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses the `qi_log` flag ("1"/"0", also "true"/"false").
pub(crate) fn parse_flag(key: &str, raw: &str) -> Result<bool, PreferenceError> {
    match raw.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" | "" => Ok(false),
        other => Err(invalid(key, other, "expected 0 or 1")),
    }
}

/// Raises `interval` to [`MIN_INTERVAL`] if needed.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}

impl ServiceConfig {
    /// Reads every service key from `domain`.
    pub fn load(store: &dyn PreferenceStore, domain: &str) -> Result<Self, PreferenceError> {
        let defaults = ServiceConfig::default();

        let host = store
            .get(domain, keys::HOST)?
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let port = match store.get(domain, keys::PORT)? {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| invalid(keys::PORT, &raw, e.to_string()))?,
            None => defaults.port,
        };

        let tag = store
            .get(domain, keys::TAG)?
            .filter(|tag| !tag.trim().is_empty())
            .unwrap_or(defaults.tag);

        let metrics_interval = match store.get(domain, keys::METRICS_INTERVAL)? {
            Some(raw) => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| invalid(keys::METRICS_INTERVAL, &raw, e.to_string()))?;
                clamp_interval(Duration::from_secs(secs))
            }
            None => defaults.metrics_interval,
        };

        let log_watch = match store.get(domain, keys::LOG_WATCH)? {
            Some(raw) => parse_flag(keys::LOG_WATCH, &raw)?,
            None => defaults.log_watch,
        };

        let log_level = match store.get(domain, keys::LOG_LEVEL)? {
            Some(raw) => raw
                .trim()
                .parse::<LogSeverity>()
                .map_err(|e| invalid(keys::LOG_LEVEL, &raw, e.to_string()))?,
            None => defaults.log_level,
        };

        let sources = match store.get(domain, keys::METRICS_SOURCES)? {
            Some(raw) => split_list(&raw),
            None => defaults.sources,
        };

        let net_interfaces = store
            .get(domain, keys::NET_INTERFACES)?
            .map(|raw| split_list(&raw))
            .filter(|list| !list.is_empty());

        Ok(Self {
            host,
            port,
            tag,
            metrics_interval,
            log_watch,
            log_level,
            sources,
            net_interfaces,
        })
    }

    /// Snapshot attached to the `service` start event.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            "host".into(),
            self.host.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert("port".into(), Value::from(self.port));
        fields.insert("tag".into(), Value::from(self.tag.clone()));
        fields.insert("interval_sec".into(), Value::from(self.metrics_interval.as_secs()));
        fields.insert("log_watch".into(), Value::from(self.log_watch));
        fields.insert("log_level".into(), Value::from(self.log_level.as_str()));
        fields.insert(
            "sources".into(),
            Value::from(self.sources.iter().map(|s| Value::from(s.as_str())).collect::<Vec<_>>()),
        );
        fields
    }
}
