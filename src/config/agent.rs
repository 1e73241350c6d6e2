//! Agent, identity, and sink configuration structures.
//!
//! These settings are fixed for the lifetime of the process. Everything the
//! operator may change at runtime lives in the preference store instead.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Preference store location and identity retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    /// TOML file backing the preference store.
    pub preferences_path: PathBuf,

    /// Namespace under which the service keeps its preference keys.
    #[validate(length(min = 1, message = "Preference domain must not be empty"))]
    pub preference_domain: String,

    /// Base delay of the linear identity-resolution backoff, in seconds.
    #[validate(range(min = 1, message = "Retry base delay must be at least 1 second"))]
    pub retry_base_delay_secs: u64,

    /// Optional upper bound for the backoff delay. Unset means unbounded growth.
    #[validate(range(min = 1, message = "Retry cap must be at least 1 second"))]
    pub retry_max_delay_secs: Option<u64>,

    /// Root of the proc filesystem the OS metric source reads from.
    pub proc_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            preferences_path: PathBuf::from("/var/lib/fluentbot/preferences.toml"),
            preference_domain: "fluentbot".into(),
            retry_base_delay_secs: 5,
            retry_max_delay_secs: None,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl AgentConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn retry_max_delay(&self) -> Option<Duration> {
        self.retry_max_delay_secs.map(Duration::from_secs)
    }
}

/// Sources used to decide whether the platform finished booting on real hardware.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IdentityConfig {
    /// File holding the host name reported as robot identity.
    pub hostname_path: PathBuf,

    /// File whose presence marks a booted, non-simulated robot.
    pub robot_marker_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname_path: PathBuf::from("/proc/sys/kernel/hostname"),
            robot_marker_path: PathBuf::from("/etc/fluentbot/robot"),
        }
    }
}

/// Tuning of the Fluentd forward transport.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SinkConfig {
    /// Maximum number of records waiting to be written. Extra records are dropped.
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub queue_capacity: usize,

    /// TCP connect timeout in milliseconds.
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Time allowed for writing one record in milliseconds. A collector that
    /// stops reading for longer loses the connection.
    #[validate(range(min = 1))]
    pub write_timeout_ms: u64,

    /// First delay between reconnect attempts in milliseconds.
    #[validate(range(min = 1))]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the delay between reconnect attempts in milliseconds.
    #[validate(range(min = 1))]
    pub reconnect_max_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            connect_timeout_ms: 3000,
            write_timeout_ms: 5000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl SinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
