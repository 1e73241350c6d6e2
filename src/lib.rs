//! fluentbot: robot telemetry agent forwarding metrics and logs to Fluentd
//!
//! The agent periodically samples host-system, body-sensor and perception
//! metrics and forwards them, together with selected platform log lines, to
//! a remote Fluentd collector. Forwarding target, sampling interval, log
//! verbosity and active sources are runtime preferences and can be changed
//! without restarting the process.
//!
//! ## Modules
//!
//! * `config`: Bootstrap configuration read once at startup from a TOML
//!   file and validated with the `validator` crate.
//!
//! * `prefs`: Runtime preference store and the `ServiceConfig` read from it
//!   on every start.
//!
//! * `core`: Core runtime components:
//!   - Lifecycle controller (`TelemetryService`)
//!   - Metrics scheduler and metric sources
//!   - Identity resolution
//!   - Log bridge and in-process log hub
//!
//! * `transport`: Event sink abstraction and the Fluentd forward-protocol
//!   implementation.
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! ## Features
//!
//! * `journald`: Enables the systemd journald log output (default: enabled).

pub mod config;
pub mod core;
pub mod logger;
pub mod prefs;
pub mod transport;
