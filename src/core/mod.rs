//! Core runtime: lifecycle controller, metrics scheduler, log bridge and
//! the metric sources they drive.

pub mod identity;
pub mod log_bridge;
pub mod log_stream;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::service::{RetryPolicy, ServiceError, ServiceParts, TelemetryService};
