//! Outbound event transport.
//!
//! The [`EventSink`] trait is the seam between the service and whatever
//! carries events off the robot. [`fluent::FluentForwarder`] implements it
//! with the Fluentd forward protocol.

use thiserror::Error;

use crate::core::sources::Fields;

pub mod backoff;
pub mod fluent;

pub use self::fluent::FluentForwarder;

#[derive(Debug, Error)]
pub enum SinkError {
    /// `send` was called before any `setup`.
    #[error("Event sink has no target configured")]
    NotConfigured,

    #[error("Invalid sink target: {0}")]
    InvalidTarget(String),

    /// The outbound queue is full; the event was dropped.
    #[error("Outbound queue full, event dropped")]
    QueueFull,

    #[error("Event sink closed")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Encode(String),

    /// The sink needs a Tokio runtime to run its writer.
    #[error("No async runtime available for the event sink")]
    NoRuntime,
}

/// Receives tagged field maps and forwards them to a remote collector.
///
/// Sending is fire-and-forget: an `Ok` only means the event was accepted
/// locally. Delivery failures past that point are never reported back.
/// Implementations must tolerate concurrent calls.
pub trait EventSink: Send + Sync {
    /// (Re)targets the sink. Events are tagged `"{tag}.{label}"`.
    fn setup(&self, tag: &str, host: &str, port: u16) -> Result<(), SinkError>;

    fn send(&self, label: &str, fields: Fields) -> Result<(), SinkError>;
}
