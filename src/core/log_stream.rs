//! Platform log stream: severities, entries, listeners and the in-process hub.
//!
//! The agent runs inside the robot's control process, so "platform logs" are
//! that process's own `tracing` events. [`CaptureLayer`] turns them into
//! [`LogEntry`] values published on a [`LogHub`]; the Log Bridge subscribes to
//! the hub through the [`LogStream`] trait, which keeps it usable with any other
//! log source a deployment may provide.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, field::Field, trace, Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, Layer};

use super::sources::Fields;

/// Log severities understood by the platform, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogSeverity {
    Fatal = 1,
    Error = 2,
    Warning = 3,
    Info = 4,
    Verbose = 5,
    Debug = 6,
}

impl LogSeverity {
    pub const ALL: [LogSeverity; 6] = [
        LogSeverity::Fatal,
        LogSeverity::Error,
        LogSeverity::Warning,
        LogSeverity::Info,
        LogSeverity::Verbose,
        LogSeverity::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Fatal => "Fatal",
            LogSeverity::Error => "Error",
            LogSeverity::Warning => "Warning",
            LogSeverity::Info => "Info",
            LogSeverity::Verbose => "Verbose",
            LogSeverity::Debug => "Debug",
        }
    }

    /// True if an entry of this severity passes a listener set to `threshold`.
    pub fn passes(&self, threshold: LogSeverity) -> bool {
        *self <= threshold
    }

    fn from_u8(raw: u8) -> LogSeverity {
        match raw {
            1 => LogSeverity::Fatal,
            2 => LogSeverity::Error,
            3 => LogSeverity::Warning,
            4 => LogSeverity::Info,
            5 => LogSeverity::Verbose,
            _ => LogSeverity::Debug,
        }
    }

    /// Maps a `tracing` level onto the platform scale.
    pub fn from_level(level: &Level) -> LogSeverity {
        match *level {
            Level::ERROR => LogSeverity::Error,
            Level::WARN => LogSeverity::Warning,
            Level::INFO => LogSeverity::Info,
            Level::DEBUG => LogSeverity::Verbose,
            Level::TRACE => LogSeverity::Debug,
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a severity name is not one of the recognized names.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown log severity: {0}")]
pub struct UnknownSeverity(pub String);

impl FromStr for LogSeverity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogSeverity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| UnknownSeverity(s.to_string()))
    }
}

/// One platform log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: LogSeverity,
    /// Emitting category (the `tracing` target for captured events).
    pub source: String,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

impl LogEntry {
    pub fn new(severity: LogSeverity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Field map of the `log` event.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("level".into(), Value::from(self.severity.as_str()));
        fields.insert("source".into(), Value::from(self.source.clone()));
        fields.insert("message".into(), Value::from(self.message.clone()));
        fields.insert(
            "timestamp".into(),
            Value::from(self.timestamp.format(&Rfc3339).unwrap_or_default()),
        );
        fields
    }
}

#[derive(Debug, Error)]
pub enum LogStreamError {
    /// Listeners run as tasks and need a Tokio runtime.
    #[error("No async runtime available to run the log listener")]
    NoRuntime,

    #[error("Log stream unavailable: {0}")]
    Unavailable(String),
}

/// Callback invoked for every entry passing the listener threshold.
pub type LogCallback =
    Arc<dyn Fn(&LogEntry) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// A source of platform log lines.
pub trait LogStream: Send + Sync {
    /// Attaches a listener at `threshold`. Entries are delivered until the
    /// returned handle is detached or dropped.
    fn subscribe(
        &self,
        threshold: LogSeverity,
        callback: LogCallback,
    ) -> Result<Box<dyn LogListener>, LogStreamError>;
}

/// Handle of an attached listener.
pub trait LogListener: Send + Sync {
    fn threshold(&self) -> LogSeverity;

    /// Changes the threshold without re-attaching.
    fn set_threshold(&self, threshold: LogSeverity);

    fn detach(self: Box<Self>);
}

/// In-process broadcast of log entries.
#[derive(Debug, Clone)]
pub struct LogHub {
    tx: broadcast::Sender<LogEntry>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an entry to every attached listener. Entries published while
    /// nobody listens are discarded.
    pub fn publish(&self, entry: LogEntry) {
        let _ = self.tx.send(entry);
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Builds the `tracing` layer that feeds this hub.
    pub fn capture_layer(&self) -> CaptureLayer {
        CaptureLayer {
            hub: self.clone(),
            skip_prefix: env!("CARGO_CRATE_NAME"),
        }
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LogStream for LogHub {
    fn subscribe(
        &self,
        threshold: LogSeverity,
        callback: LogCallback,
    ) -> Result<Box<dyn LogListener>, LogStreamError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LogStreamError::NoRuntime)?;

        let level = Arc::new(AtomicU8::new(threshold as u8));
        let mut rx = self.tx.subscribe();
        let task_level = level.clone();

        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        let threshold = LogSeverity::from_u8(task_level.load(Ordering::Relaxed));
                        if !entry.severity.passes(threshold) {
                            continue;
                        }
                        if let Err(e) = callback(&entry) {
                            trace!("Dropped forwarded log line: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Log listener lagged, {} entries skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Box::new(HubListener { level, task }))
    }
}

struct HubListener {
    level: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl LogListener for HubListener {
    fn threshold(&self) -> LogSeverity {
        LogSeverity::from_u8(self.level.load(Ordering::Relaxed))
    }

    fn set_threshold(&self, threshold: LogSeverity) {
        self.level.store(threshold as u8, Ordering::Relaxed);
    }

    fn detach(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for HubListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `tracing` layer mirroring host-process events into a [`LogHub`].
///
/// Events emitted by this crate are skipped so that forwarding diagnostics
/// never loop back into the forwarded stream.
pub struct CaptureLayer {
    hub: LogHub,
    skip_prefix: &'static str,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(self.skip_prefix) || self.hub.listener_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.hub.publish(LogEntry::new(
            LogSeverity::from_level(meta.level()),
            meta.target(),
            visitor.finish(),
        ));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    extra: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.extra.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.extra.join(" ")
        } else {
            format!("{} {}", self.message, self.extra.join(" "))
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.extra.push(format!("{}={:?}", field.name(), value));
        }
    }
}
