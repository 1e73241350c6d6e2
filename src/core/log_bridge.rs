//! Mirrors platform log lines into the event stream.
//!
//! The bridge does not own the listener handle: it lives in
//! [`ServiceState`](super::state::ServiceState) and every method here is
//! called with the service lock held, receiving the slot by reference.

use std::sync::Arc;

use tracing::info;

use super::log_stream::{LogCallback, LogEntry, LogListener, LogSeverity, LogStream, LogStreamError};
use crate::transport::EventSink;

/// Tag of forwarded log events.
pub const LOG_TAG: &str = "log";

pub type ListenerSlot = Option<Box<dyn LogListener>>;

pub struct LogBridge {
    stream: Arc<dyn LogStream>,
    sink: Arc<dyn EventSink>,
}

impl LogBridge {
    pub fn new(stream: Arc<dyn LogStream>, sink: Arc<dyn EventSink>) -> Self {
        Self { stream, sink }
    }

    /// Attaches a listener at `level` unless one is already attached.
    pub fn start_watching(
        &self,
        slot: &mut ListenerSlot,
        level: LogSeverity,
    ) -> Result<(), LogStreamError> {
        if slot.is_some() {
            return Ok(());
        }

        let sink = Arc::clone(&self.sink);
        let callback: LogCallback = Arc::new(move |entry: &LogEntry| {
            sink.send(LOG_TAG, entry.to_fields())
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        });

        *slot = Some(self.stream.subscribe(level, callback)?);
        info!("Watching platform logs at level {} and above", level);
        Ok(())
    }

    /// Detaches the listener if there is one. Returns whether one was detached.
    pub fn stop_watching(&self, slot: &mut ListenerSlot) -> bool {
        match slot.take() {
            Some(listener) => {
                listener.detach();
                info!("Stopped watching platform logs");
                true
            }
            None => false,
        }
    }

    /// Moves an attached listener to `level` in place.
    ///
    /// Returns `false` if no listener is attached.
    pub fn set_level(&self, slot: &ListenerSlot, level: LogSeverity) -> bool {
        match slot {
            Some(listener) => {
                listener.set_threshold(level);
                info!("Platform log threshold set to {}", level);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{log_stream::LogHub, test_support::RecordingSink};

    fn bridge() -> (LogBridge, LogHub, Arc<RecordingSink>) {
        let hub = LogHub::default();
        let sink = Arc::new(RecordingSink::default());
        (LogBridge::new(Arc::new(hub.clone()), sink.clone()), hub, sink)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn forwards_entries_as_log_events() {
        let (bridge, hub, sink) = bridge();
        let mut slot = None;

        bridge.start_watching(&mut slot, LogSeverity::Info).unwrap();
        assert!(slot.is_some());
        hub.publish(LogEntry::new(LogSeverity::Warning, "ALMotion", "joint hot"));
        hub.publish(LogEntry::new(LogSeverity::Debug, "ALMotion", "tick"));
        settle().await;

        let events = sink.events_with(LOG_TAG);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["level"], "Warning");
        assert_eq!(events[0]["source"], "ALMotion");
        assert_eq!(events[0]["message"], "joint hot");
        assert!(!events[0].contains_key("robot"));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (bridge, hub, _sink) = bridge();
        let mut slot = None;

        bridge.start_watching(&mut slot, LogSeverity::Info).unwrap();
        bridge.start_watching(&mut slot, LogSeverity::Debug).unwrap();
        assert_eq!(hub.listener_count(), 1);
        assert_eq!(slot.as_ref().map(|l| l.threshold()), Some(LogSeverity::Info));
    }

    #[tokio::test]
    async fn stop_detaches_once() {
        let (bridge, hub, _sink) = bridge();
        let mut slot = None;

        bridge.start_watching(&mut slot, LogSeverity::Info).unwrap();
        assert!(bridge.stop_watching(&mut slot));
        assert!(!bridge.stop_watching(&mut slot));
        assert!(slot.is_none());
        settle().await;
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn level_changes_in_place() {
        let (bridge, hub, _sink) = bridge();
        let mut slot = None;

        assert!(!bridge.set_level(&slot, LogSeverity::Error));

        bridge.start_watching(&mut slot, LogSeverity::Info).unwrap();
        assert!(bridge.set_level(&slot, LogSeverity::Error));
        assert_eq!(slot.as_ref().map(|l| l.threshold()), Some(LogSeverity::Error));
        assert_eq!(hub.listener_count(), 1);
    }

    #[tokio::test]
    async fn sink_failures_do_not_break_the_stream() {
        let (bridge, hub, sink) = bridge();
        let mut slot = None;
        bridge.start_watching(&mut slot, LogSeverity::Debug).unwrap();

        sink.fail_sends(true);
        hub.publish(LogEntry::new(LogSeverity::Error, "ALAudio", "lost"));
        settle().await;

        sink.fail_sends(false);
        hub.publish(LogEntry::new(LogSeverity::Error, "ALAudio", "kept"));
        settle().await;

        let events = sink.events_with(LOG_TAG);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["message"], "kept");
    }
}
