//! Fakes shared by the core tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{identity::IdentityResolver, sources::Fields};
use crate::transport::{EventSink, SinkError};

/// Sink keeping every accepted event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Fields)>>,
    setups: Mutex<Vec<(String, String, u16)>>,
    fail_setup: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingSink {
    pub fn fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<(String, Fields)> {
        self.events.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn events_with(&self, label: &str) -> Vec<Fields> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, fields)| fields.clone())
            .collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events.lock().iter().filter(|(l, _)| l == label).count()
    }

    /// `service` events with the given status.
    pub fn service_events(&self, status: &str) -> Vec<Fields> {
        self.events_with("service")
            .into_iter()
            .filter(|fields| fields["status"] == status)
            .collect()
    }

    pub fn setups(&self) -> Vec<(String, String, u16)> {
        self.setups.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn setup(&self, tag: &str, host: &str, port: u16) -> Result<(), SinkError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(SinkError::InvalidTarget(format!("{host}:{port} refused")));
        }
        self.setups.lock().push((tag.to_string(), host.to_string(), port));
        Ok(())
    }

    fn send(&self, label: &str, fields: Fields) -> Result<(), SinkError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SinkError::QueueFull);
        }
        self.events.lock().push((label.to_string(), fields));
        Ok(())
    }
}

/// Resolver failing a fixed number of times before answering.
pub struct ScriptedResolver {
    identity: String,
    failures_left: AtomicU32,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedResolver {
    pub fn new(identity: &str, failures: u32) -> Self {
        Self {
            identity: identity.to_string(),
            failures_left: AtomicU32::new(failures),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Instants of every `resolve` call.
    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityResolver for ScriptedResolver {
    async fn resolve(&self) -> Option<String> {
        self.calls.lock().push(Instant::now());
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return None;
        }
        Some(self.identity.clone())
    }
}
