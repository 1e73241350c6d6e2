//! Run state of the telemetry service.
//!
//! [`ServiceState`] is the single piece of shared mutable state: it is only
//! touched while the service lock is held. The current [`Phase`] is mirrored
//! into a `watch` channel so other components can observe transitions without
//! taking the lock.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

use super::log_stream::LogListener;

/// Lifecycle phase of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing is scheduled. Initial phase.
    Stopped,
    /// Waiting for the robot identity; a retry may be pending.
    ResolvingIdentity,
    /// The sink is configured and metrics are being sampled.
    Running,
}

impl Phase {
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Stopped => "Stopped",
            Phase::ResolvingIdentity => "ResolvingIdentity",
            Phase::Running => "Running",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state guarded by the service lock.
///
/// Every start attempt gets a fresh epoch. `pending` holds the epoch of the
/// attempt still waiting for the robot identity, `running` the epoch of the
/// instance currently sampling. A restart only replaces `running` once its
/// identity is resolved, so the previous instance keeps going meanwhile.
/// Retry chains and metrics loops remember their epoch and give up as soon
/// as [`ServiceState::is_pending`] or [`ServiceState::is_active`] no longer
/// holds for it.
pub struct ServiceState {
    phase_tx: watch::Sender<Phase>,
    pub retry_count: u32,
    pub robot_identity: Option<String>,
    /// Attached log listener. Present only while log watching is active.
    pub log_listener: Option<Box<dyn LogListener>>,
    epoch: u64,
    pending: Option<u64>,
    running: Option<u64>,
}

impl ServiceState {
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(Phase::Stopped);
        Self {
            phase_tx,
            retry_count: 0,
            robot_identity: None,
            log_listener: None,
            epoch: 0,
            pending: None,
            running: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Updates the phase and notifies subscribers if it changed.
    pub fn set_phase(&self, phase: Phase) {
        let mut old = phase;
        let changed = self.phase_tx.send_if_modified(|current| {
            old = std::mem::replace(current, phase);
            old != phase
        });
        if changed {
            debug!("Service phase changed: {} -> {}", old, phase);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Registers a new start attempt, superseding any pending one.
    ///
    /// A running instance keeps its phase until the attempt completes.
    pub fn begin_start(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.pending = Some(self.epoch);
        self.retry_count = 0;
        if !self.phase().is_running() {
            self.set_phase(Phase::ResolvingIdentity);
        }
        self.epoch
    }

    /// True while the start attempt of `epoch` still waits to complete.
    pub fn is_pending(&self, epoch: u64) -> bool {
        self.pending == Some(epoch)
    }

    /// True while the instance started in `epoch` is the running one.
    pub fn is_active(&self, epoch: u64) -> bool {
        self.running == Some(epoch)
    }

    /// Completes the start attempt of `epoch`.
    pub fn mark_running(&mut self, epoch: u64) {
        if self.pending == Some(epoch) {
            self.pending = None;
        }
        self.running = Some(epoch);
        self.set_phase(Phase::Running);
    }

    /// Detaches the running instance, returning its epoch.
    pub fn take_running(&mut self) -> Option<u64> {
        self.running.take()
    }

    /// Drops the running instance and any pending attempt.
    pub fn mark_stopped(&mut self) {
        self.pending = None;
        self.running = None;
        self.set_phase(Phase::Stopped);
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("phase", &self.phase())
            .field("retry_count", &self.retry_count)
            .field("robot_identity", &self.robot_identity)
            .field("log_listener", &self.log_listener.is_some())
            .field("epoch", &self.epoch)
            .field("pending", &self.pending)
            .field("running", &self.running)
            .finish()
    }
}
