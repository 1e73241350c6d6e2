//! Lifecycle controller of the telemetry agent.
//!
//! [`TelemetryService`] owns the run state and orchestrates a start:
//! identity resolution (retried with a linear backoff while the platform is
//! still booting), reading the service configuration, configuring the event
//! sink, attaching the log bridge and spawning the metrics loop.
//!
//! All state transitions happen under one lock. Slow steps (identity
//! resolution, preference reads, sampling) run outside of it. Background
//! tasks never hold a strong reference to the service: they keep a `Weak`
//! handle plus the epoch they were spawned in, and exit on their own once the
//! service is stopped, restarted or dropped.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    identity::IdentityResolver,
    log_bridge::LogBridge,
    log_stream::{LogSeverity, LogStream},
    scheduler::MetricsScheduler,
    sources::{Fields, SourceRegistry},
    state::{Phase, ServiceState},
};
use crate::{
    prefs::{keys, PreferenceError, PreferenceStore, ServiceConfig},
    transport::{EventSink, SinkError},
};

/// Tag of lifecycle events.
pub const SERVICE_TAG: &str = "service";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Preference store error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Failed to configure the event sink: {0}")]
    Sink(#[from] SinkError),
}

/// Delay between identity resolution attempts: `base × attempt`, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Option<Duration>) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.saturating_mul(attempt);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), None)
    }
}

/// Collaborators of a [`TelemetryService`].
pub struct ServiceParts {
    pub preferences: Arc<dyn PreferenceStore>,
    /// Preference namespace holding the service keys.
    pub domain: String,
    pub sink: Arc<dyn EventSink>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub log_stream: Arc<dyn LogStream>,
    pub registry: SourceRegistry,
    pub retry: RetryPolicy,
}

struct Inner {
    state: Mutex<ServiceState>,
    preferences: Arc<dyn PreferenceStore>,
    domain: String,
    sink: Arc<dyn EventSink>,
    resolver: Arc<dyn IdentityResolver>,
    bridge: LogBridge,
    registry: SourceRegistry,
    retry: RetryPolicy,
}

/// Handle to the telemetry service. Clones share the same instance.
#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<Inner>,
}

impl TelemetryService {
    pub fn new(parts: ServiceParts) -> Self {
        let bridge = LogBridge::new(parts.log_stream, Arc::clone(&parts.sink));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ServiceState::new()),
                preferences: parts.preferences,
                domain: parts.domain,
                sink: parts.sink,
                resolver: parts.resolver,
                bridge,
                registry: parts.registry,
                retry: parts.retry,
            }),
        }
    }

    /// Starts the service, restarting it if it already runs.
    ///
    /// Returns once the first identity attempt is done. If the identity is
    /// not available yet, retries continue in the background and `Ok` is
    /// returned without anything else happening; a running instance keeps
    /// running until the identity resolves. Preference and sink failures
    /// abort this start attempt and leave the service stopped.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let epoch = self.inner.state.lock().begin_start();

        debug!("Starting telemetry service (epoch {})", epoch);
        match self.inner.resolver.resolve().await {
            Some(identity) => self.inner.complete_start(epoch, identity),
            None => {
                if let Some(delay) = self.inner.next_retry(epoch) {
                    self.inner.spawn_retry_loop(epoch, delay);
                }
                Ok(())
            }
        }
    }

    /// Stops sampling and log forwarding. Safe to call in any phase.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        self.inner.stop_locked(&mut state);
    }

    /// Persists a new collector target and restarts the service.
    pub async fn set_forwarder(&self, host: &str, port: u16) -> Result<(), ServiceError> {
        let prefs = &self.inner.preferences;
        prefs.set(&self.inner.domain, keys::HOST, host)?;
        prefs.set(&self.inner.domain, keys::PORT, &port.to_string())?;
        info!("Forwarder set to {}:{}", host, port);
        self.start().await
    }

    /// Persists the log watching flag and attaches or detaches the listener.
    ///
    /// A listener is only attached while the service runs; otherwise the flag
    /// takes effect on the next start.
    pub fn set_watching_logs(&self, enabled: bool) -> Result<bool, ServiceError> {
        let inner = &self.inner;
        inner
            .preferences
            .set(&inner.domain, keys::LOG_WATCH, if enabled { "1" } else { "0" })?;

        if enabled {
            let config = ServiceConfig::load(inner.preferences.as_ref(), &inner.domain)?;
            let mut state = inner.state.lock();
            inner.start_watching_locked(&mut state, &config);
        } else {
            let mut state = inner.state.lock();
            inner.bridge.stop_watching(&mut state.log_listener);
        }
        Ok(true)
    }

    /// Changes the forwarded log threshold.
    ///
    /// Returns `Ok(false)` without changing anything if `level` is not one of
    /// `Fatal`, `Error`, `Warning`, `Info`, `Verbose`, `Debug`.
    pub fn set_watching_log_level(&self, level: &str) -> Result<bool, ServiceError> {
        let Ok(severity) = level.parse::<LogSeverity>() else {
            warn!("Unknown log level '{}' rejected", level);
            return Ok(false);
        };

        let inner = &self.inner;
        inner
            .preferences
            .set(&inner.domain, keys::LOG_LEVEL, severity.as_str())?;

        let state = inner.state.lock();
        if !inner.bridge.set_level(&state.log_listener, severity) {
            drop(state);
            let config = ServiceConfig::load(inner.preferences.as_ref(), &inner.domain)?;
            let mut state = inner.state.lock();
            inner.start_watching_locked(&mut state, &config);
        }
        Ok(true)
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.state.lock().subscribe()
    }

    /// Failed identity attempts since the last start or stop.
    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().retry_count
    }

    pub fn robot_identity(&self) -> Option<String> {
        self.inner.state.lock().robot_identity.clone()
    }

    /// Threshold of the attached log listener, if any.
    pub fn log_threshold(&self) -> Option<LogSeverity> {
        self.inner
            .state
            .lock()
            .log_listener
            .as_ref()
            .map(|listener| listener.threshold())
    }
}

impl Inner {
    fn stop_locked(&self, state: &mut ServiceState) {
        self.retire_locked(state);
        state.mark_stopped();
        state.retry_count = 0;
    }

    /// Tears down the running instance, if any, without touching the phase.
    fn retire_locked(&self, state: &mut ServiceState) {
        self.bridge.stop_watching(&mut state.log_listener);
        state.robot_identity = None;

        if state.take_running().is_some() {
            let mut fields = Fields::new();
            fields.insert("status".into(), Value::from("stopped"));
            self.emit(fields);
            info!("Telemetry service stopped");
        }
    }

    /// Counts a failed identity attempt and returns the delay before the next
    /// one, or `None` if the attempt belongs to a superseded start.
    fn next_retry(&self, epoch: u64) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.is_pending(epoch) {
            return None;
        }

        state.retry_count = state.retry_count.saturating_add(1);
        let delay = self.retry.delay(state.retry_count);
        info!(
            "Robot identity not available yet, retry #{} in {}s",
            state.retry_count,
            delay.as_secs()
        );
        Some(delay)
    }

    fn spawn_retry_loop(self: &Arc<Self>, epoch: u64, first_delay: Duration) {
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::time::sleep(delay).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let current = inner.state.lock().is_pending(epoch);
                if !current {
                    debug!("Identity retry of epoch {} cancelled", epoch);
                    return;
                }

                match inner.resolver.resolve().await {
                    Some(identity) => {
                        if let Err(e) = inner.complete_start(epoch, identity) {
                            error!("Failed to start telemetry service: {}", e);
                        }
                        return;
                    }
                    None => match inner.next_retry(epoch) {
                        Some(next) => delay = next,
                        None => return,
                    },
                }
            }
        });
    }

    fn complete_start(self: &Arc<Self>, epoch: u64, identity: String) -> Result<(), ServiceError> {
        let result = self.activate(epoch, identity);
        if result.is_err() {
            let mut state = self.state.lock();
            if state.is_pending(epoch) {
                self.stop_locked(&mut state);
            }
        }
        result
    }

    fn activate(self: &Arc<Self>, epoch: u64, identity: String) -> Result<(), ServiceError> {
        let config = ServiceConfig::load(self.preferences.as_ref(), &self.domain)?;

        {
            let mut state = self.state.lock();
            if !state.is_pending(epoch) {
                debug!("Start of epoch {} superseded", epoch);
                return Ok(());
            }

            let retry_count = state.retry_count;
            self.retire_locked(&mut state);

            let Some(host) = config.host.as_deref() else {
                warn!("No forwarder host configured, telemetry stays inactive");
                self.stop_locked(&mut state);
                return Ok(());
            };

            self.sink.setup(&config.tag, host, config.port)?;
            state.mark_running(epoch);
            state.robot_identity = Some(identity.clone());

            let mut fields = Fields::new();
            fields.insert("status".into(), Value::from("started"));
            fields.insert("config".into(), Value::Object(config.to_fields()));
            fields.insert("retry_count".into(), Value::from(retry_count));
            self.emit(fields);
            state.retry_count = 0;

            info!(
                "Telemetry service started for robot '{}' (interval: {}s)",
                identity,
                config.metrics_interval.as_secs()
            );
        }

        {
            let mut state = self.state.lock();
            if state.is_active(epoch) {
                self.start_watching_locked(&mut state, &config);
            }
        }

        self.spawn_metrics_loop(epoch, identity, &config);
        Ok(())
    }

    /// Attaches the log bridge if watching is enabled and the service runs.
    fn start_watching_locked(&self, state: &mut ServiceState, config: &ServiceConfig) {
        if !config.log_watch {
            return;
        }
        if !state.phase().is_running() {
            debug!("Log watching enabled, listener attaches on next start");
            return;
        }
        if let Err(e) = self
            .bridge
            .start_watching(&mut state.log_listener, config.log_level)
        {
            warn!("Failed to attach platform log listener: {}", e);
        }
    }

    fn spawn_metrics_loop(self: &Arc<Self>, epoch: u64, identity: String, config: &ServiceConfig) {
        let sources = self
            .registry
            .resolve(&config.sources, config.net_interfaces.clone());
        let scheduler = MetricsScheduler::new(
            sources,
            Arc::clone(&self.sink),
            identity,
            config.metrics_interval,
        );

        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(scheduler.run(move || {
            weak.upgrade()
                .is_some_and(|inner| inner.state.lock().is_active(epoch))
        }));
    }

    fn emit(&self, fields: Fields) {
        if let Err(e) = self.sink.send(SERVICE_TAG, fields) {
            debug!("Dropped '{}' event: {}", SERVICE_TAG, e);
        }
    }
}
