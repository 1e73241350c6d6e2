//! Fluentd forward-protocol sink.
//!
//! Each event becomes one msgpack `[tag, time, record]` message written to a
//! single TCP connection. Records are queued on a bounded channel and a
//! writer task owns the socket, so `send` never blocks the caller.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
    time::{timeout, Instant},
};
use tracing::{debug, info, trace, warn};

use super::{backoff::ReconnectBackoff, EventSink, SinkError};
use crate::{config::SinkConfig, core::sources::Fields};

#[derive(Debug, Clone)]
struct Target {
    tag: String,
    address: Arc<str>,
}

#[derive(Debug)]
struct Record {
    address: Arc<str>,
    tag: String,
    time: i64,
    fields: Fields,
}

#[derive(Serialize)]
struct Message<'a>(&'a str, i64, &'a Fields);

impl Record {
    fn encode(&self) -> Result<Vec<u8>, SinkError> {
        rmp_serde::to_vec(&Message(&self.tag, self.time, &self.fields))
            .map_err(|e| SinkError::Encode(e.to_string()))
    }
}

/// Forwards events to a Fluentd `in_forward` listener.
pub struct FluentForwarder {
    target: RwLock<Option<Target>>,
    tx: mpsc::Sender<Record>,
}

impl FluentForwarder {
    /// Creates the forwarder and spawns its writer on the current runtime.
    ///
    /// The forwarder starts without a target; events sent before
    /// [`EventSink::setup`] are rejected with [`SinkError::NotConfigured`].
    pub fn spawn(config: &SinkConfig) -> Result<Self, SinkError> {
        let handle = Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let writer = Writer {
            connect_timeout: config.connect_timeout(),
            write_timeout: config.write_timeout(),
            backoff: ReconnectBackoff::new(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
                2.0,
            ),
            address: None,
            stream: None,
            retry_at: None,
        };
        handle.spawn(writer.run(rx));

        Ok(Self { target: RwLock::new(None), tx })
    }

    /// Current `host:port` target, if any.
    pub fn address(&self) -> Option<String> {
        self.target.read().as_ref().map(|t| t.address.to_string())
    }
}

impl EventSink for FluentForwarder {
    fn setup(&self, tag: &str, host: &str, port: u16) -> Result<(), SinkError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(SinkError::InvalidTarget("host is empty".into()));
        }
        if port == 0 {
            return Err(SinkError::InvalidTarget("port must not be 0".into()));
        }

        let address: Arc<str> = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}").into()
        } else {
            format!("{host}:{port}").into()
        };
        info!("Forwarding events to {} with tag prefix '{}'", address, tag);

        *self.target.write() = Some(Target { tag: tag.to_string(), address });
        Ok(())
    }

    fn send(&self, label: &str, fields: Fields) -> Result<(), SinkError> {
        let target = self.target.read().clone().ok_or(SinkError::NotConfigured)?;

        let record = Record {
            address: target.address,
            tag: format!("{}.{}", target.tag, label),
            time: OffsetDateTime::now_utc().unix_timestamp(),
            fields,
        };

        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Owns the collector connection. Runs until every sender is dropped.
struct Writer {
    connect_timeout: Duration,
    write_timeout: Duration,
    backoff: ReconnectBackoff,
    address: Option<Arc<str>>,
    stream: Option<TcpStream>,
    retry_at: Option<Instant>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::Receiver<Record>) {
        while let Some(record) = rx.recv().await {
            let payload = match record.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(tag = %record.tag, "Dropping event: {}", e);
                    continue;
                }
            };

            if self.address.as_deref() != Some(&*record.address) {
                self.retarget(Arc::clone(&record.address));
            }

            if self.stream.is_none() && !self.connect().await {
                trace!(tag = %record.tag, "Collector unreachable, event dropped");
                continue;
            }

            if let Some(stream) = self.stream.as_mut() {
                let error = match timeout(self.write_timeout, stream.write_all(&payload)).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {:?}", self.write_timeout),
                };
                self.stream = None;
                let delay = self.backoff.next_delay();
                self.retry_at = Some(Instant::now() + delay);
                warn!(
                    tag = %record.tag,
                    "Write to collector failed: {}; reconnecting in {:?}", error, delay
                );
            }
        }
        debug!("Fluent writer stopped");
    }

    fn retarget(&mut self, address: Arc<str>) {
        if self.address.is_some() {
            debug!("Collector target changed to {}", address);
        }
        self.address = Some(address);
        self.stream = None;
        self.retry_at = None;
        self.backoff.reset();
    }

    /// Attempts a connection unless the backoff window is still open.
    async fn connect(&mut self) -> bool {
        let Some(address) = self.address.clone() else {
            return false;
        };
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return false;
        }

        let error = match timeout(self.connect_timeout, TcpStream::connect(&*address)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                info!("Connected to collector at {}", address);
                self.stream = Some(stream);
                self.retry_at = None;
                self.backoff.reset();
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.connect_timeout),
        };

        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        warn!(
            attempt = self.backoff.attempt(),
            "Cannot reach collector at {}: {}; retrying in {:?}", address, error, delay
        );
        false
    }
}
