//! Periodic metric sampling.
//!
//! A `MetricsScheduler` runs one loop per service start. Each cycle samples
//! every active source in turn and forwards one event per sample. A failing
//! or panicking source is logged and skipped; it never cancels the other
//! sources or the next cycle. The loop has no cancellation handle of its own:
//! it polls a liveness check at the top of every cycle and returns once the
//! service no longer wants it.

use std::{any::Any, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::sources::{error::SourceError, MetricSource, Sample};
use crate::transport::EventSink;

/// Field naming the robot on every metric event.
pub const ROBOT_FIELD: &str = "robot";

pub struct MetricsScheduler {
    sources: Vec<Arc<MetricSource>>,
    sink: Arc<dyn EventSink>,
    robot: String,
    interval: Duration,
}

impl MetricsScheduler {
    pub fn new(
        sources: Vec<Arc<MetricSource>>,
        sink: Arc<dyn EventSink>,
        robot: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            sources,
            sink,
            robot: robot.into(),
            interval,
        }
    }

    /// Runs until `is_live` returns false at the start of a cycle.
    ///
    /// Sources failing their `check` are dropped for this run. The first
    /// cycle starts right after preparation; each following cycle starts
    /// `interval` after the previous one started, or immediately if the
    /// previous cycle took longer than that.
    pub async fn run<F>(self, is_live: F)
    where
        F: Fn() -> bool + Send + Sync,
    {
        if !is_live() {
            return;
        }

        let (sources, prepared) = self.prepare().await;
        if !is_live() {
            debug!("Service stopped during preparation, metrics loop exits");
            return;
        }
        prepared.into_iter().for_each(|sample| self.emit(sample));

        if sources.is_empty() {
            warn!("No metric source available, metrics loop not started");
            return;
        }

        info!(
            "Metrics loop started (interval: {}s, sources: {})",
            self.interval.as_secs(),
            sources.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );

        loop {
            if !is_live() {
                debug!("Service no longer running, metrics loop exits");
                break;
            }

            let cycle_start = Instant::now();
            self.run_cycle(&sources).await;
            trace!("Metrics cycle took {:?}", cycle_start.elapsed());

            sleep_until(cycle_start + self.interval).await;
        }
    }

    /// Checks every source and runs its one-time preparation, returning the
    /// usable sources and the samples to emit once.
    async fn prepare(&self) -> (Vec<Arc<MetricSource>>, Vec<Sample>) {
        let mut active = Vec::with_capacity(self.sources.len());
        let mut prepared = Vec::new();

        for source in &self.sources {
            if !source.check().await {
                info!("Metric source '{}' unavailable on this host, skipped", source.name());
                continue;
            }

            match source.prepare().await {
                Ok(samples) => prepared.extend(samples),
                Err(e) => warn!("Preparing metric source '{}' failed: {}", source.name(), e),
            }
            active.push(Arc::clone(source));
        }

        (active, prepared)
    }

    async fn run_cycle(&self, sources: &[Arc<MetricSource>]) {
        for source in sources {
            let name = source.name();
            let task_source = Arc::clone(source);

            let outcome = match tokio::spawn(async move { task_source.sample().await }).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(SourceError::Panicked {
                    source_name: name.to_string(),
                    reason: panic_reason(e.into_panic()),
                }),
                Err(e) => Err(SourceError::Unavailable(e.to_string())),
            };

            match outcome {
                Ok(batch) => {
                    for failure in &batch.failures {
                        warn!("Metric source '{}' partially failed: {}", name, failure);
                    }
                    debug!("Sampled {} event(s) from '{}'", batch.samples.len(), name);
                    batch.samples.into_iter().for_each(|sample| self.emit(sample));
                }
                Err(e @ SourceError::Panicked { .. }) => error!("{}", e),
                Err(e) => error!("Metric source '{}' failed: {}", name, e),
            }
        }
    }

    fn emit(&self, sample: Sample) {
        let Sample { tag, mut fields, .. } = sample;
        fields.insert(ROBOT_FIELD.into(), Value::String(self.robot.clone()));

        if let Err(e) = self.sink.send(tag, fields) {
            debug!("Dropped '{}' event: {}", tag, e);
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
