//! Metric sources sampled by the scheduler.
//!
//! The set of sources is closed: [`MetricSource`] is an enum over the OS,
//! body-sensor, and perception sources, and [`SourceRegistry`] maps the names
//! configured in the preference store onto those variants once per start.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

pub mod body;
pub mod error;
pub mod memory;
pub mod os;
pub mod perception;

use self::{
    body::BodySensorSource,
    error::SourceResult,
    memory::RobotMemory,
    os::{OsMetric, OsResourceSource, ProcFs},
    perception::PerceptionSource,
};

/// Field map of one event.
pub type Fields = Map<String, Value>;

/// One event's worth of sampled data.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Event tag (`cpu`, `net`, `battery`, ...).
    pub tag: &'static str,
    /// Distinguishes several events of the same tag (e.g. the interface name).
    pub key: Option<String>,
    pub fields: Fields,
}

impl Sample {
    pub fn new(tag: &'static str, fields: Fields) -> Self {
        Self {
            tag,
            key: None,
            fields,
        }
    }

    pub fn keyed(tag: &'static str, key: impl Into<String>, fields: Fields) -> Self {
        Self {
            tag,
            key: Some(key.into()),
            fields,
        }
    }
}

/// Outcome of sampling one source: what could be read, and what could not.
#[derive(Debug, Default)]
pub struct Batch {
    pub samples: Vec<Sample>,
    pub failures: Vec<error::SourceError>,
}

impl Batch {
    /// Adds a sample, folding its fields into an earlier sample with the same
    /// tag and key.
    pub fn merge(&mut self, sample: Sample) {
        match self
            .samples
            .iter_mut()
            .find(|existing| existing.tag == sample.tag && existing.key == sample.key)
        {
            Some(existing) => existing.fields.extend(sample.fields),
            None => self.samples.push(sample),
        }
    }
}

/// The closed set of metric sources.
pub enum MetricSource {
    OsResources(OsResourceSource),
    BodySensors(BodySensorSource),
    Perception(PerceptionSource),
}

impl MetricSource {
    pub fn name(&self) -> &'static str {
        match self {
            MetricSource::OsResources(_) => "os",
            MetricSource::BodySensors(_) => "body",
            MetricSource::Perception(_) => "perception",
        }
    }

    /// True if the source can run on this host right now.
    pub async fn check(&self) -> bool {
        match self {
            MetricSource::OsResources(source) => source.check().await,
            MetricSource::BodySensors(source) => source.check().await,
            MetricSource::Perception(source) => source.check().await,
        }
    }

    /// One-time preparation after each start. May yield one-shot samples.
    pub async fn prepare(&self) -> SourceResult<Vec<Sample>> {
        match self {
            MetricSource::OsResources(source) => source.prepare().await,
            MetricSource::BodySensors(_) => Ok(Vec::new()),
            MetricSource::Perception(source) => source.prepare().await,
        }
    }

    pub async fn sample(&self) -> SourceResult<Batch> {
        match self {
            MetricSource::OsResources(source) => source.sample().await,
            MetricSource::BodySensors(source) => source.sample().await,
            MetricSource::Perception(source) => source.sample().await,
        }
    }
}

/// What a configured source name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Os(OsMetric),
    Body,
    Perception,
}

impl SourceKind {
    pub fn from_name(name: &str) -> Option<SourceKind> {
        match name {
            "body" => Some(SourceKind::Body),
            "perception" => Some(SourceKind::Perception),
            other => OsMetric::from_name(other).map(SourceKind::Os),
        }
    }
}

/// Names selected when the preference store has no list.
pub const DEFAULT_SOURCES: [&str; 6] = ["cpu", "loadavg", "filefd", "net", "body", "perception"];

/// Maps configured names to source instances.
pub struct SourceRegistry {
    proc: ProcFs,
    memory: Arc<dyn RobotMemory>,
}

impl SourceRegistry {
    pub fn new(proc: ProcFs, memory: Arc<dyn RobotMemory>) -> Self {
        Self { proc, memory }
    }

    /// Every name the registry understands.
    pub fn list() -> Vec<&'static str> {
        OsMetric::ALL
            .iter()
            .map(OsMetric::name)
            .chain(["body", "perception"])
            .collect()
    }

    /// Builds the sources for `names`, in order of first mention.
    ///
    /// All OS sub-metrics are served by a single OS source placed where the
    /// first of them is named. Unknown and repeated names are skipped.
    pub fn resolve(&self, names: &[String], interfaces: Option<Vec<String>>) -> Vec<Arc<MetricSource>> {
        #[derive(PartialEq)]
        enum Slot {
            Os,
            Body,
            Perception,
        }

        let mut order = Vec::new();
        let mut os_metrics = Vec::new();

        for name in names {
            let slot = match SourceKind::from_name(name) {
                Some(SourceKind::Os(metric)) => {
                    if !os_metrics.contains(&metric) {
                        os_metrics.push(metric);
                    }
                    Slot::Os
                }
                Some(SourceKind::Body) => Slot::Body,
                Some(SourceKind::Perception) => Slot::Perception,
                None => {
                    warn!("Unknown metric source '{}' ignored", name);
                    continue;
                }
            };
            if !order.contains(&slot) {
                order.push(slot);
            }
        }

        let mut os_source = Some(OsResourceSource::new(self.proc.clone(), os_metrics, interfaces));

        order
            .into_iter()
            .filter_map(|slot| {
                let source = match slot {
                    Slot::Os => MetricSource::OsResources(os_source.take()?),
                    Slot::Body => MetricSource::BodySensors(BodySensorSource::new(self.memory.clone())),
                    Slot::Perception => {
                        MetricSource::Perception(PerceptionSource::new(self.memory.clone()))
                    }
                };
                Some(Arc::new(source))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::core::sources::memory::StaticMemory;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new(ProcFs::new("/proc"), Arc::new(StaticMemory::new()))
    }

    #[test]
    fn merge_folds_same_tag_and_key() {
        let mut batch = Batch::default();
        let mut a = Fields::new();
        a.insert("cpu_user".into(), Value::from(1));
        let mut b = Fields::new();
        b.insert("load_1m".into(), Value::from(0.5));

        batch.merge(Sample::new("cpu", a));
        batch.merge(Sample::keyed("net", "eth0", Fields::new()));
        batch.merge(Sample::keyed("net", "wlan0", Fields::new()));
        batch.merge(Sample::new("cpu", b));

        assert_eq!(batch.samples.len(), 3);
        assert_eq!(batch.samples[0].fields.len(), 2);
    }

    #[test]
    fn kinds_resolve_by_name() {
        assert_eq!(SourceKind::from_name("net"), Some(SourceKind::Os(OsMetric::Net)));
        assert_eq!(SourceKind::from_name("body"), Some(SourceKind::Body));
        assert_eq!(SourceKind::from_name("lidar"), None);
    }

    #[test]
    fn default_list_is_fully_known() {
        for name in DEFAULT_SOURCES {
            assert!(SourceKind::from_name(name).is_some(), "{}", name);
            assert!(SourceRegistry::list().contains(&name));
        }
    }

    #[test]
    fn os_metrics_share_one_source() {
        let sources = registry().resolve(&names(&DEFAULT_SOURCES), None);
        let kinds: Vec<_> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(kinds, vec!["os", "body", "perception"]);

        match sources[0].as_ref() {
            MetricSource::OsResources(os) => assert_eq!(os.metrics().len(), 4),
            _ => panic!("first source should be the OS source"),
        }
    }

    #[test]
    fn order_follows_first_mention() {
        let sources = registry().resolve(&names(&["perception", "net", "body", "cpu", "net"]), None);
        let kinds: Vec<_> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(kinds, vec!["perception", "os", "body"]);

        match sources[1].as_ref() {
            MetricSource::OsResources(os) => {
                assert_eq!(os.metrics(), &[OsMetric::Net, OsMetric::Cpu])
            }
            _ => panic!("second source should be the OS source"),
        }
    }

    #[test]
    #[traced_test]
    fn unknown_names_are_logged_and_skipped() {
        let sources = registry().resolve(&names(&["lidar", "body"]), None);
        assert_eq!(sources.len(), 1);
        assert!(logs_contain("Unknown metric source 'lidar' ignored"));
    }
}
