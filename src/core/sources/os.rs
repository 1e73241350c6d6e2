//! OS-resource metric source.
//!
//! Reads counters from the proc filesystem through a set of named
//! sub-metrics ([`OsMetric`]). Each sub-metric contributes fields to a
//! logical group: CPU times, load average, and file descriptors all land in
//! the `cpu` event, while every monitored network interface gets its own
//! `net` event.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use super::{
    error::{SourceError, SourceResult},
    Batch, Fields, Sample,
};

/// Reader rooted at a proc filesystem mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, relative: &str) -> SourceResult<String> {
        let path = self.root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::FileRead {
                path: path.display().to_string(),
                source,
            })
    }
}

/// The pluggable OS sub-metrics, selected by name from the preference store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsMetric {
    Cpu,
    LoadAvg,
    FileFd,
    Net,
}

impl OsMetric {
    pub const ALL: [OsMetric; 4] = [OsMetric::Cpu, OsMetric::LoadAvg, OsMetric::FileFd, OsMetric::Net];

    pub fn name(&self) -> &'static str {
        match self {
            OsMetric::Cpu => "cpu",
            OsMetric::LoadAvg => "loadavg",
            OsMetric::FileFd => "filefd",
            OsMetric::Net => "net",
        }
    }

    pub fn from_name(name: &str) -> Option<OsMetric> {
        OsMetric::ALL.into_iter().find(|metric| metric.name() == name)
    }
}

/// Aggregate CPU time counters from `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        [self.nice, self.system, self.idle, self.iowait, self.irq, self.softirq]
            .into_iter()
            .fold(self.user, u64::saturating_add)
    }

    fn busy(&self) -> u64 {
        self.total().saturating_sub(self.idle).saturating_sub(self.iowait)
    }

    /// Busy percentage between `previous` and `self`, if any time elapsed.
    pub fn usage_since(&self, previous: &CpuTimes) -> Option<f64> {
        let total = self.total().checked_sub(previous.total())?;
        let busy = self.busy().checked_sub(previous.busy())?;
        if total == 0 {
            return None;
        }
        let percent = busy as f64 * 100.0 / total as f64;
        Some((percent * 100.0).round() / 100.0)
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(content: &str) -> SourceResult<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| SourceError::MissingField {
            field: "cpu".to_string(),
            location: "/proc/stat".to_string(),
        })?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    // cpu label + 7 counters
    if parts.len() < 8 {
        return Err(SourceError::InvalidFormat {
            location: "/proc/stat".to_string(),
            reason: "Expected at least 7 counters on the cpu line".to_string(),
        });
    }

    let field = |index: usize, metric: &str| -> SourceResult<u64> {
        parts[index]
            .parse::<u64>()
            .map_err(|_| SourceError::ParseError {
                metric: metric.to_string(),
                location: "/proc/stat".to_string(),
                reason: format!("invalid value: {}", parts[index]),
            })
    };

    Ok(CpuTimes {
        user: field(1, "user")?,
        nice: field(2, "nice")?,
        system: field(3, "system")?,
        idle: field(4, "idle")?,
        iowait: field(5, "iowait")?,
        irq: field(6, "irq")?,
        softirq: field(7, "softirq")?,
    })
}

/// Parses `/proc/loadavg` into `load_*` and `procs_*` fields.
pub fn parse_loadavg(content: &str) -> SourceResult<Fields> {
    // Expected format: "1.23 1.45 1.67 1/234 12345"
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(SourceError::InvalidFormat {
            location: "/proc/loadavg".to_string(),
            reason: "Expected at least 4 fields".to_string(),
        });
    }

    let mut fields = Fields::new();
    for (index, name) in ["load_1m", "load_5m", "load_15m"].into_iter().enumerate() {
        let value = parts[index]
            .parse::<f64>()
            .map_err(|_| SourceError::ParseError {
                metric: name.to_string(),
                location: "/proc/loadavg".to_string(),
                reason: format!("invalid value: {}", parts[index]),
            })?;
        fields.insert(name.into(), Value::from(value));
    }

    // "running/total"
    let (running, total) = parts[3]
        .split_once('/')
        .ok_or_else(|| SourceError::InvalidFormat {
            location: "/proc/loadavg".to_string(),
            reason: "process field must be in format 'running/total'".to_string(),
        })?;
    for (name, raw) in [("procs_running", running), ("procs_total", total)] {
        let value = raw.parse::<u64>().map_err(|_| SourceError::ParseError {
            metric: name.to_string(),
            location: "/proc/loadavg".to_string(),
            reason: format!("invalid value: {}", raw),
        })?;
        fields.insert(name.into(), Value::from(value));
    }

    Ok(fields)
}

/// Parses `/proc/sys/fs/file-nr` ("allocated reserved maximum").
pub fn parse_file_nr(content: &str) -> SourceResult<Fields> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    let mut fields = Fields::new();

    for (index, name) in [(0, "fd_allocated"), (2, "fd_max")] {
        let value: u64 = parts
            .get(index)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SourceError::MissingField {
                field: name.to_string(),
                location: "/proc/sys/fs/file-nr".to_string(),
            })?;
        fields.insert(name.into(), Value::from(value));
    }

    Ok(fields)
}

/// Parses `/proc/net/dev` into one field map per interface.
///
/// With `include` set only the listed interfaces are kept, otherwise every
/// interface except loopback.
pub fn parse_net_dev(content: &str, include: Option<&[String]>) -> SourceResult<Vec<(String, Fields)>> {
    const NAMES: [(usize, &str); 8] = [
        (0, "rx_bytes"),
        (1, "rx_packets"),
        (2, "rx_errors"),
        (3, "rx_drops"),
        (8, "tx_bytes"),
        (9, "tx_packets"),
        (10, "tx_errors"),
        (11, "tx_drops"),
    ];

    let mut interfaces = Vec::new();

    // The first two lines are column headers
    for line in content.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();

        let wanted = match include {
            Some(list) => list.iter().any(|allowed| allowed == name),
            None => name != "lo",
        };
        if !wanted {
            continue;
        }

        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            return Err(SourceError::InvalidFormat {
                location: "/proc/net/dev".to_string(),
                reason: format!("interface {} has {} counters, expected 16", name, values.len()),
            });
        }

        let mut fields = Fields::new();
        fields.insert("interface".into(), Value::from(name));
        for (index, field) in NAMES {
            let value = values[index]
                .parse::<u64>()
                .map_err(|_| SourceError::ParseError {
                    metric: field.to_string(),
                    location: "/proc/net/dev".to_string(),
                    reason: format!("invalid value for {}: {}", name, values[index]),
                })?;
            fields.insert(field.into(), Value::from(value));
        }
        interfaces.push((name.to_string(), fields));
    }

    Ok(interfaces)
}

/// Parses `/proc/cpuinfo` into the one-shot `cpu_info` fields.
pub fn parse_cpuinfo(content: &str) -> Fields {
    let mut fields = Fields::new();
    let mut cores = 0u64;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "processor" => cores += 1,
            "model name" | "Hardware" if !fields.contains_key("model") => {
                fields.insert("model".into(), Value::from(value));
            }
            "cpu MHz" if !fields.contains_key("mhz") => {
                if let Ok(mhz) = value.parse::<f64>() {
                    fields.insert("mhz".into(), Value::from(mhz));
                }
            }
            _ => {}
        }
    }

    fields.insert("cores".into(), Value::from(cores));
    fields
}

/// Source sampling the selected OS sub-metrics.
#[derive(Debug)]
pub struct OsResourceSource {
    proc: ProcFs,
    metrics: Vec<OsMetric>,
    interfaces: Option<Vec<String>>,
    previous_cpu: Mutex<Option<CpuTimes>>,
}

impl OsResourceSource {
    pub fn new(proc: ProcFs, metrics: Vec<OsMetric>, interfaces: Option<Vec<String>>) -> Self {
        Self {
            proc,
            metrics,
            interfaces,
            previous_cpu: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &[OsMetric] {
        &self.metrics
    }

    pub(super) async fn check(&self) -> bool {
        tokio::fs::metadata(self.proc.root()).await.is_ok()
    }

    /// Emits `cpu_info` and records the CPU baseline for the first usage figure.
    pub(super) async fn prepare(&self) -> SourceResult<Vec<Sample>> {
        if self.metrics.contains(&OsMetric::Cpu) {
            if let Ok(times) = self.proc.read("stat").await.and_then(|c| parse_cpu_times(&c)) {
                *self.previous_cpu.lock() = Some(times);
            }
        }

        let content = self.proc.read("cpuinfo").await?;
        Ok(vec![Sample::new("cpu_info", parse_cpuinfo(&content))])
    }

    pub(super) async fn sample(&self) -> SourceResult<Batch> {
        let mut batch = Batch::default();

        for metric in &self.metrics {
            match self.sample_metric(*metric).await {
                Ok(samples) => {
                    for sample in samples {
                        batch.merge(sample);
                    }
                }
                Err(e) => batch.failures.push(e),
            }
        }

        Ok(batch)
    }

    async fn sample_metric(&self, metric: OsMetric) -> SourceResult<Vec<Sample>> {
        match metric {
            OsMetric::Cpu => {
                let times = parse_cpu_times(&self.proc.read("stat").await?)?;
                let previous = self.previous_cpu.lock().replace(times);

                let mut fields = Fields::new();
                for (name, value) in [
                    ("cpu_user", times.user),
                    ("cpu_nice", times.nice),
                    ("cpu_system", times.system),
                    ("cpu_idle", times.idle),
                    ("cpu_iowait", times.iowait),
                    ("cpu_irq", times.irq),
                    ("cpu_softirq", times.softirq),
                ] {
                    fields.insert(name.into(), Value::from(value));
                }
                if let Some(usage) = previous.and_then(|prev| times.usage_since(&prev)) {
                    fields.insert("cpu_usage".into(), Value::from(usage));
                }
                Ok(vec![Sample::new("cpu", fields)])
            }
            OsMetric::LoadAvg => {
                let fields = parse_loadavg(&self.proc.read("loadavg").await?)?;
                Ok(vec![Sample::new("cpu", fields)])
            }
            OsMetric::FileFd => {
                let fields = parse_file_nr(&self.proc.read("sys/fs/file-nr").await?)?;
                Ok(vec![Sample::new("cpu", fields)])
            }
            OsMetric::Net => {
                let content = self.proc.read("net/dev").await?;
                let interfaces = parse_net_dev(&content, self.interfaces.as_deref())?;
                Ok(interfaces
                    .into_iter()
                    .map(|(name, fields)| Sample::keyed("net", name, fields))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use super::*;

    pub(crate) const STAT: &str = "cpu  100 5 50 800 20 3 2 0 0 0\ncpu0 50 2 25 400 10 1 1 0 0 0\nintr 12345\n";
    pub(crate) const LOADAVG: &str = "0.52 0.48 0.40 2/311 4242\n";
    pub(crate) const FILE_NR: &str = "1632\t0\t9223372036854775807\n";
    pub(crate) const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0: 52000     400    1    2    0     0          0         0    31000     250    0    3    0     0       0          0
 wlan0:  7000      70    0    0    0     0          0         0     6000      60    0    0    0     0       0          0
";
    pub(crate) const CPUINFO: &str = "processor\t: 0\nmodel name\t: Intel(R) Atom(TM) CPU E3845 @ 1.91GHz\ncpu MHz\t\t: 1910.000\n\nprocessor\t: 1\nmodel name\t: Intel(R) Atom(TM) CPU E3845 @ 1.91GHz\ncpu MHz\t\t: 1330.000\n";

    /// Writes a minimal proc tree into `root`.
    pub(crate) fn write_proc_tree(root: &Path) {
        fs::create_dir_all(root.join("sys/fs")).unwrap();
        fs::create_dir_all(root.join("net")).unwrap();
        fs::write(root.join("stat"), STAT).unwrap();
        fs::write(root.join("loadavg"), LOADAVG).unwrap();
        fs::write(root.join("sys/fs/file-nr"), FILE_NR).unwrap();
        fs::write(root.join("net/dev"), NET_DEV).unwrap();
        fs::write(root.join("cpuinfo"), CPUINFO).unwrap();
    }

    #[test]
    fn metric_names_resolve() {
        for metric in OsMetric::ALL {
            assert_eq!(OsMetric::from_name(metric.name()), Some(metric));
        }
        assert_eq!(OsMetric::from_name("gpu"), None);
    }

    #[test]
    fn parses_aggregate_cpu_line() {
        let times = parse_cpu_times(STAT).unwrap();
        assert_eq!(times.user, 100);
        assert_eq!(times.idle, 800);
        assert_eq!(times.softirq, 2);
    }

    #[test]
    fn cpu_line_with_garbage_is_rejected() {
        let err = parse_cpu_times("cpu 1 2 x 4 5 6 7\n").unwrap_err();
        assert!(matches!(err, SourceError::ParseError { ref metric, .. } if metric == "system"));
        assert!(matches!(
            parse_cpu_times("intr 1\n"),
            Err(SourceError::MissingField { .. })
        ));
    }

    #[test]
    fn usage_is_busy_share_of_elapsed_time() {
        let before = CpuTimes { user: 100, idle: 100, ..Default::default() };
        let after = CpuTimes { user: 130, idle: 170, ..Default::default() };
        assert_eq!(after.usage_since(&before), Some(30.0));
        assert_eq!(after.usage_since(&after), None);
    }

    #[test]
    fn huge_counters_saturate_instead_of_overflowing() {
        let max = u64::MAX;
        let stat = format!("cpu  {max} {max} {max} {max} {max} {max} {max}\n");
        let after = parse_cpu_times(&stat).unwrap();

        let usage = after.usage_since(&CpuTimes::default());
        assert!(usage.is_some_and(|percent| (0.0..=100.0).contains(&percent)));
        assert_eq!(after.usage_since(&after), None);
    }

    #[test]
    fn parses_loadavg() {
        let fields = parse_loadavg(LOADAVG).unwrap();
        assert_eq!(fields["load_1m"], 0.52);
        assert_eq!(fields["load_15m"], 0.40);
        assert_eq!(fields["procs_running"], 2);
        assert_eq!(fields["procs_total"], 311);
        assert!(parse_loadavg("0.1 0.2 0.3 7\n").is_err());
    }

    #[test]
    fn parses_file_nr() {
        let fields = parse_file_nr(FILE_NR).unwrap();
        assert_eq!(fields["fd_allocated"], 1632);
        assert_eq!(fields["fd_max"], 9223372036854775807u64);
        assert!(parse_file_nr("12\n").is_err());
    }

    #[test]
    fn net_dev_skips_loopback_by_default() {
        let interfaces = parse_net_dev(NET_DEV, None).unwrap();
        let names: Vec<_> = interfaces.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "wlan0"]);

        let eth0 = &interfaces[0].1;
        assert_eq!(eth0["rx_bytes"], 52000);
        assert_eq!(eth0["rx_drops"], 2);
        assert_eq!(eth0["tx_bytes"], 31000);
        assert_eq!(eth0["tx_drops"], 3);
    }

    #[test]
    fn net_dev_honours_allow_list() {
        let include = vec!["wlan0".to_string(), "lo".to_string()];
        let interfaces = parse_net_dev(NET_DEV, Some(&include)).unwrap();
        let names: Vec<_> = interfaces.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["lo", "wlan0"]);
    }

    #[test]
    fn cpuinfo_counts_processors() {
        let fields = parse_cpuinfo(CPUINFO);
        assert_eq!(fields["cores"], 2);
        assert_eq!(fields["mhz"], 1910.0);
        assert!(fields["model"].as_str().unwrap().contains("Atom"));
    }

    #[tokio::test]
    async fn sample_groups_cpu_fields_into_one_event() {
        let dir = tempfile::tempdir().unwrap();
        write_proc_tree(dir.path());

        let source = OsResourceSource::new(ProcFs::new(dir.path()), OsMetric::ALL.to_vec(), None);
        let batch = source.sample().await.unwrap();

        assert!(batch.failures.is_empty());
        let tags: Vec<_> = batch.samples.iter().map(|s| s.tag).collect();
        assert_eq!(tags, vec!["cpu", "net", "net"]);

        let cpu = &batch.samples[0].fields;
        assert_eq!(cpu["cpu_user"], 100);
        assert_eq!(cpu["load_5m"], 0.48);
        assert_eq!(cpu["fd_allocated"], 1632);
        assert!(!cpu.contains_key("cpu_usage"));
    }

    #[tokio::test]
    async fn prepare_emits_cpu_info_and_primes_usage() {
        let dir = tempfile::tempdir().unwrap();
        write_proc_tree(dir.path());

        let source = OsResourceSource::new(ProcFs::new(dir.path()), vec![OsMetric::Cpu], None);
        let prepared = source.prepare().await.unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].tag, "cpu_info");

        fs::write(dir.path().join("stat"), "cpu  150 5 50 850 20 3 2 0 0 0\n").unwrap();
        let batch = source.sample().await.unwrap();
        assert_eq!(batch.samples[0].fields["cpu_usage"], 50.0);
    }

    #[tokio::test]
    async fn missing_file_fails_only_its_metric() {
        let dir = tempfile::tempdir().unwrap();
        write_proc_tree(dir.path());
        fs::remove_file(dir.path().join("loadavg")).unwrap();

        let source = OsResourceSource::new(ProcFs::new(dir.path()), OsMetric::ALL.to_vec(), None);
        let batch = source.sample().await.unwrap();

        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(batch.failures[0], SourceError::FileRead { .. }));
        assert_eq!(batch.samples.len(), 3);
        assert!(batch.samples[0].fields.contains_key("fd_max"));
        assert!(!batch.samples[0].fields.contains_key("load_1m"));
    }

    #[tokio::test]
    async fn check_requires_proc_root() {
        let source = OsResourceSource::new(ProcFs::new("/nonexistent/proc"), vec![OsMetric::Cpu], None);
        assert!(!source.check().await);
    }
}
