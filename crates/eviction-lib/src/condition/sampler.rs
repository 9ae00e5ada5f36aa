//! Host resource sampling from procfs
//!
//! Reads `stat`, `meminfo`, `diskstats` and `net/dev` under a configurable
//! proc root. CPU, disk and network figures are rates, so they are computed
//! from the delta against the previous sample; the first sample reports zero
//! for those.

use crate::error::ConditionError;
use crate::models::NodeCondition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// Block devices that never represent real disk pressure
const IGNORED_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram", "fd", "sr"];

/// Resource usage derived from two consecutive samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeUsage {
    pub cpu_busy_percent: f64,
    pub memory_available_percent: f64,
    /// Highest utilisation across block devices
    pub disk_io_busy_percent: f64,
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,
}

/// Limits above which a resource is reported unavailable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionThresholds {
    pub cpu_busy_percent: f64,
    pub memory_min_available_percent: f64,
    pub disk_io_busy_percent: f64,
    pub network_rx_bytes_per_sec: u64,
    pub network_tx_bytes_per_sec: u64,
}

impl Default for ConditionThresholds {
    fn default() -> Self {
        Self {
            cpu_busy_percent: 90.0,
            memory_min_available_percent: 10.0,
            disk_io_busy_percent: 90.0,
            // 1 Gbit/s
            network_rx_bytes_per_sec: 125_000_000,
            network_tx_bytes_per_sec: 125_000_000,
        }
    }
}

impl ConditionThresholds {
    /// Map usage figures onto availability flags
    pub fn evaluate(&self, usage: &NodeUsage) -> NodeCondition {
        NodeCondition {
            network_rx_available: usage.network_rx_bytes_per_sec
                < self.network_rx_bytes_per_sec as f64,
            network_tx_available: usage.network_tx_bytes_per_sec
                < self.network_tx_bytes_per_sec as f64,
            disk_io_available: usage.disk_io_busy_percent < self.disk_io_busy_percent,
            cpu_available: usage.cpu_busy_percent < self.cpu_busy_percent,
            memory_available: usage.memory_available_percent
                >= self.memory_min_available_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Raw monotonically increasing counters
#[derive(Debug, Clone, Default)]
struct Counters {
    cpu: CpuTimes,
    /// Milliseconds spent doing I/O, per device
    disk_io_ticks: HashMap<String, u64>,
    net_rx_bytes: u64,
    net_tx_bytes: u64,
}

/// Samples node-wide resource usage from procfs
pub struct NodeSampler {
    proc_root: PathBuf,
    previous: Option<(Instant, Counters)>,
}

impl NodeSampler {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            previous: None,
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Take a sample at `at` and compute usage against the previous one
    pub async fn sample(&mut self, at: Instant) -> Result<NodeUsage, ConditionError> {
        let stat = self.read("stat").await?;
        let meminfo = self.read("meminfo").await?;
        let diskstats = self.read("diskstats").await?;
        let net_dev = self.read("net/dev").await?;

        let (net_rx_bytes, net_tx_bytes) = parse_net_dev(&net_dev)?;
        let counters = Counters {
            cpu: parse_cpu_stat(&stat)?,
            disk_io_ticks: parse_diskstats(&diskstats)?,
            net_rx_bytes,
            net_tx_bytes,
        };

        let mut usage = NodeUsage {
            memory_available_percent: parse_meminfo(&meminfo)?,
            ..Default::default()
        };

        if let Some((previous_at, previous)) = &self.previous {
            let elapsed_secs = at.saturating_duration_since(*previous_at).as_secs_f64();
            apply_deltas(&mut usage, previous, &counters, elapsed_secs);
        }

        self.previous = Some((at, counters));
        Ok(usage)
    }

    async fn read(&self, relative: &str) -> Result<String, ConditionError> {
        let path = self.proc_root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConditionError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

fn apply_deltas(usage: &mut NodeUsage, previous: &Counters, current: &Counters, elapsed_secs: f64) {
    let total = current.cpu.total.saturating_sub(previous.cpu.total);
    let busy = current.cpu.busy.saturating_sub(previous.cpu.busy);
    if total > 0 {
        usage.cpu_busy_percent = busy as f64 / total as f64 * 100.0;
    }

    if elapsed_secs <= 0.0 {
        return;
    }

    let elapsed_ms = elapsed_secs * 1000.0;
    usage.disk_io_busy_percent = current
        .disk_io_ticks
        .iter()
        .filter_map(|(device, ticks)| {
            let before = previous.disk_io_ticks.get(device)?;
            Some((ticks.saturating_sub(*before) as f64 / elapsed_ms * 100.0).min(100.0))
        })
        .fold(0.0, f64::max);

    usage.network_rx_bytes_per_sec =
        current.net_rx_bytes.saturating_sub(previous.net_rx_bytes) as f64 / elapsed_secs;
    usage.network_tx_bytes_per_sec =
        current.net_tx_bytes.saturating_sub(previous.net_tx_bytes) as f64 / elapsed_secs;
}

fn parse_error(file: &'static str, reason: impl Into<String>) -> ConditionError {
    ConditionError::Parse {
        file,
        reason: reason.into(),
    }
}

fn parse_cpu_stat(content: &str) -> Result<CpuTimes, ConditionError> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| parse_error("stat", "missing aggregate cpu line"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|field| field.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| parse_error("stat", e.to_string()))?;

    if fields.len() < 4 {
        return Err(parse_error("stat", "too few cpu fields"));
    }

    let total = fields.iter().copied().fold(0u64, u64::saturating_add);
    // idle + iowait
    let idle = fields[3].saturating_add(fields.get(4).copied().unwrap_or(0));

    Ok(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn parse_meminfo(content: &str) -> Result<f64, ConditionError> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let slot = match parts.next() {
            Some("MemTotal:") => &mut total,
            Some("MemAvailable:") => &mut available,
            _ => continue,
        };
        *slot = parts.next().and_then(|value| value.parse::<u64>().ok());
    }

    match (total, available) {
        (Some(total), Some(available)) if total > 0 => {
            Ok(available as f64 / total as f64 * 100.0)
        }
        _ => Err(parse_error("meminfo", "missing MemTotal or MemAvailable")),
    }
}

fn parse_diskstats(content: &str) -> Result<HashMap<String, u64>, ConditionError> {
    let mut ticks = HashMap::new();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 13 {
            continue;
        }

        let device = fields[2];
        if IGNORED_DEVICE_PREFIXES
            .iter()
            .any(|prefix| device.starts_with(prefix))
        {
            continue;
        }

        let io_ticks = fields[12]
            .parse::<u64>()
            .map_err(|e| parse_error("diskstats", format!("{}: {}", device, e)))?;
        ticks.insert(device.to_string(), io_ticks);
    }

    Ok(ticks)
}

fn parse_net_dev(content: &str) -> Result<(u64, u64), ConditionError> {
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    // Two header lines precede the interfaces
    for line in content.lines().skip(2) {
        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        if interface.trim() == "lo" {
            continue;
        }

        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(parse_error(
                "net/dev",
                format!("interface {} has too few fields", interface.trim()),
            ));
        }

        let rx = fields[0]
            .parse::<u64>()
            .map_err(|e| parse_error("net/dev", e.to_string()))?;
        let tx = fields[8]
            .parse::<u64>()
            .map_err(|e| parse_error("net/dev", e.to_string()))?;
        rx_total = rx_total.saturating_add(rx);
        tx_total = tx_total.saturating_add(tx);
    }

    Ok((rx_total, tx_total))
}
