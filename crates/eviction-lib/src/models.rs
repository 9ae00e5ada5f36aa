//! Core data models for the eviction agent

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an eviction signal.
///
/// Network receive and transmit pressure are distinct signals because the
/// victim-selection policy is keyed on them, but they share a single taint
/// dimension (see [`TaintKind::NetworkIo`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "CPUBusy")]
    Cpu,
    #[serde(rename = "MemoryBusy")]
    Memory,
    #[serde(rename = "DiskIOBusy")]
    DiskIo,
    #[serde(rename = "NetworkRxBusy")]
    NetworkRx,
    #[serde(rename = "NetworkTxBusy")]
    NetworkTx,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::DiskIo,
        ResourceKind::NetworkRx,
        ResourceKind::NetworkTx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "CPUBusy",
            ResourceKind::Memory => "MemoryBusy",
            ResourceKind::DiskIo => "DiskIOBusy",
            ResourceKind::NetworkRx => "NetworkRxBusy",
            ResourceKind::NetworkTx => "NetworkTxBusy",
        }
    }

    /// Taint dimension this signal belongs to
    pub fn taint_kind(&self) -> TaintKind {
        match self {
            ResourceKind::Cpu => TaintKind::Cpu,
            ResourceKind::Memory => TaintKind::Memory,
            ResourceKind::DiskIo => TaintKind::DiskIo,
            ResourceKind::NetworkRx | ResourceKind::NetworkTx => TaintKind::NetworkIo,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource dimension a node can be tainted for.
///
/// The declaration order is the eviction priority order used when several
/// dimensions are under pressure in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaintKind {
    #[serde(rename = "CPUBusy")]
    Cpu,
    #[serde(rename = "MemoryBusy")]
    Memory,
    #[serde(rename = "DiskIOBusy")]
    DiskIo,
    #[serde(rename = "NetworkIOBusy")]
    NetworkIo,
}

impl TaintKind {
    /// All taint dimensions in evaluation order
    pub const ALL: [TaintKind; 4] = [
        TaintKind::Cpu,
        TaintKind::Memory,
        TaintKind::DiskIo,
        TaintKind::NetworkIo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaintKind::Cpu => "CPUBusy",
            TaintKind::Memory => "MemoryBusy",
            TaintKind::DiskIo => "DiskIOBusy",
            TaintKind::NetworkIo => "NetworkIOBusy",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for TaintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a taint mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintAction {
    Taint,
    UnTaint,
}

impl fmt::Display for TaintAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintAction::Taint => write!(f, "Taint"),
            TaintAction::UnTaint => write!(f, "UnTaint"),
        }
    }
}

/// Direction of a priority label mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelAction {
    Add,
    Remove,
}

impl fmt::Display for LabelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelAction::Add => write!(f, "Add"),
            LabelAction::Remove => write!(f, "Remove"),
        }
    }
}

/// Which resource dimensions the node is currently tainted for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTaintState {
    flags: [bool; 4],
}

impl NodeTaintState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tainted(&self, kind: TaintKind) -> bool {
        self.flags[kind.index()]
    }

    pub fn set(&mut self, kind: TaintKind, tainted: bool) {
        self.flags[kind.index()] = tainted;
    }

    pub fn with(mut self, kind: TaintKind) -> Self {
        self.set(kind, true);
        self
    }

    /// True if any dimension is tainted
    pub fn any(&self) -> bool {
        self.flags.iter().any(|flag| *flag)
    }

    /// Iterate over tainted dimensions in evaluation order
    pub fn tainted(&self) -> impl Iterator<Item = TaintKind> + '_ {
        TaintKind::ALL
            .into_iter()
            .filter(move |kind| self.is_tainted(*kind))
    }
}

/// Point-in-time availability snapshot from the condition source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub network_rx_available: bool,
    pub network_tx_available: bool,
    pub disk_io_available: bool,
    pub cpu_available: bool,
    pub memory_available: bool,
}

impl Default for NodeCondition {
    fn default() -> Self {
        Self {
            network_rx_available: true,
            network_tx_available: true,
            disk_io_available: true,
            cpu_available: true,
            memory_available: true,
        }
    }
}

impl NodeCondition {
    pub fn all_available(&self) -> bool {
        self.network_rx_available
            && self.network_tx_available
            && self.disk_io_available
            && self.cpu_available
            && self.memory_available
    }

    /// Availability of one taint dimension; network is the Rx/Tx union
    pub fn is_available(&self, kind: TaintKind) -> bool {
        match kind {
            TaintKind::Cpu => self.cpu_available,
            TaintKind::Memory => self.memory_available,
            TaintKind::DiskIo => self.disk_io_available,
            TaintKind::NetworkIo => self.network_rx_available && self.network_tx_available,
        }
    }

    /// Signal identity to emit when `kind` is unavailable.
    ///
    /// Receive pressure takes precedence over transmit pressure.
    pub fn busy_signal(&self, kind: TaintKind) -> ResourceKind {
        match kind {
            TaintKind::Cpu => ResourceKind::Cpu,
            TaintKind::Memory => ResourceKind::Memory,
            TaintKind::DiskIo => ResourceKind::DiskIo,
            TaintKind::NetworkIo => {
                if !self.network_rx_available {
                    ResourceKind::NetworkRx
                } else {
                    ResourceKind::NetworkTx
                }
            }
        }
    }
}

/// A workload unit (pod) on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Outcome of victim selection for one eviction signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimDecision {
    pub workload: Workload,
    /// Remove the workload now instead of labeling it
    pub hard_evict: bool,
    /// Eviction priority label value
    pub priority: u32,
}
