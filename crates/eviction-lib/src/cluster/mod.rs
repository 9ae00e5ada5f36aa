//! Cluster API facade
//!
//! The controller mutates node taints and workload labels, and evicts
//! workloads, exclusively through the [`ClusterApi`] trait. The production
//! implementation talks to the Kubernetes API server.

mod kube_client;
mod quantity;
mod taints;

pub use kube_client::{KubeClusterClient, PRIORITY_LABEL_SUFFIX};
pub use quantity::{parse_cpu_millicores, parse_memory_bytes};
pub use taints::{
    apply_taint_action, taint_key, taint_state_from_taints, DEFAULT_TAINT_KEY_PREFIX,
    TAINT_EFFECT,
};

use crate::error::ClusterError;
use crate::models::{LabelAction, NodeTaintState, TaintAction, TaintKind, Workload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutation and query surface for taints and workload actions
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Read which resource taints are currently present on this node
    async fn get_taint_conditions(&self) -> Result<NodeTaintState, ClusterError>;

    /// Add or remove the taint for one resource dimension
    async fn set_taint_condition(
        &self,
        kind: TaintKind,
        action: TaintAction,
    ) -> Result<(), ClusterError>;

    /// Remove a workload from the node
    async fn evict_workload(&self, workload: &Workload) -> Result<(), ClusterError>;

    /// Attach or remove the eviction priority label on a workload
    async fn label_workload(
        &self,
        workload: &Workload,
        priority: u32,
        action: LabelAction,
    ) -> Result<(), ClusterError>;

    /// Remove eviction priority labels from every workload on this node
    async fn clear_all_eviction_labels(&self) -> Result<(), ClusterError>;
}

/// Pod quality-of-service class, ordered from first to last evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QosClass {
    BestEffort,
    Burstable,
    Guaranteed,
}

impl QosClass {
    pub fn parse(value: &str) -> Self {
        match value {
            "BestEffort" => QosClass::BestEffort,
            "Guaranteed" => QosClass::Guaranteed,
            _ => QosClass::Burstable,
        }
    }
}

/// Scheduling facts about a workload used to rank eviction candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub workload: Workload,
    pub qos: QosClass,
    pub cpu_request_millicores: u64,
    pub memory_request_bytes: u64,
    /// Current value of the eviction priority label, if any
    pub eviction_priority: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Owned by a DaemonSet; evicting it would only reschedule it here
    pub daemon_set: bool,
    /// Static pod mirrored by the kubelet
    pub mirror: bool,
    /// Uses a system-critical priority class
    pub critical: bool,
    /// Pod has already terminated
    pub terminated: bool,
}

/// Source of the workloads currently placed on this node
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn list_workloads(&self) -> Result<Vec<WorkloadInfo>, ClusterError>;
}
