//! In-memory doubles for the condition source and cluster facade

use crate::cluster::ClusterApi;
use crate::condition::ConditionSource;
use crate::error::{ClusterError, ConditionError};
use crate::models::{
    LabelAction, NodeCondition, NodeTaintState, ResourceKind, TaintAction, TaintKind,
    VictimDecision, Workload,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A recorded facade call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    GetTaints,
    SetTaint(TaintKind, TaintAction),
    Evict(Workload),
    Label(Workload, u32, LabelAction),
    ClearLabels,
}

/// Cluster facade recording every call
#[derive(Default)]
pub struct MockCluster {
    calls: Mutex<Vec<ClusterCall>>,
    live_taints: Mutex<NodeTaintState>,
    fail_get: AtomicBool,
    fail_taint: AtomicBool,
    fail_untaint: AtomicBool,
    fail_evict: AtomicBool,
    fail_label: AtomicBool,
    fail_clear: AtomicBool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_live_taints(self, taints: NodeTaintState) -> Self {
        *self.live_taints.lock().unwrap() = taints;
        self
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Return and forget the calls recorded so far
    pub fn take_calls(&self) -> Vec<ClusterCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn set_live_taints(&self, taints: NodeTaintState) {
        *self.live_taints.lock().unwrap() = taints;
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_taint(&self, fail: bool) {
        self.fail_taint.store(fail, Ordering::SeqCst);
    }

    pub fn fail_untaint(&self, fail: bool) {
        self.fail_untaint.store(fail, Ordering::SeqCst);
    }

    pub fn fail_evict(&self, fail: bool) {
        self.fail_evict.store(fail, Ordering::SeqCst);
    }

    pub fn fail_label(&self, fail: bool) {
        self.fail_label.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: ClusterCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome(flag: &AtomicBool, what: &str) -> Result<(), ClusterError> {
        if flag.load(Ordering::SeqCst) {
            Err(ClusterError::Other(format!("injected {} failure", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get_taint_conditions(&self) -> Result<NodeTaintState, ClusterError> {
        self.record(ClusterCall::GetTaints);
        Self::outcome(&self.fail_get, "get")?;
        Ok(*self.live_taints.lock().unwrap())
    }

    async fn set_taint_condition(
        &self,
        kind: TaintKind,
        action: TaintAction,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::SetTaint(kind, action));
        match action {
            TaintAction::Taint => Self::outcome(&self.fail_taint, "taint")?,
            TaintAction::UnTaint => Self::outcome(&self.fail_untaint, "untaint")?,
        }
        self.live_taints
            .lock()
            .unwrap()
            .set(kind, action == TaintAction::Taint);
        Ok(())
    }

    async fn evict_workload(&self, workload: &Workload) -> Result<(), ClusterError> {
        self.record(ClusterCall::Evict(workload.clone()));
        Self::outcome(&self.fail_evict, "evict")
    }

    async fn label_workload(
        &self,
        workload: &Workload,
        priority: u32,
        action: LabelAction,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::Label(workload.clone(), priority, action));
        Self::outcome(&self.fail_label, "label")
    }

    async fn clear_all_eviction_labels(&self) -> Result<(), ClusterError> {
        self.record(ClusterCall::ClearLabels);
        Self::outcome(&self.fail_clear, "clear")
    }
}

/// Condition source with scripted answers
pub struct MockCondition {
    condition: Mutex<NodeCondition>,
    grace: Mutex<Duration>,
    victim: Mutex<Option<VictimDecision>>,
    victim_delay: Mutex<Duration>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    condition_reads: AtomicUsize,
    victim_requests: Mutex<Vec<ResourceKind>>,
}

impl Default for MockCondition {
    fn default() -> Self {
        Self {
            condition: Mutex::new(NodeCondition::default()),
            grace: Mutex::new(Duration::from_secs(30)),
            victim: Mutex::new(None),
            victim_delay: Mutex::new(Duration::ZERO),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            condition_reads: AtomicUsize::new(0),
            victim_requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_condition(&self, condition: NodeCondition) {
        *self.condition.lock().unwrap() = condition;
    }

    pub fn set_grace(&self, grace: Duration) {
        *self.grace.lock().unwrap() = grace;
    }

    pub fn set_victim(&self, victim: Option<VictimDecision>) {
        *self.victim.lock().unwrap() = victim;
    }

    /// Make victim selection take `delay` (virtual time in paused tests)
    pub fn set_victim_delay(&self, delay: Duration) {
        *self.victim_delay.lock().unwrap() = delay;
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of ticks that sampled the condition
    pub fn condition_reads(&self) -> usize {
        self.condition_reads.load(Ordering::SeqCst)
    }

    pub fn victim_requests(&self) -> Vec<ResourceKind> {
        self.victim_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConditionSource for MockCondition {
    async fn start(&self) -> Result<(), ConditionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ConditionError::Parse {
                file: "stat",
                reason: "injected start failure".to_string(),
            });
        }
        Ok(())
    }

    async fn node_condition(&self) -> NodeCondition {
        self.condition_reads.fetch_add(1, Ordering::SeqCst);
        *self.condition.lock().unwrap()
    }

    async fn untaint_grace_period(&self) -> Duration {
        *self.grace.lock().unwrap()
    }

    async fn choose_victim(&self, kind: ResourceKind) -> Result<VictimDecision, ConditionError> {
        self.victim_requests.lock().unwrap().push(kind);

        let delay = *self.victim_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.victim
            .lock()
            .unwrap()
            .clone()
            .ok_or(ConditionError::NoVictim(kind))
    }
}

/// Condition with the given resources unavailable
pub fn busy(kinds: &[ResourceKind]) -> NodeCondition {
    let mut condition = NodeCondition::default();
    for kind in kinds {
        match kind {
            ResourceKind::Cpu => condition.cpu_available = false,
            ResourceKind::Memory => condition.memory_available = false,
            ResourceKind::DiskIo => condition.disk_io_available = false,
            ResourceKind::NetworkRx => condition.network_rx_available = false,
            ResourceKind::NetworkTx => condition.network_tx_available = false,
        }
    }
    condition
}

pub fn decision(name: &str, hard_evict: bool, priority: u32) -> VictimDecision {
    VictimDecision {
        workload: Workload::new("default", name),
        hard_evict,
        priority,
    }
}
