//! Victim selection for eviction signals
//!
//! Candidates are ranked so that repeated signals escalate on the same
//! workload: a pod labeled in an earlier round is picked first and its
//! priority bumped, until it crosses `hard_evict_priority` and is evicted.

use crate::cluster::WorkloadInfo;
use crate::models::{ResourceKind, VictimDecision};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Eviction candidate ranking and escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VictimPolicy {
    /// Labeled priority above which a workload is hard-evicted
    pub hard_evict_priority: u32,
    /// Signals that always hard-evict instead of labeling
    pub hard_evict_kinds: Vec<ResourceKind>,
    /// Namespaces never selected
    pub protected_namespaces: Vec<String>,
}

impl Default for VictimPolicy {
    fn default() -> Self {
        Self {
            hard_evict_priority: 3,
            hard_evict_kinds: vec![ResourceKind::Memory],
            protected_namespaces: vec!["kube-system".to_string()],
        }
    }
}

impl VictimPolicy {
    /// Whether a workload may be selected at all
    pub fn is_eligible(&self, info: &WorkloadInfo) -> bool {
        !info.terminated
            && !info.daemon_set
            && !info.mirror
            && !info.critical
            && !self
                .protected_namespaces
                .iter()
                .any(|ns| ns == &info.workload.namespace)
    }

    /// Choose the workload to act on for `kind`
    pub fn choose(&self, kind: ResourceKind, workloads: &[WorkloadInfo]) -> Option<VictimDecision> {
        let victim = workloads
            .iter()
            .filter(|info| self.is_eligible(info))
            .min_by(|a, b| rank(kind, a, b))?;

        let priority = victim
            .eviction_priority
            .map(|p| p.saturating_add(1))
            .unwrap_or(1);
        let hard_evict =
            self.hard_evict_kinds.contains(&kind) || priority > self.hard_evict_priority;

        Some(VictimDecision {
            workload: victim.workload.clone(),
            hard_evict,
            priority,
        })
    }
}

/// Ordering where `Less` means "evict earlier"
fn rank(kind: ResourceKind, a: &WorkloadInfo, b: &WorkloadInfo) -> Ordering {
    b.eviction_priority
        .cmp(&a.eviction_priority)
        .then(a.qos.cmp(&b.qos))
        .then_with(|| match kind {
            ResourceKind::Cpu => b.cpu_request_millicores.cmp(&a.cpu_request_millicores),
            ResourceKind::Memory => b.memory_request_bytes.cmp(&a.memory_request_bytes),
            // No per-pod I/O accounting; prefer the most recently started
            ResourceKind::DiskIo | ResourceKind::NetworkRx | ResourceKind::NetworkTx => {
                b.started_at.cmp(&a.started_at)
            }
        })
        .then_with(|| a.workload.to_string().cmp(&b.workload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::QosClass;
    use crate::models::Workload;
    use chrono::{TimeZone, Utc};

    fn info(name: &str, qos: QosClass) -> WorkloadInfo {
        WorkloadInfo {
            workload: Workload::new("default", name),
            qos,
            cpu_request_millicores: 0,
            memory_request_bytes: 0,
            eviction_priority: None,
            started_at: None,
            daemon_set: false,
            mirror: false,
            critical: false,
            terminated: false,
        }
    }

    #[test]
    fn test_best_effort_before_guaranteed() {
        let policy = VictimPolicy::default();
        let workloads = vec![
            info("guaranteed", QosClass::Guaranteed),
            info("best-effort", QosClass::BestEffort),
            info("burstable", QosClass::Burstable),
        ];

        let decision = policy.choose(ResourceKind::Cpu, &workloads).unwrap();
        assert_eq!(decision.workload.name, "best-effort");
        assert_eq!(decision.priority, 1);
        assert!(!decision.hard_evict);
    }

    #[test]
    fn test_cpu_prefers_largest_request() {
        let policy = VictimPolicy::default();
        let mut small = info("small", QosClass::Burstable);
        small.cpu_request_millicores = 100;
        let mut large = info("large", QosClass::Burstable);
        large.cpu_request_millicores = 2000;

        let decision = policy.choose(ResourceKind::Cpu, &[small, large]).unwrap();
        assert_eq!(decision.workload.name, "large");
    }

    #[test]
    fn test_network_prefers_newest() {
        let policy = VictimPolicy::default();
        let mut old = info("old", QosClass::Burstable);
        old.started_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut new = info("new", QosClass::Burstable);
        new.started_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let decision = policy.choose(ResourceKind::NetworkRx, &[old, new]).unwrap();
        assert_eq!(decision.workload.name, "new");
    }

    #[test]
    fn test_labeled_workload_escalates_to_eviction() {
        let policy = VictimPolicy::default();
        let fresh = info("fresh", QosClass::BestEffort);
        let mut labeled = info("labeled", QosClass::Guaranteed);
        labeled.eviction_priority = Some(2);

        let decision = policy
            .choose(ResourceKind::DiskIo, &[fresh.clone(), labeled.clone()])
            .unwrap();
        assert_eq!(decision.workload.name, "labeled");
        assert_eq!(decision.priority, 3);
        assert!(!decision.hard_evict);

        labeled.eviction_priority = Some(3);
        let decision = policy.choose(ResourceKind::DiskIo, &[fresh, labeled]).unwrap();
        assert_eq!(decision.priority, 4);
        assert!(decision.hard_evict);
    }

    #[test]
    fn test_memory_always_hard_evicts_by_default() {
        let policy = VictimPolicy::default();
        let decision = policy
            .choose(ResourceKind::Memory, &[info("app", QosClass::Burstable)])
            .unwrap();
        assert!(decision.hard_evict);
    }

    #[test]
    fn test_protected_workloads_are_skipped() {
        let policy = VictimPolicy::default();

        let mut system = info("coredns", QosClass::BestEffort);
        system.workload.namespace = "kube-system".to_string();
        let mut daemon = info("agent", QosClass::BestEffort);
        daemon.daemon_set = true;
        let mut done = info("job", QosClass::BestEffort);
        done.terminated = true;
        let mut critical = info("critical", QosClass::BestEffort);
        critical.critical = true;

        assert!(policy
            .choose(ResourceKind::Cpu, &[system, daemon, done, critical])
            .is_none());
    }
}
