//! Node taint bookkeeping
//!
//! Pure helpers mapping between the Kubernetes taint list on a node and
//! [`NodeTaintState`]. Only taints under the agent's key prefix are touched.

use crate::models::{NodeTaintState, TaintAction, TaintKind};
use k8s_openapi::api::core::v1::Taint;

/// Default prefix for taint and label keys owned by the agent
pub const DEFAULT_TAINT_KEY_PREFIX: &str = "eviction-agent";

/// Effect applied to resource pressure taints
pub const TAINT_EFFECT: &str = "NoSchedule";

/// Taint key for a resource dimension, e.g. `eviction-agent/CPUBusy`
pub fn taint_key(prefix: &str, kind: TaintKind) -> String {
    format!("{}/{}", prefix, kind.as_str())
}

/// Build the taint state from the node's current taint list
pub fn taint_state_from_taints(prefix: &str, taints: &[Taint]) -> NodeTaintState {
    let mut state = NodeTaintState::new();

    for taint in taints {
        let kind = taint
            .key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(TaintKind::from_str_opt);

        if let Some(kind) = kind {
            state.set(kind, true);
        }
    }

    state
}

/// Compute the new taint list for `action`.
///
/// Returns `None` when the list already reflects the requested state, so the
/// caller can skip the write.
pub fn apply_taint_action(
    prefix: &str,
    taints: &[Taint],
    kind: TaintKind,
    action: TaintAction,
) -> Option<Vec<Taint>> {
    let key = taint_key(prefix, kind);
    let present = taints.iter().any(|taint| taint.key == key);

    match action {
        TaintAction::Taint if present => None,
        TaintAction::Taint => {
            let mut updated = taints.to_vec();
            updated.push(Taint {
                key,
                effect: TAINT_EFFECT.to_string(),
                value: Some("true".to_string()),
                ..Default::default()
            });
            Some(updated)
        }
        TaintAction::UnTaint if !present => None,
        TaintAction::UnTaint => Some(
            taints
                .iter()
                .filter(|taint| taint.key != key)
                .cloned()
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_taint() -> Taint {
        Taint {
            key: "node.kubernetes.io/unschedulable".to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_taint_key_format() {
        assert_eq!(
            taint_key(DEFAULT_TAINT_KEY_PREFIX, TaintKind::NetworkIo),
            "eviction-agent/NetworkIOBusy"
        );
    }

    #[test]
    fn test_state_ignores_foreign_taints() {
        let taints = vec![
            foreign_taint(),
            Taint {
                key: "eviction-agent/MemoryBusy".to_string(),
                effect: TAINT_EFFECT.to_string(),
                ..Default::default()
            },
            Taint {
                key: "other-agent/CPUBusy".to_string(),
                effect: TAINT_EFFECT.to_string(),
                ..Default::default()
            },
        ];

        let state = taint_state_from_taints(DEFAULT_TAINT_KEY_PREFIX, &taints);
        assert!(state.is_tainted(TaintKind::Memory));
        assert!(!state.is_tainted(TaintKind::Cpu));
        assert_eq!(state.tainted().count(), 1);
    }

    #[test]
    fn test_apply_taint_adds_once() {
        let taints = vec![foreign_taint()];

        let updated = apply_taint_action(
            DEFAULT_TAINT_KEY_PREFIX,
            &taints,
            TaintKind::Cpu,
            TaintAction::Taint,
        )
        .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].key, "eviction-agent/CPUBusy");
        assert_eq!(updated[1].effect, TAINT_EFFECT);

        let again = apply_taint_action(
            DEFAULT_TAINT_KEY_PREFIX,
            &updated,
            TaintKind::Cpu,
            TaintAction::Taint,
        );
        assert!(again.is_none());
    }

    #[test]
    fn test_untaint_keeps_foreign_taints() {
        let taints = vec![
            foreign_taint(),
            Taint {
                key: "eviction-agent/DiskIOBusy".to_string(),
                effect: TAINT_EFFECT.to_string(),
                ..Default::default()
            },
        ];

        let updated = apply_taint_action(
            DEFAULT_TAINT_KEY_PREFIX,
            &taints,
            TaintKind::DiskIo,
            TaintAction::UnTaint,
        )
        .unwrap();
        assert_eq!(updated, vec![foreign_taint()]);

        let noop = apply_taint_action(
            DEFAULT_TAINT_KEY_PREFIX,
            &updated,
            TaintKind::DiskIo,
            TaintAction::UnTaint,
        );
        assert!(noop.is_none());
    }
}
