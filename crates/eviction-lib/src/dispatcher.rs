//! Eviction dispatcher
//!
//! Turns each eviction signal into exactly one workload action: a hard
//! eviction or a priority label. Failures are logged and the signal is
//! dropped; the pressure loop signals again while pressure persists.

use crate::cluster::ClusterApi;
use crate::condition::ConditionSource;
use crate::health::components;
use crate::models::{LabelAction, ResourceKind, Workload};
use crate::observability::Telemetry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// What happened to one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Evicted(Workload),
    Labeled { workload: Workload, priority: u32 },
    /// The condition source had no victim to offer
    SelectionFailed,
    /// The facade call for the chosen victim failed
    ActionFailed(Workload),
}

pub struct EvictionDispatcher {
    condition: Arc<dyn ConditionSource>,
    cluster: Arc<dyn ClusterApi>,
    telemetry: Telemetry,
}

impl EvictionDispatcher {
    pub fn new(
        condition: Arc<dyn ConditionSource>,
        cluster: Arc<dyn ClusterApi>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            condition,
            cluster,
            telemetry,
        }
    }

    /// Consume signals until the channel closes or shutdown is requested
    pub async fn run(
        &self,
        mut signals: mpsc::Receiver<ResourceKind>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting eviction dispatcher");

        loop {
            tokio::select! {
                signal = signals.recv() => {
                    match signal {
                        Some(kind) => {
                            self.dispatch(kind).await;
                        }
                        None => {
                            info!("Signal channel closed, stopping eviction dispatcher");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down eviction dispatcher");
                    break;
                }
            }
        }
    }

    /// Handle one signal with a single action attempt
    pub async fn dispatch(&self, kind: ResourceKind) -> DispatchOutcome {
        debug!(kind = %kind, "Dispatching eviction signal");

        let decision = match self.condition.choose_victim(kind).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Victim selection failed, dropping signal");
                self.telemetry.metrics.inc_dispatch_error(kind, "choose");
                self.telemetry
                    .health
                    .record_failure(components::DISPATCHER, e.to_string())
                    .await;
                return DispatchOutcome::SelectionFailed;
            }
        };

        let workload = decision.workload;
        let logger = &self.telemetry.logger;

        let (result, outcome) = if decision.hard_evict {
            let result = self.cluster.evict_workload(&workload).await;
            let error = result.as_ref().err().map(|e| e.to_string());
            logger.log_eviction(kind, &workload, error.as_deref());
            (result, "evict")
        } else {
            let result = self
                .cluster
                .label_workload(&workload, decision.priority, LabelAction::Add)
                .await;
            let error = result.as_ref().err().map(|e| e.to_string());
            logger.log_label(kind, &workload, decision.priority, error.as_deref());
            (result, "label")
        };

        self.telemetry
            .health
            .record(components::DISPATCHER, &result)
            .await;

        match result {
            Ok(()) => {
                self.telemetry.metrics.inc_dispatch_action(kind, outcome);
                if decision.hard_evict {
                    DispatchOutcome::Evicted(workload)
                } else {
                    DispatchOutcome::Labeled {
                        workload,
                        priority: decision.priority,
                    }
                }
            }
            Err(_) => {
                self.telemetry.metrics.inc_dispatch_error(kind, outcome);
                DispatchOutcome::ActionFailed(workload)
            }
        }
    }
}
