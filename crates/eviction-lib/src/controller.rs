//! Controller wiring
//!
//! Owns startup ordering: the condition source is started first (fatal on
//! failure), the node's current taints are read back, the pressure loop is
//! spawned, and the dispatcher runs in the foreground until shutdown.

use crate::cluster::ClusterApi;
use crate::condition::ConditionSource;
use crate::dispatcher::EvictionDispatcher;
use crate::error::ControllerError;
use crate::health::components;
use crate::models::TaintKind;
use crate::observability::Telemetry;
use crate::pressure::{PressureState, PressureStateMachine, DEFAULT_TAINT_UPDATE_PERIOD};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Depth of the signal channel between the pressure loop and the dispatcher
const SIGNAL_QUEUE_DEPTH: usize = 1;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between pressure ticks
    pub taint_update_period: Duration,
    /// Re-read live taints every N ticks; `None` disables
    pub taint_resync_ticks: Option<u32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            taint_update_period: DEFAULT_TAINT_UPDATE_PERIOD,
            taint_resync_ticks: None,
        }
    }
}

pub struct Controller {
    condition: Arc<dyn ConditionSource>,
    cluster: Arc<dyn ClusterApi>,
    config: ControllerConfig,
    telemetry: Telemetry,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Run until `shutdown` fires.
    ///
    /// Only a condition source startup failure is returned; steady-state
    /// errors are logged by the loops and never end the run.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), ControllerError> {
        let health = self.telemetry.health.clone();
        health.register(components::PRESSURE_LOOP).await;
        health.register(components::DISPATCHER).await;

        if let Err(e) = self.condition.start().await {
            error!(error = %e, "Condition source failed to start");
            health
                .set_unhealthy(components::CONDITION_SOURCE, e.to_string())
                .await;
            return Err(ControllerError::ConditionStart(e));
        }
        info!("Condition source started");

        let state = self.reconcile_taints().await;

        let (evict_tx, evict_rx) = mpsc::channel(SIGNAL_QUEUE_DEPTH);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let machine = PressureStateMachine::new(
            self.condition.clone(),
            self.cluster.clone(),
            state,
            self.telemetry.clone(),
        )
        .with_period(self.config.taint_update_period)
        .with_resync(self.config.taint_resync_ticks);
        let pressure = tokio::spawn(machine.run(evict_tx, stop_rx));

        health.set_ready(true).await;

        let dispatcher = EvictionDispatcher::new(
            self.condition.clone(),
            self.cluster.clone(),
            self.telemetry.clone(),
        );
        dispatcher.run(evict_rx, shutdown).await;

        health.set_ready(false).await;
        let _ = stop_tx.send(());
        if let Err(e) = pressure.await {
            warn!(error = %e, "Pressure loop task failed");
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Seed the taint state from the node so a restart does not re-taint
    async fn reconcile_taints(&self) -> PressureState {
        let now = Instant::now();
        match self.cluster.get_taint_conditions().await {
            Ok(live) => {
                for kind in TaintKind::ALL {
                    self.telemetry
                        .metrics
                        .set_tainted(kind, live.is_tainted(kind));
                }
                let tainted: Vec<_> = live.tainted().map(|kind| kind.as_str()).collect();
                info!(tainted = ?tainted, "Reconciled taints from node");
                PressureState::reconciled(live, now)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read node taints, starting untainted");
                PressureState::new()
            }
        }
    }
}

/// Builder for [`Controller`]
pub struct ControllerBuilder {
    condition: Option<Arc<dyn ConditionSource>>,
    cluster: Option<Arc<dyn ClusterApi>>,
    telemetry: Option<Telemetry>,
    config: ControllerConfig,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            condition: None,
            cluster: None,
            telemetry: None,
            config: ControllerConfig::default(),
        }
    }

    pub fn condition(mut self, condition: Arc<dyn ConditionSource>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn taint_update_period(mut self, period: Duration) -> Self {
        self.config.taint_update_period = period;
        self
    }

    pub fn build(self) -> Result<Controller, ControllerError> {
        let condition = self
            .condition
            .ok_or(ControllerError::MissingComponent("condition source"))?;
        let cluster = self
            .cluster
            .ok_or(ControllerError::MissingComponent("cluster client"))?;
        let telemetry = self
            .telemetry
            .ok_or(ControllerError::MissingComponent("telemetry"))?;

        Ok(Controller {
            condition,
            cluster,
            config: self.config,
            telemetry,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
