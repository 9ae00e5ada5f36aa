//! Pressure state machine
//!
//! Samples the node condition once per period, keeps one taint per
//! resource dimension in step with it, and emits at most one eviction
//! signal per tick into a depth-1 channel. A busy dimension is tainted on
//! the first busy tick; it is untainted only once it has stayed available
//! for longer than the untaint grace period.

use crate::cluster::ClusterApi;
use crate::condition::ConditionSource;
use crate::error::ClusterError;
use crate::health::components;
use crate::models::{NodeTaintState, ResourceKind, TaintAction, TaintKind};
use crate::observability::Telemetry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Default interval between pressure ticks
pub const DEFAULT_TAINT_UPDATE_PERIOD: Duration = Duration::from_secs(10);

/// Taint flags plus the last instant each dimension was seen busy
#[derive(Debug, Clone, Default)]
pub struct PressureState {
    taints: NodeTaintState,
    last_busy: HashMap<TaintKind, Instant>,
}

impl PressureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State matching taints already present on the node.
    ///
    /// Every tainted dimension counts as busy at `now`, so a restart never
    /// shortens the grace period.
    pub fn reconciled(taints: NodeTaintState, now: Instant) -> Self {
        let last_busy = taints.tainted().map(|kind| (kind, now)).collect();
        Self { taints, last_busy }
    }

    pub fn taints(&self) -> NodeTaintState {
        self.taints
    }

    pub fn last_busy(&self, kind: TaintKind) -> Option<Instant> {
        self.last_busy.get(&kind).copied()
    }
}

/// Periodic evaluator owning the taint state
pub struct PressureStateMachine {
    condition: Arc<dyn ConditionSource>,
    cluster: Arc<dyn ClusterApi>,
    state: PressureState,
    period: Duration,
    /// Re-read live taints every N ticks
    resync_every: Option<u32>,
    ticks: u64,
    telemetry: Telemetry,
}

impl PressureStateMachine {
    pub fn new(
        condition: Arc<dyn ConditionSource>,
        cluster: Arc<dyn ClusterApi>,
        state: PressureState,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            condition,
            cluster,
            state,
            period: DEFAULT_TAINT_UPDATE_PERIOD,
            resync_every: None,
            ticks: 0,
            telemetry,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_resync(mut self, every: Option<u32>) -> Self {
        self.resync_every = every.filter(|n| *n > 0);
        self
    }

    pub fn state(&self) -> &PressureState {
        &self.state
    }

    /// Run until shutdown or until the dispatcher goes away.
    ///
    /// The next period starts only after the signal of the previous tick
    /// has been accepted, so a slow dispatcher stalls sampling.
    pub async fn run(
        mut self,
        evict_tx: mpsc::Sender<ResourceKind>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            period_secs = self.period.as_secs(),
            resync_every = ?self.resync_every,
            "Starting pressure loop"
        );

        loop {
            tokio::select! {
                _ = sleep(self.period) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down pressure loop");
                    break;
                }
            }

            let start = Instant::now();
            let signal = self.tick(start).await;
            self.telemetry.metrics.observe_tick(start.elapsed());

            let Some(kind) = signal else {
                continue;
            };
            self.telemetry.metrics.inc_signal(kind);

            let send_start = Instant::now();
            tokio::select! {
                result = evict_tx.send(kind) => {
                    if result.is_err() {
                        warn!(kind = %kind, "Eviction dispatcher stopped, ending pressure loop");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pressure loop while a signal was pending");
                    break;
                }
            }

            let blocked = send_start.elapsed();
            self.telemetry.metrics.observe_signal_blocked(blocked);
            if blocked >= self.period {
                self.telemetry.logger.log_signal_backpressure(kind, blocked);
            }
        }
    }

    /// Evaluate one sample taken at `now`.
    ///
    /// Returns the eviction signal for this tick, if any.
    pub async fn tick(&mut self, now: Instant) -> Option<ResourceKind> {
        self.ticks += 1;
        if self.resync_due() {
            self.resync(now).await;
        }

        let grace = self.condition.untaint_grace_period().await;
        let condition = self.condition.node_condition().await;

        if condition.all_available() && !self.state.taints.any() {
            self.telemetry.metrics.inc_fast_path();
            let result = self.cluster.clear_all_eviction_labels().await;
            if let Err(e) = &result {
                warn!(error = %e, "Failed to clear eviction labels");
                self.telemetry.metrics.inc_label_clear_errors();
            }
            self.telemetry
                .health
                .record(components::PRESSURE_LOOP, &result)
                .await;
            return None;
        }

        let mut signal = None;
        let mut last_error = None;

        for kind in TaintKind::ALL {
            let result = if condition.is_available(kind) {
                self.relieve(kind, now, grace).await
            } else {
                if signal.is_none() {
                    signal = Some(condition.busy_signal(kind));
                }
                self.press(kind, now).await
            };

            if let Err(e) = result {
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => {
                self.telemetry
                    .health
                    .record_failure(components::PRESSURE_LOOP, e.to_string())
                    .await
            }
            None => self.telemetry.health.set_healthy(components::PRESSURE_LOOP).await,
        }

        signal
    }

    /// Busy dimension: refresh the busy instant and taint on the edge
    async fn press(&mut self, kind: TaintKind, now: Instant) -> Result<(), ClusterError> {
        self.state.last_busy.insert(kind, now);
        if self.state.taints.is_tainted(kind) {
            return Ok(());
        }

        self.transition(kind, TaintAction::Taint).await
    }

    /// Available dimension: untaint once the grace period has elapsed
    async fn relieve(
        &mut self,
        kind: TaintKind,
        now: Instant,
        grace: Duration,
    ) -> Result<(), ClusterError> {
        if !self.state.taints.is_tainted(kind) {
            return Ok(());
        }

        let last_busy = *self.state.last_busy.entry(kind).or_insert(now);
        let quiet = now.saturating_duration_since(last_busy);
        if quiet <= grace {
            debug!(
                kind = %kind,
                quiet_secs = quiet.as_secs(),
                grace_secs = grace.as_secs(),
                "Holding taint until grace period elapses"
            );
            return Ok(());
        }

        self.transition(kind, TaintAction::UnTaint).await
    }

    /// Apply a taint change; the local flag moves only on success
    async fn transition(&mut self, kind: TaintKind, action: TaintAction) -> Result<(), ClusterError> {
        let result = self.cluster.set_taint_condition(kind, action).await;

        self.telemetry
            .metrics
            .record_taint(kind, action, result.is_ok());
        let error = result.as_ref().err().map(|e| e.to_string());
        self.telemetry
            .logger
            .log_taint(kind, action, error.as_deref());

        if result.is_ok() {
            self.state.taints.set(kind, action == TaintAction::Taint);
        }
        result
    }

    fn resync_due(&self) -> bool {
        match self.resync_every {
            Some(every) => self.ticks % u64::from(every) == 0,
            None => false,
        }
    }

    /// Adopt the node's live taints in place of the local flags
    async fn resync(&mut self, now: Instant) {
        let live = match self.cluster.get_taint_conditions().await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Taint resync failed, keeping local state");
                return;
            }
        };

        if live == self.state.taints {
            return;
        }

        for kind in TaintKind::ALL {
            let tainted = live.is_tainted(kind);
            if tainted && !self.state.taints.is_tainted(kind) {
                self.state.last_busy.insert(kind, now);
            }
            self.telemetry.metrics.set_tainted(kind, tainted);
        }

        info!(
            local = ?self.state.taints,
            live = ?live,
            "Taint state drifted from the node, adopting live taints"
        );
        self.state.taints = live;
    }
}
