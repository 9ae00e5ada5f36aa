//! Observability infrastructure for the eviction agent
//!
//! Provides:
//! - Prometheus metrics (tick latency, signal backpressure, taint transitions,
//!   dispatch outcomes)
//! - Structured JSON logging with tracing

use crate::health::HealthRegistry;
use crate::models::{ResourceKind, TaintAction, TaintKind, Workload};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for a single tick of the pressure loop (in seconds)
const TICK_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Histogram buckets for time spent waiting on a full signal channel
const BLOCKED_BUCKETS: &[f64] = &[0.0001, 0.001, 0.01, 0.1, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    tick_duration_seconds: Histogram,
    signal_blocked_seconds: Histogram,
    taint_transitions: IntCounterVec,
    taint_errors: IntCounterVec,
    tainted: IntGaugeVec,
    signals_emitted: IntCounterVec,
    dispatch_actions: IntCounterVec,
    dispatch_errors: IntCounterVec,
    fast_path_ticks: IntCounter,
    label_clear_errors: IntCounter,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "eviction_agent_tick_duration_seconds",
                "Time spent evaluating one pressure tick, facade calls included",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            signal_blocked_seconds: register_histogram!(
                "eviction_agent_signal_blocked_seconds",
                "Time the pressure loop waited for the dispatcher to accept a signal",
                BLOCKED_BUCKETS.to_vec()
            )
            .expect("Failed to register signal_blocked_seconds"),

            taint_transitions: register_int_counter_vec!(
                "eviction_agent_taint_transitions_total",
                "Successful taint and untaint calls",
                &["kind", "action"]
            )
            .expect("Failed to register taint_transitions_total"),

            taint_errors: register_int_counter_vec!(
                "eviction_agent_taint_errors_total",
                "Failed taint and untaint calls",
                &["kind", "action"]
            )
            .expect("Failed to register taint_errors_total"),

            tainted: register_int_gauge_vec!(
                "eviction_agent_node_tainted",
                "Whether the node is currently tainted for a resource (1 or 0)",
                &["kind"]
            )
            .expect("Failed to register node_tainted"),

            signals_emitted: register_int_counter_vec!(
                "eviction_agent_signals_emitted_total",
                "Eviction signals emitted by the pressure loop",
                &["kind"]
            )
            .expect("Failed to register signals_emitted_total"),

            dispatch_actions: register_int_counter_vec!(
                "eviction_agent_dispatch_actions_total",
                "Successful workload actions taken by the dispatcher",
                &["kind", "action"]
            )
            .expect("Failed to register dispatch_actions_total"),

            dispatch_errors: register_int_counter_vec!(
                "eviction_agent_dispatch_errors_total",
                "Dispatcher failures by stage",
                &["kind", "stage"]
            )
            .expect("Failed to register dispatch_errors_total"),

            fast_path_ticks: register_int_counter!(
                "eviction_agent_fast_path_ticks_total",
                "Ticks where every resource was available and nothing was tainted"
            )
            .expect("Failed to register fast_path_ticks_total"),

            label_clear_errors: register_int_counter!(
                "eviction_agent_label_clear_errors_total",
                "Failed attempts to clear eviction labels"
            )
            .expect("Failed to register label_clear_errors_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn observe_tick(&self, elapsed: Duration) {
        self.inner()
            .tick_duration_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_signal_blocked(&self, elapsed: Duration) {
        self.inner()
            .signal_blocked_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_taint(&self, kind: TaintKind, action: TaintAction, success: bool) {
        let labels = [kind.as_str(), action_label(action)];
        if success {
            self.inner().taint_transitions.with_label_values(&labels).inc();
            let value = matches!(action, TaintAction::Taint) as i64;
            self.inner()
                .tainted
                .with_label_values(&[kind.as_str()])
                .set(value);
        } else {
            self.inner().taint_errors.with_label_values(&labels).inc();
        }
    }

    /// Publish reconciled taint flags without counting transitions
    pub fn set_tainted(&self, kind: TaintKind, tainted: bool) {
        self.inner()
            .tainted
            .with_label_values(&[kind.as_str()])
            .set(tainted as i64);
    }

    pub fn inc_signal(&self, kind: ResourceKind) {
        self.inner()
            .signals_emitted
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn inc_dispatch_action(&self, kind: ResourceKind, action: &str) {
        self.inner()
            .dispatch_actions
            .with_label_values(&[kind.as_str(), action])
            .inc();
    }

    pub fn inc_dispatch_error(&self, kind: ResourceKind, stage: &str) {
        self.inner()
            .dispatch_errors
            .with_label_values(&[kind.as_str(), stage])
            .inc();
    }

    pub fn inc_fast_path(&self) {
        self.inner().fast_path_ticks.inc();
    }

    pub fn inc_label_clear_errors(&self) {
        self.inner().label_clear_errors.inc();
    }
}

fn action_label(action: TaintAction) -> &'static str {
    match action {
        TaintAction::Taint => "taint",
        TaintAction::UnTaint => "untaint",
    }
}

/// Structured logger for controller events
///
/// Every record carries an `event` field and the node name so that
/// log pipelines can aggregate across the fleet.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            "Eviction agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Eviction agent shutting down"
        );
    }

    /// Log the outcome of a taint or untaint call
    pub fn log_taint(&self, kind: TaintKind, action: TaintAction, error: Option<&str>) {
        let event = match action {
            TaintAction::Taint => "node_tainted",
            TaintAction::UnTaint => "node_untainted",
        };

        match error {
            None => info!(
                event = event,
                node = %self.node_name,
                kind = %kind,
                "Node taint updated"
            ),
            Some(error) => warn!(
                event = event,
                node = %self.node_name,
                kind = %kind,
                error = %error,
                "Node taint update failed, retrying next tick"
            ),
        }
    }

    pub fn log_signal_backpressure(&self, kind: ResourceKind, blocked: Duration) {
        warn!(
            event = "signal_backpressure",
            node = %self.node_name,
            kind = %kind,
            blocked_ms = blocked.as_millis() as u64,
            "Pressure loop stalled waiting for the dispatcher"
        );
    }

    pub fn log_eviction(&self, kind: ResourceKind, workload: &Workload, error: Option<&str>) {
        match error {
            None => info!(
                event = "workload_evicted",
                node = %self.node_name,
                kind = %kind,
                namespace = %workload.namespace,
                pod_name = %workload.name,
                "Evicted workload to relieve pressure"
            ),
            Some(error) => warn!(
                event = "workload_evicted",
                node = %self.node_name,
                kind = %kind,
                namespace = %workload.namespace,
                pod_name = %workload.name,
                error = %error,
                "Failed to evict workload"
            ),
        }
    }

    pub fn log_label(
        &self,
        kind: ResourceKind,
        workload: &Workload,
        priority: u32,
        error: Option<&str>,
    ) {
        match error {
            None => info!(
                event = "workload_labeled",
                node = %self.node_name,
                kind = %kind,
                namespace = %workload.namespace,
                pod_name = %workload.name,
                priority = priority,
                "Labeled workload as eviction candidate"
            ),
            Some(error) => warn!(
                event = "workload_labeled",
                node = %self.node_name,
                kind = %kind,
                namespace = %workload.namespace,
                pod_name = %workload.name,
                priority = priority,
                error = %error,
                "Failed to label workload"
            ),
        }
    }
}

/// Metrics, logger and health registry shared by the controller tasks
#[derive(Clone)]
pub struct Telemetry {
    pub metrics: ControllerMetrics,
    pub logger: StructuredLogger,
    pub health: HealthRegistry,
}

impl Telemetry {
    pub fn new(node_name: impl Into<String>, health: HealthRegistry) -> Self {
        Self {
            metrics: ControllerMetrics::new(),
            logger: StructuredLogger::new(node_name),
            health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_metrics_handles_share_registry() {
        let metrics = ControllerMetrics::new();
        let other = metrics.clone();

        metrics.observe_tick(Duration::from_millis(3));
        other.observe_signal_blocked(Duration::from_secs(12));
        metrics.record_taint(TaintKind::Cpu, TaintAction::Taint, true);
        other.record_taint(TaintKind::Memory, TaintAction::UnTaint, false);
        metrics.inc_signal(ResourceKind::NetworkTx);
        metrics.inc_dispatch_action(ResourceKind::Cpu, "label");
        metrics.inc_dispatch_error(ResourceKind::Cpu, "choose");
        metrics.inc_fast_path();

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "eviction_agent_node_tainted"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
