//! Node-local eviction controller
//!
//! This crate provides the core functionality for:
//! - Tainting the node per resource dimension with untaint hysteresis
//! - Turning pressure signals into workload evictions or priority labels
//! - Sampling node pressure from procfs
//! - Kubernetes access for taints, evictions and labels
//! - Health checks and observability

pub mod cluster;
pub mod condition;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pressure;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterApi, KubeClusterClient, WorkloadLister};
pub use condition::{ConditionManager, ConditionSource};
pub use controller::{Controller, ControllerBuilder, ControllerConfig};
pub use dispatcher::{DispatchOutcome, EvictionDispatcher};
pub use error::{ClusterError, ConditionError, ControllerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger, Telemetry};
pub use pressure::{PressureState, PressureStateMachine, DEFAULT_TAINT_UPDATE_PERIOD};
