//! Node condition source
//!
//! This module provides:
//! - The [`ConditionSource`] trait consumed by the controller
//! - A `/proc` based sampler turning host counters into availability flags
//! - Victim selection for eviction signals
//! - [`ConditionManager`], the production condition source with live
//!   config reload

mod config;
mod manager;
mod sampler;
mod victim;

pub use self::config::{ConditionConfig, ENV_PREFIX};
pub use manager::ConditionManager;
pub use sampler::{ConditionThresholds, NodeSampler, NodeUsage};
pub use victim::VictimPolicy;

use crate::error::ConditionError;
use crate::models::{NodeCondition, ResourceKind, VictimDecision};
use async_trait::async_trait;
use std::time::Duration;

/// Supplies node availability, the untaint grace period and victims
#[async_trait]
pub trait ConditionSource: Send + Sync {
    /// Start background sampling. Called once before anything else.
    async fn start(&self) -> Result<(), ConditionError>;

    /// Best-known availability snapshot
    async fn node_condition(&self) -> NodeCondition;

    /// Minimum sustained-good time after the last busy sample before untaint
    async fn untaint_grace_period(&self) -> Duration;

    /// Pick the workload to act on for a pressure signal
    async fn choose_victim(&self, kind: ResourceKind) -> Result<VictimDecision, ConditionError>;
}
