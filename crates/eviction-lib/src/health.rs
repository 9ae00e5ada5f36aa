//! Health tracking for the eviction agent
//!
//! Each long-running component reports the outcome of its last operation.
//! Steady-state failures never stop the agent, so they surface here as
//! `Degraded` instead. Only a component that cannot run at all is
//! `Unhealthy`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

/// Last reported health of a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures reported since the last success
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None, 0)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()), 0)
    }
}

/// Aggregate health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CONDITION_SOURCE: &str = "condition_source";
    pub const PRESSURE_LOOP: &str = "pressure_loop";
    pub const DISPATCHER: &str = "dispatcher";
}

/// Shared registry of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_healthy(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Record a failure; the component stays operational but degraded
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map(|health| health.consecutive_failures)
            .unwrap_or(0)
            .saturating_add(1);
        components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Degraded, Some(message.into()), failures),
        );
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::unhealthy(message));
    }

    /// Report the outcome of one operation
    pub async fn record<T, E: std::fmt::Display>(&self, name: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.set_healthy(name).await,
            Err(e) => self.record_failure(name, e.to_string()).await,
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the controller is running and nothing is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Controller not yet started".to_string())
        } else if !health.status.is_operational() {
            let failed: Vec<_> = health
                .components
                .iter()
                .filter(|(_, h)| !h.status.is_operational())
                .map(|(name, _)| name.as_str())
                .collect();
            Some(format!("Unhealthy components: {}", failed.join(", ")))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_failures_accumulate_until_success() {
        let registry = HealthRegistry::new();
        registry.register(components::PRESSURE_LOOP).await;

        registry
            .record_failure(components::PRESSURE_LOOP, "taint failed")
            .await;
        registry
            .record_failure(components::PRESSURE_LOOP, "taint failed again")
            .await;

        let health = registry.health().await;
        let loop_health = &health.components[components::PRESSURE_LOOP];
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(loop_health.consecutive_failures, 2);
        assert_eq!(loop_health.message.as_deref(), Some("taint failed again"));

        let ok: Result<(), String> = Ok(());
        registry.record(components::PRESSURE_LOOP, &ok).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(
            health.components[components::PRESSURE_LOOP].consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn test_unhealthy_dominates_degraded() {
        let registry = HealthRegistry::new();
        registry
            .record_failure(components::DISPATCHER, "label failed")
            .await;
        registry
            .set_unhealthy(components::CONDITION_SOURCE, "no /proc")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::CONDITION_SOURCE).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .record_failure(components::CONDITION_SOURCE, "sample failed")
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::CONDITION_SOURCE, "stopped")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains(components::CONDITION_SOURCE));
    }
}
