//! Production condition source
//!
//! Samples procfs in a background loop and publishes the latest
//! [`NodeCondition`] snapshot. The config file is re-read whenever its
//! modification time changes, so the untaint grace period, thresholds and
//! victim policy can be changed without a restart.

use super::config::ConditionConfig;
use super::sampler::NodeSampler;
use super::ConditionSource;
use crate::cluster::WorkloadLister;
use crate::error::ConditionError;
use crate::health::{components, HealthRegistry};
use crate::models::{NodeCondition, ResourceKind, VictimDecision};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Condition source backed by procfs sampling and a workload lister
pub struct ConditionManager {
    condition: Arc<RwLock<NodeCondition>>,
    config: Arc<RwLock<ConditionConfig>>,
    config_path: Option<PathBuf>,
    lister: Arc<dyn WorkloadLister>,
    health: HealthRegistry,
    started: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConditionManager {
    /// Create a manager with a fixed configuration
    pub fn new(config: ConditionConfig, lister: Arc<dyn WorkloadLister>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            condition: Arc::new(RwLock::new(NodeCondition::default())),
            config: Arc::new(RwLock::new(config)),
            config_path: None,
            lister,
            health: HealthRegistry::new(),
            started: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Create a manager that loads and watches `path`
    pub fn from_file(
        path: impl Into<PathBuf>,
        lister: Arc<dyn WorkloadLister>,
    ) -> Result<Self, ConditionError> {
        let path = path.into();
        let config = ConditionConfig::load(&path)?;
        let mut manager = Self::new(config, lister);
        manager.config_path = Some(path);
        Ok(manager)
    }

    /// Report sampling health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Current configuration snapshot
    pub async fn config(&self) -> ConditionConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration; takes effect on the next sample
    pub async fn update_config(&self, config: ConditionConfig) {
        *self.config.write().await = config;
    }

    /// Stop the background sampling loop
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[async_trait]
impl ConditionSource for ConditionManager {
    async fn start(&self) -> Result<(), ConditionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConditionError::AlreadyStarted);
        }

        let config = self.config.read().await.clone();
        let mut sampler = NodeSampler::new(&config.proc_root);

        // The first sample must succeed: without it there is no condition feed
        let usage = match sampler.sample(Instant::now()).await {
            Ok(usage) => usage,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                self.health
                    .set_unhealthy(components::CONDITION_SOURCE, e.to_string())
                    .await;
                return Err(e);
            }
        };
        *self.condition.write().await = config.thresholds.evaluate(&usage);
        self.health.register(components::CONDITION_SOURCE).await;

        let config_mtime = match &self.config_path {
            Some(path) => modified_time(path).await,
            None => None,
        };

        let sampling_loop = SamplingLoop {
            sampler,
            condition: Arc::clone(&self.condition),
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            config_mtime,
            health: self.health.clone(),
        };
        tokio::spawn(sampling_loop.run(self.shutdown_tx.subscribe()));

        info!(
            proc_root = %config.proc_root.display(),
            interval_secs = config.sample_interval().as_secs(),
            "Condition manager started"
        );
        Ok(())
    }

    async fn node_condition(&self) -> NodeCondition {
        *self.condition.read().await
    }

    async fn untaint_grace_period(&self) -> Duration {
        self.config.read().await.untaint_grace_period()
    }

    async fn choose_victim(&self, kind: ResourceKind) -> Result<VictimDecision, ConditionError> {
        let workloads = self.lister.list_workloads().await?;
        let policy = self.config.read().await.victim.clone();

        debug!(kind = %kind, candidates = workloads.len(), "Choosing eviction victim");
        policy
            .choose(kind, &workloads)
            .ok_or(ConditionError::NoVictim(kind))
    }
}

/// Background loop refreshing the condition snapshot
struct SamplingLoop {
    sampler: NodeSampler,
    condition: Arc<RwLock<NodeCondition>>,
    config: Arc<RwLock<ConditionConfig>>,
    config_path: Option<PathBuf>,
    config_mtime: Option<SystemTime>,
    health: HealthRegistry,
}

impl SamplingLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let interval = self.config.read().await.sample_interval();

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down condition sampling loop");
                    break;
                }
            }

            self.reload_config_if_changed().await;
            self.sample_once().await;
        }
    }

    async fn sample_once(&mut self) {
        match self.sampler.sample(Instant::now()).await {
            Ok(usage) => {
                let condition = self.config.read().await.thresholds.evaluate(&usage);
                let previous = std::mem::replace(&mut *self.condition.write().await, condition);

                if previous != condition {
                    info!(
                        cpu_busy_percent = usage.cpu_busy_percent,
                        memory_available_percent = usage.memory_available_percent,
                        disk_io_busy_percent = usage.disk_io_busy_percent,
                        network_rx_bytes_per_sec = usage.network_rx_bytes_per_sec,
                        network_tx_bytes_per_sec = usage.network_tx_bytes_per_sec,
                        condition = ?condition,
                        "Node condition changed"
                    );
                }
                self.health.set_healthy(components::CONDITION_SOURCE).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to sample node condition, keeping last snapshot");
                self.health
                    .record_failure(components::CONDITION_SOURCE, e.to_string())
                    .await;
            }
        }
    }

    async fn reload_config_if_changed(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };

        let mtime = modified_time(path).await;
        if mtime == self.config_mtime {
            return;
        }
        self.config_mtime = mtime;

        // The config crate reads the file synchronously
        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || ConditionConfig::load(&load_path)).await;

        match loaded {
            Ok(Ok(config)) => {
                if config.proc_root != self.sampler.proc_root() {
                    self.sampler = NodeSampler::new(&config.proc_root);
                }
                info!(
                    path = %path.display(),
                    untaint_grace_period_secs = config.untaint_grace_period_secs,
                    "Reloaded condition configuration"
                );
                *self.config.write().await = config;
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Invalid configuration, keeping previous");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Configuration reload task failed");
            }
        }
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
}
