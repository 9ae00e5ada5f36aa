//! Error types for the eviction agent

use crate::models::ResourceKind;
use thiserror::Error;

/// Failures from the cluster API facade
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Node {0} has no spec")]
    MissingNodeSpec(String),

    #[error("Workload {0} has no namespace")]
    MissingNamespace(String),

    #[error("{0}")]
    Other(String),
}

/// Failures from the condition source
#[derive(Error, Debug)]
pub enum ConditionError {
    #[error("No eviction candidate for {0}")]
    NoVictim(ResourceKind),

    #[error("Failed to list workloads: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {file}: {reason}")]
    Parse { file: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Condition source already started")]
    AlreadyStarted,
}

/// Fatal controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Condition source failed to start: {0}")]
    ConditionStart(#[source] ConditionError),

    #[error("{0} is required")]
    MissingComponent(&'static str),
}
