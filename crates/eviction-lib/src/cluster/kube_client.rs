//! Kubernetes implementation of the cluster API facade
//!
//! Taints are written with a read-modify-merge-patch of `spec.taints`. The
//! agent does not use optimistic concurrency: taints owned by other
//! controllers are preserved, but a concurrent write between our read and
//! patch is last-writer-wins.

use super::quantity::{parse_cpu_millicores, parse_memory_bytes};
use super::taints::{apply_taint_action, taint_state_from_taints, DEFAULT_TAINT_KEY_PREFIX};
use super::{ClusterApi, QosClass, WorkloadInfo, WorkloadLister};
use crate::error::ClusterError;
use crate::models::{LabelAction, NodeTaintState, TaintAction, TaintKind, Workload};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Taint};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

/// Label key suffix carrying the eviction priority of a workload
pub const PRIORITY_LABEL_SUFFIX: &str = "priority";

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Cluster facade backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    node_name: String,
    key_prefix: String,
}

impl KubeClusterClient {
    /// Create a facade acting on `node_name`
    pub fn new(client: Client, node_name: impl Into<String>) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            key_prefix: DEFAULT_TAINT_KEY_PREFIX.to_string(),
        }
    }

    /// Override the prefix used for taint and label keys
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    fn priority_label(&self) -> String {
        format!("{}/{}", self.key_prefix, PRIORITY_LABEL_SUFFIX)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn node_taints(&self) -> Result<Vec<Taint>, ClusterError> {
        let node = self.nodes().get(&self.node_name).await?;
        let spec = node
            .spec
            .ok_or_else(|| ClusterError::MissingNodeSpec(self.node_name.clone()))?;
        Ok(spec.taints.unwrap_or_default())
    }

    async fn pods_on_node(&self, label_selector: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        let mut params =
            ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let pods: Api<Pod> = Api::all(self.client.clone());
        Ok(pods.list(&params).await?.items)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterClient {
    async fn get_taint_conditions(&self) -> Result<NodeTaintState, ClusterError> {
        let taints = self.node_taints().await?;
        Ok(taint_state_from_taints(&self.key_prefix, &taints))
    }

    async fn set_taint_condition(
        &self,
        kind: TaintKind,
        action: TaintAction,
    ) -> Result<(), ClusterError> {
        let taints = self.node_taints().await?;

        let Some(updated) = apply_taint_action(&self.key_prefix, &taints, kind, action) else {
            debug!(
                node = %self.node_name,
                kind = %kind,
                action = %action,
                "Node taints already up to date"
            );
            return Ok(());
        };

        let patch = json!({ "spec": { "taints": updated } });
        self.nodes()
            .patch(&self.node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        info!(node = %self.node_name, kind = %kind, action = %action, "Patched node taints");
        Ok(())
    }

    async fn evict_workload(&self, workload: &Workload) -> Result<(), ClusterError> {
        self.pods(&workload.namespace)
            .evict(&workload.name, &EvictParams::default())
            .await?;
        Ok(())
    }

    async fn label_workload(
        &self,
        workload: &Workload,
        priority: u32,
        action: LabelAction,
    ) -> Result<(), ClusterError> {
        let value = match action {
            LabelAction::Add => json!(priority.to_string()),
            LabelAction::Remove => serde_json::Value::Null,
        };
        let mut labels = serde_json::Map::new();
        labels.insert(self.priority_label(), value);
        let patch = json!({ "metadata": { "labels": labels } });

        self.pods(&workload.namespace)
            .patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn clear_all_eviction_labels(&self) -> Result<(), ClusterError> {
        let label = self.priority_label();
        let pods = self.pods_on_node(Some(&label)).await?;

        let mut first_error = None;
        let mut cleared = 0usize;

        for pod in &pods {
            let Some(workload) = workload_from_pod(pod) else {
                continue;
            };

            match self.label_workload(&workload, 0, LabelAction::Remove).await {
                Ok(()) => cleared += 1,
                Err(e) => {
                    warn!(workload = %workload, error = %e, "Failed to clear eviction label");
                    first_error.get_or_insert(e);
                }
            }
        }

        if cleared > 0 {
            debug!(node = %self.node_name, cleared, "Cleared eviction labels");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkloadLister for KubeClusterClient {
    async fn list_workloads(&self) -> Result<Vec<WorkloadInfo>, ClusterError> {
        let label = self.priority_label();
        let pods = self.pods_on_node(None).await?;

        Ok(pods
            .iter()
            .filter_map(|pod| workload_info_from_pod(pod, &label))
            .collect())
    }
}

fn workload_from_pod(pod: &Pod) -> Option<Workload> {
    let meta = &pod.metadata;
    Some(Workload {
        name: meta.name.clone()?,
        namespace: meta.namespace.clone()?,
        uid: meta.uid.clone(),
    })
}

/// Extract ranking facts from a pod; pods without a name or namespace are skipped
pub fn workload_info_from_pod(pod: &Pod, priority_label: &str) -> Option<WorkloadInfo> {
    let workload = workload_from_pod(pod)?;
    let meta = &pod.metadata;

    let eviction_priority = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(priority_label))
        .and_then(|value| value.parse::<u32>().ok());

    let daemon_set = meta
        .owner_references
        .as_ref()
        .map(|owners| owners.iter().any(|owner| owner.kind == "DaemonSet"))
        .unwrap_or(false);

    let mirror = meta
        .annotations
        .as_ref()
        .map(|annotations| annotations.contains_key(MIRROR_POD_ANNOTATION))
        .unwrap_or(false);

    let spec = pod.spec.as_ref();
    let critical = spec
        .and_then(|spec| spec.priority_class_name.as_deref())
        .map(|class| class.starts_with("system-"))
        .unwrap_or(false);

    let mut cpu_request_millicores = 0;
    let mut memory_request_bytes = 0;
    for container in spec.map(|spec| spec.containers.as_slice()).unwrap_or_default() {
        let Some(requests) = container
            .resources
            .as_ref()
            .and_then(|resources| resources.requests.as_ref())
        else {
            continue;
        };

        cpu_request_millicores += requests
            .get("cpu")
            .and_then(|q| parse_cpu_millicores(&q.0))
            .unwrap_or(0);
        memory_request_bytes += requests
            .get("memory")
            .and_then(|q| parse_memory_bytes(&q.0))
            .unwrap_or(0);
    }

    let status = pod.status.as_ref();
    let qos = status
        .and_then(|status| status.qos_class.as_deref())
        .map(QosClass::parse)
        .unwrap_or(QosClass::Burstable);
    let terminated = status
        .and_then(|status| status.phase.as_deref())
        .map(|phase| phase == "Succeeded" || phase == "Failed")
        .unwrap_or(false);
    let started_at = status
        .and_then(|status| status.start_time.as_ref())
        .map(|time| time.0);

    Some(WorkloadInfo {
        workload,
        qos,
        cpu_request_millicores,
        memory_request_bytes,
        eviction_priority,
        started_at,
        daemon_set,
        mirror,
        critical,
        terminated,
    })
}
