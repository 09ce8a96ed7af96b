//! Cluster gateway
//!
//! The seam between provisioning logic and the outside world: namespace and
//! workload operations against the Kubernetes API, chart operations through
//! the Helm CLI. Every implementation normalizes its failures into
//! [`ClusterError`].

pub mod helm;
pub mod kubernetes;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use crate::error::ClusterError;
pub use helm::HelmCli;
pub use kubernetes::KubeGateway;

/// Result of a namespace create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceOutcome {
    Created,
    AlreadyExists,
}

/// Result of a namespace delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion accepted; the namespace may linger while it terminates.
    Initiated,
    NotFound,
}

/// Result of a chart uninstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed,
    AlreadyAbsent,
}

/// Kind of workload inspected by the status evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

/// Replica counts of one workload in a store namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub kind: WorkloadKind,
    pub name: String,
    /// Desired replicas; `None` when the object leaves it to the default (1).
    pub desired_replicas: Option<i32>,
    pub ready_replicas: i32,
}

/// A chart install request for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRelease {
    pub store_id: String,
    pub release_name: String,
    pub namespace: String,
    pub chart: PathBuf,
    pub values: Vec<(String, String)>,
    /// Passed to helm's own `--timeout`.
    pub timeout: Duration,
}

/// Operations the provisioner needs from the cluster.
///
/// Calls are not individually bounded; callers race them against a deadline.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Create the store namespace. An existing namespace is not an error.
    async fn create_namespace(
        &self,
        store_id: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<NamespaceOutcome, ClusterError>;

    /// Request deletion of the store namespace. A missing namespace is not an error.
    async fn delete_namespace(&self, store_id: &str) -> Result<DeleteOutcome, ClusterError>;

    /// Deployments and StatefulSets in the store namespace. Empty is valid.
    async fn list_workloads(&self, store_id: &str) -> Result<Vec<WorkloadStatus>, ClusterError>;

    /// Decoded string values of a secret in the store namespace.
    async fn read_secret(
        &self,
        store_id: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    /// Install or upgrade the release; idempotent.
    async fn install_or_upgrade_chart(&self, release: &ChartRelease) -> Result<(), ClusterError>;

    /// Remove the store's release. A missing release is not an error.
    async fn uninstall_chart(&self, store_id: &str) -> Result<UninstallOutcome, ClusterError>;

    /// Whether the store's release is currently installed.
    async fn release_exists(&self, store_id: &str) -> Result<bool, ClusterError>;

    /// Round-trip to the API server, returning its version string.
    async fn check_connectivity(&self) -> Result<String, ClusterError>;
}
