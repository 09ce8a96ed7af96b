//! Status evaluator
//!
//! Pure mapping from the workloads observed in a store namespace to a
//! readiness verdict.

use crate::cluster::WorkloadStatus;
use crate::error::ClusterError;

/// Readiness verdict derived from cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Provisioning,
    Ready,
    /// The cluster could not be queried.
    Unknown,
}

/// Every workload has at least its desired replicas ready.
///
/// An empty namespace is still `Provisioning`: nothing has been installed yet.
/// Desired replicas default to 1 when unset.
pub fn evaluate(workloads: &[WorkloadStatus]) -> ClusterStatus {
    if workloads.is_empty() {
        return ClusterStatus::Provisioning;
    }

    let all_ready = workloads
        .iter()
        .all(|w| w.ready_replicas >= w.desired_replicas.unwrap_or(1));

    if all_ready {
        ClusterStatus::Ready
    } else {
        ClusterStatus::Provisioning
    }
}

/// Like [`evaluate`], mapping a failed workload query to `Unknown`.
pub fn evaluate_query(result: &Result<Vec<WorkloadStatus>, ClusterError>) -> ClusterStatus {
    match result {
        Ok(workloads) => evaluate(workloads),
        Err(_) => ClusterStatus::Unknown,
    }
}
