//! Kubernetes-backed [`ClusterGateway`].
//!
//! Namespace, workload and secret operations go through a `kube::Client`;
//! chart operations are delegated to [`HelmCli`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use super::{
    ChartRelease, ClusterError, ClusterGateway, DeleteOutcome, HelmCli, NamespaceOutcome,
    UninstallOutcome, WorkloadKind, WorkloadStatus,
};
use crate::models::store::namespace_for;

/// Gateway over a live cluster.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    helm: HelmCli,
}

impl KubeGateway {
    pub fn new(client: Client, helm: HelmCli) -> Self {
        Self { client, helm }
    }

    /// Build a client from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(helm: HelmCli) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::unknown(format!("failed to build kube client: {e}")))?;
        Ok(Self::new(client, helm))
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn create_namespace(
        &self,
        store_id: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<NamespaceOutcome, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace_for(store_id)),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        match api.create(&PostParams::default(), &namespace).await {
            Ok(created) => {
                tracing::debug!(namespace = %created.name_any(), "Namespace created");
                Ok(NamespaceOutcome::Created)
            }
            Err(err) => match classify_kube_error(err) {
                ClusterError::AlreadyExists(_) => Ok(NamespaceOutcome::AlreadyExists),
                other => Err(other),
            },
        }
    }

    async fn delete_namespace(&self, store_id: &str) -> Result<DeleteOutcome, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        match api
            .delete(&namespace_for(store_id), &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Initiated),
            Err(err) => match classify_kube_error(err) {
                ClusterError::NotFound(_) => Ok(DeleteOutcome::NotFound),
                other => Err(other),
            },
        }
    }

    async fn list_workloads(&self, store_id: &str) -> Result<Vec<WorkloadStatus>, ClusterError> {
        let namespace = namespace_for(store_id);
        let params = ListParams::default();

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);

        let mut workloads = Vec::new();

        for deployment in deployments.list(&params).await.map_err(classify_kube_error)? {
            workloads.push(WorkloadStatus {
                kind: WorkloadKind::Deployment,
                name: deployment.name_any(),
                desired_replicas: deployment.spec.as_ref().and_then(|s| s.replicas),
                ready_replicas: deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0),
            });
        }

        for statefulset in statefulsets.list(&params).await.map_err(classify_kube_error)? {
            workloads.push(WorkloadStatus {
                kind: WorkloadKind::StatefulSet,
                name: statefulset.name_any(),
                desired_replicas: statefulset.spec.as_ref().and_then(|s| s.replicas),
                ready_replicas: statefulset
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0),
            });
        }

        Ok(workloads)
    }

    async fn read_secret(
        &self,
        store_id: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace_for(store_id));

        let Some(secret) = api.get_opt(name).await.map_err(classify_kube_error)? else {
            return Ok(None);
        };

        let mut values = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            match String::from_utf8(bytes.0) {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(_) => {
                    tracing::warn!(secret = %name, key = %key, "Skipping non UTF-8 secret value");
                }
            }
        }
        for (key, value) in secret.string_data.unwrap_or_default() {
            values.entry(key).or_insert(value);
        }

        Ok(Some(values))
    }

    async fn install_or_upgrade_chart(&self, release: &ChartRelease) -> Result<(), ClusterError> {
        self.helm.upgrade_install(release).await
    }

    async fn uninstall_chart(&self, store_id: &str) -> Result<UninstallOutcome, ClusterError> {
        let name = namespace_for(store_id);
        self.helm.uninstall(&name, &name).await
    }

    async fn release_exists(&self, store_id: &str) -> Result<bool, ClusterError> {
        let name = namespace_for(store_id);
        self.helm.status(&name, &name).await
    }

    async fn check_connectivity(&self) -> Result<String, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(classify_kube_error)?;
        Ok(info.git_version)
    }
}

fn classify_kube_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => {
            classify_status(response.code, &response.reason, &response.message)
        }
        other => ClusterError::unknown(other.to_string()),
    }
}

/// Maps an API server status code onto the cluster error taxonomy.
fn classify_status(code: u16, reason: &str, message: &str) -> ClusterError {
    let detail = if message.is_empty() {
        format!("{reason} ({code})")
    } else {
        message.to_string()
    };

    match code {
        404 => ClusterError::NotFound(detail),
        409 => ClusterError::AlreadyExists(detail),
        408 | 504 => ClusterError::Timeout(detail),
        _ => ClusterError::Unknown(format!("{detail} (status {code})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_already_exists() {
        let err = classify_status(409, "AlreadyExists", "namespaces \"store-ab12cd34\" already exists");
        assert!(err.is_already_exists());
    }

    #[test]
    fn missing_object_is_not_found() {
        assert!(classify_status(404, "NotFound", "").is_not_found());
    }

    #[test]
    fn gateway_timeouts_are_timeouts() {
        assert!(classify_status(504, "Timeout", "request timed out").is_timeout());
        assert!(classify_status(408, "Timeout", "").is_timeout());
    }

    #[test]
    fn other_codes_are_unknown_with_status() {
        let err = classify_status(403, "Forbidden", "namespaces is forbidden");
        assert_eq!(
            err,
            ClusterError::Unknown("namespaces is forbidden (status 403)".to_string())
        );
    }

    #[test]
    fn empty_message_falls_back_to_reason() {
        assert_eq!(
            classify_status(404, "NotFound", ""),
            ClusterError::NotFound("NotFound (404)".to_string())
        );
    }
}
