//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied and
//! [`FakeCluster`], an in-process cluster gateway whose chart installs can be
//! scripted to succeed, fail, hang or wait on a gate.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use provisioner::app::App;
use provisioner::cluster::{
    ChartRelease, ClusterError, ClusterGateway, DeleteOutcome, NamespaceOutcome,
    UninstallOutcome, WorkloadKind, WorkloadStatus,
};
use provisioner::config::AppConfig;
use provisioner::models::store::namespace_for;
use provisioner::models::store_event::Model as StoreEventModel;
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::Semaphore;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration tuned for tests: short timeouts and no reconciler delay.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    config.provisioning.install_timeout_seconds = 5;
    config.provisioning.namespace_delete_timeout_seconds = 5;
    config.provisioning.ingress_domain_suffix = "stores.test".to_string();
    config.reconciler.initial_delay_seconds = 0;
    config.reconciler.interval_seconds = 5;
    config.cluster.chart_root = PathBuf::from("charts");
    config
}

/// Builds an [`App`] over a fresh database and a fresh [`FakeCluster`].
pub async fn test_app(config: AppConfig) -> Result<(App, Arc<FakeCluster>, DatabaseConnection)> {
    let db = setup_test_db().await?;
    let cluster = Arc::new(FakeCluster::new());
    let gateway: Arc<dyn ClusterGateway> = cluster.clone();
    let app = App::new(config, db.clone(), gateway);
    Ok((app, cluster, db))
}

/// Builds a second [`App`] over an existing database and cluster, standing in
/// for another process such as the CLI.
pub fn app_sharing(config: AppConfig, db: &DatabaseConnection, cluster: &Arc<FakeCluster>) -> App {
    let gateway: Arc<dyn ClusterGateway> = cluster.clone();
    App::new(config, db.clone(), gateway)
}

/// Polls `check` every 10ms until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not met within five seconds")
}

/// Messages of a store's events, oldest first.
pub fn messages_oldest_first(events: &[StoreEventModel]) -> Vec<String> {
    events.iter().rev().map(|e| e.message.clone()).collect()
}

/// How the fake answers chart installs.
#[derive(Clone)]
pub enum InstallBehavior {
    Succeed,
    Fail(String),
    /// Never completes; only a deadline ends the call.
    Hang,
    /// Waits for one permit of the gate, then succeeds.
    Gated(Arc<Semaphore>),
}

/// How the fake answers namespace deletion.
#[derive(Clone)]
pub enum NamespaceDeleteBehavior {
    Normal,
    Hang,
    Fail(ClusterError),
}

#[derive(Default)]
struct FakeState {
    namespaces: HashSet<String>,
    releases: HashSet<String>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
    workloads: HashMap<String, Vec<WorkloadStatus>>,
    failing_workload_queries: HashSet<String>,
    install_calls: Vec<ChartRelease>,
    uninstall_calls: Vec<String>,
}

/// In-process [`ClusterGateway`] keeping cluster state in memory.
pub struct FakeCluster {
    state: Mutex<FakeState>,
    install: Mutex<InstallBehavior>,
    namespace_delete: Mutex<NamespaceDeleteBehavior>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            install: Mutex::new(InstallBehavior::Succeed),
            namespace_delete: Mutex::new(NamespaceDeleteBehavior::Normal),
        }
    }

    pub fn set_install_behavior(&self, behavior: InstallBehavior) {
        *self.install.lock().unwrap() = behavior;
    }

    pub fn set_namespace_delete_behavior(&self, behavior: NamespaceDeleteBehavior) {
        *self.namespace_delete.lock().unwrap() = behavior;
    }

    /// Replace the workloads of a store with `count` deployments at `ready`/`desired`.
    pub fn set_deployments(&self, store_id: &str, count: usize, desired: i32, ready: i32) {
        let workloads = (0..count)
            .map(|i| WorkloadStatus {
                kind: WorkloadKind::Deployment,
                name: format!("app-{i}"),
                desired_replicas: Some(desired),
                ready_replicas: ready,
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .workloads
            .insert(store_id.to_string(), workloads);
    }

    pub fn fail_workload_queries(&self, store_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_workload_queries
            .insert(store_id.to_string());
    }

    pub fn put_secret(&self, store_id: &str, name: &str, values: &[(&str, &str)]) {
        let values = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert((store_id.to_string(), name.to_string()), values);
    }

    pub fn has_namespace(&self, store_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .contains(&namespace_for(store_id))
    }

    /// Drops the namespace as if someone deleted it out of band.
    pub fn forget_namespace(&self, store_id: &str) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .remove(&namespace_for(store_id));
    }

    pub fn has_release(&self, store_id: &str) -> bool {
        self.state.lock().unwrap().releases.contains(store_id)
    }

    /// Drops the release as if it was uninstalled out of band.
    pub fn forget_release(&self, store_id: &str) {
        self.state.lock().unwrap().releases.remove(store_id);
    }

    pub fn install_calls(&self) -> Vec<ChartRelease> {
        self.state.lock().unwrap().install_calls.clone()
    }

    pub fn uninstall_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().uninstall_calls.clone()
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn create_namespace(
        &self,
        store_id: &str,
        _labels: BTreeMap<String, String>,
        _annotations: BTreeMap<String, String>,
    ) -> Result<NamespaceOutcome, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.namespaces.insert(namespace_for(store_id)) {
            Ok(NamespaceOutcome::Created)
        } else {
            Ok(NamespaceOutcome::AlreadyExists)
        }
    }

    async fn delete_namespace(&self, store_id: &str) -> Result<DeleteOutcome, ClusterError> {
        let behavior = self.namespace_delete.lock().unwrap().clone();
        match behavior {
            NamespaceDeleteBehavior::Normal => {
                let removed = self
                    .state
                    .lock()
                    .unwrap()
                    .namespaces
                    .remove(&namespace_for(store_id));
                if removed {
                    Ok(DeleteOutcome::Initiated)
                } else {
                    Ok(DeleteOutcome::NotFound)
                }
            }
            NamespaceDeleteBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(DeleteOutcome::Initiated)
            }
            NamespaceDeleteBehavior::Fail(err) => Err(err),
        }
    }

    async fn list_workloads(&self, store_id: &str) -> Result<Vec<WorkloadStatus>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.failing_workload_queries.contains(store_id) {
            return Err(ClusterError::unknown("connection refused"));
        }
        Ok(state.workloads.get(store_id).cloned().unwrap_or_default())
    }

    async fn read_secret(
        &self,
        store_id: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(&(store_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn install_or_upgrade_chart(&self, release: &ChartRelease) -> Result<(), ClusterError> {
        self.state
            .lock()
            .unwrap()
            .install_calls
            .push(release.clone());

        let behavior = self.install.lock().unwrap().clone();
        match behavior {
            InstallBehavior::Succeed => {}
            InstallBehavior::Fail(detail) => return Err(ClusterError::Unknown(detail)),
            InstallBehavior::Hang => std::future::pending::<()>().await,
            InstallBehavior::Gated(gate) => {
                gate.acquire()
                    .await
                    .map_err(|e| ClusterError::unknown(e.to_string()))?
                    .forget();
            }
        }

        self.state
            .lock()
            .unwrap()
            .releases
            .insert(release.store_id.clone());
        Ok(())
    }

    async fn uninstall_chart(&self, store_id: &str) -> Result<UninstallOutcome, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.uninstall_calls.push(store_id.to_string());
        if state.releases.remove(store_id) {
            Ok(UninstallOutcome::Removed)
        } else {
            Ok(UninstallOutcome::AlreadyAbsent)
        }
    }

    async fn release_exists(&self, store_id: &str) -> Result<bool, ClusterError> {
        Ok(self.state.lock().unwrap().releases.contains(store_id))
    }

    async fn check_connectivity(&self) -> Result<String, ClusterError> {
        Ok("v1.32.0-fake".to_string())
    }
}
