//! Wiring of the provisioner components around one database pool and one
//! cluster gateway.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::cluster::ClusterGateway;
use crate::config::AppConfig;
use crate::provisioner::Provisioner;
use crate::reconciler::Reconciler;
use crate::service::StoreService;

pub struct App {
    config: AppConfig,
    db: DatabaseConnection,
    cluster: Arc<dyn ClusterGateway>,
    provisioner: Arc<Provisioner>,
    service: StoreService,
}

impl App {
    pub fn new(config: AppConfig, db: DatabaseConnection, cluster: Arc<dyn ClusterGateway>) -> Self {
        let provisioner = Arc::new(Provisioner::new(
            db.clone(),
            Arc::clone(&cluster),
            config.provisioning.clone(),
            config.cluster.chart_root.clone(),
        ));
        let service = StoreService::new(db.clone(), Arc::clone(&provisioner), &config.provisioning);

        Self {
            config,
            db,
            cluster,
            provisioner,
            service,
        }
    }

    pub fn service(&self) -> &StoreService {
        &self.service
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.provisioner
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterGateway> {
        &self.cluster
    }

    /// A reconciler sharing this app's worker, so repairs respect the same slots.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.config.reconciler.clone(),
            self.db.clone(),
            Arc::clone(&self.cluster),
            Arc::clone(&self.provisioner),
        )
    }
}
