//! # Reconciliation Loop
//!
//! Background task that periodically compares every non-failed store record
//! with the workloads running in its namespace and promotes stores whose
//! workloads have all become ready. Optionally re-installs chart releases
//! that have gone missing.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::ClusterGateway;
use crate::config::ReconcilerConfig;
use crate::deadline::with_deadline;
use crate::error::RepositoryError;
use crate::models::store::{Model as StoreModel, StoreStatus};
use crate::models::store_event::EventType;
use crate::provisioner::Provisioner;
use crate::repositories::{StoreEventRepository, StoreRepository};
use crate::status::{ClusterStatus, evaluate_query};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters for one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub polled: u64,
    pub promoted: u64,
    pub unknown: u64,
    pub repairs: u64,
    pub errors: u64,
}

/// Periodic reconciler service.
pub struct Reconciler {
    config: ReconcilerConfig,
    cluster: Arc<dyn ClusterGateway>,
    provisioner: Arc<Provisioner>,
    stores: StoreRepository,
    events: StoreEventRepository,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        db: DatabaseConnection,
        cluster: Arc<dyn ClusterGateway>,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            config,
            cluster,
            provisioner,
            stores: StoreRepository::new(db.clone()),
            events: StoreEventRepository::new(db),
        }
    }

    /// Run sweeps until the shutdown token fires.
    ///
    /// The first sweep waits for the initial delay, later ones for the interval.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.config.interval_seconds,
            ensure_releases = self.config.ensure_releases,
            "Starting reconciler"
        );
        let mut wait = self.config.initial_delay();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciler shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    let sweep_started = Instant::now();
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "Reconcile sweep failed");
                    }
                    histogram!("store_reconcile_sweep_duration_ms")
                        .record(sweep_started.elapsed().as_secs_f64() * 1_000.0);
                    wait = self.config.interval();
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// One pass over every non-failed record.
    ///
    /// Only listing the records can fail the sweep; per-store errors are
    /// logged, counted and skipped.
    #[instrument(skip_all)]
    pub async fn sweep(&self) -> Result<SweepStats, RepositoryError> {
        let mut stats = SweepStats::default();
        let stores = self.stores.list_non_failed().await?;

        for store in stores {
            stats.polled += 1;
            if let Err(err) = self.reconcile_store(&store, &mut stats).await {
                stats.errors += 1;
                error!(store_id = %store.id, error = %err, "Failed to reconcile store");
            }
        }

        counter!("store_reconcile_promotions_total").increment(stats.promoted);

        debug!(
            polled = stats.polled,
            promoted = stats.promoted,
            unknown = stats.unknown,
            repairs = stats.repairs,
            errors = stats.errors,
            "Reconcile sweep completed"
        );

        Ok(stats)
    }

    async fn reconcile_store(
        &self,
        store: &StoreModel,
        stats: &mut SweepStats,
    ) -> Result<(), RepositoryError> {
        let workloads = with_deadline(
            "workload listing",
            QUERY_TIMEOUT,
            self.cluster.list_workloads(&store.id),
        )
        .await;
        let verdict = evaluate_query(&workloads);

        match (store.lifecycle(), verdict) {
            (_, ClusterStatus::Unknown) => {
                stats.unknown += 1;
                if let Err(err) = &workloads {
                    warn!(store_id = %store.id, error = %err, "Workload query failed");
                }
            }
            (StoreStatus::Provisioning, ClusterStatus::Ready) => {
                if self.stores.promote_ready(&store.id).await? {
                    stats.promoted += 1;
                    info!(store_id = %store.id, "Store is now Ready");
                    self.events
                        .record(&store.id, EventType::Success, "Store is now Ready")
                        .await;
                }
            }
            (StoreStatus::Ready, ClusterStatus::Provisioning) => {
                debug!(store_id = %store.id, "Ready store has workloads not ready, leaving status");
            }
            _ => {}
        }

        if self.config.ensure_releases {
            self.ensure_release(store, stats).await;
        }

        Ok(())
    }

    /// Re-install a missing release. Check-then-act: a release removed
    /// between the check and the install is picked up on the next sweep.
    async fn ensure_release(&self, store: &StoreModel, stats: &mut SweepStats) {
        if self.provisioner.is_in_flight(&store.id).await {
            return;
        }

        let present = match with_deadline(
            "release lookup",
            QUERY_TIMEOUT,
            self.cluster.release_exists(&store.id),
        )
        .await
        {
            Ok(present) => present,
            Err(err) => {
                stats.unknown += 1;
                warn!(store_id = %store.id, error = %err, "Release lookup failed");
                return;
            }
        };

        if present {
            return;
        }

        if self.provisioner.try_reinstall(store.clone()).await.is_accepted() {
            stats.repairs += 1;
        } else {
            debug!(store_id = %store.id, "Release missing, repair deferred");
        }
    }
}
