//! # Provisioning Worker
//!
//! Runs the namespace, secret and chart steps for a store on its own task,
//! bounded by the provisioning slots shared through the database. When every
//! slot is taken a request is rejected rather than queued: the record goes to
//! `Failed` with a busy reason and the caller may retry with a new store.
//!
//! Deleting a store cancels its task in this process and waits for it to
//! exit, or waits for a task in another process to release its slot. A task
//! that finds its record gone anyway removes the cluster resources it created.
//!
//! The worker never marks a store `Ready`; that transition belongs to the
//! reconciler.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::RngCore;
use rand::rngs::OsRng;
use sea_orm::DatabaseConnection;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{
    ChartRelease, ClusterGateway, DeleteOutcome, NamespaceOutcome, UninstallOutcome,
};
use crate::config::ProvisioningConfig;
use crate::deadline::with_deadline;
use crate::engine::{Engine, StoreCredentials};
use crate::error::{ClusterError, RepositoryError};
use crate::models::store::{Model as StoreModel, namespace_for};
use crate::models::store_event::EventType;
use crate::repositories::{SlotClaim, SlotRepository, StoreEventRepository, StoreRepository};

/// Secret the chart keeps per-store credentials in.
pub const STORE_SECRET: &str = "store-secret";

const API_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(120);
/// Added to the install timeout to size a slot lease.
const LEASE_MARGIN: Duration = Duration::from_secs(300);
const REMOTE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of handing a store to the worker.
#[derive(Debug)]
pub enum Submission {
    /// A slot was taken; the handle completes when the task exits.
    Accepted(JoinHandle<()>),
    /// No slot was free (or the store is already being worked on).
    Rejected,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }

    /// Wait for an accepted task to finish. No-op for rejections.
    pub async fn wait(self) {
        if let Submission::Accepted(handle) = self {
            if let Err(err) = handle.await {
                error!(error = %err, "Provisioning task panicked");
            }
        }
    }
}

enum ClaimError {
    Busy,
    InFlight,
    Database(RepositoryError),
}

/// Handles for a task running in this process.
#[derive(Clone)]
struct RunningTask {
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// A held slot plus the store's local task entry.
///
/// The slot row must be released with [`Provisioner::release`]; the local
/// entry is removed and `finished` fires when the claim is dropped.
struct Claim {
    slot: i32,
    store_id: String,
    cancel: CancellationToken,
    _entry: scopeguard::ScopeGuard<String, Box<dyn FnOnce(String) + Send>>,
    _finished: DropGuard,
}

/// Bounded-concurrency executor for provisioning and release repair.
pub struct Provisioner {
    cluster: Arc<dyn ClusterGateway>,
    stores: StoreRepository,
    events: StoreEventRepository,
    slots: SlotRepository,
    slots_ready: OnceCell<()>,
    config: ProvisioningConfig,
    chart_root: PathBuf,
    running: Arc<Mutex<HashMap<String, RunningTask>>>,
}

impl Provisioner {
    pub fn new(
        db: DatabaseConnection,
        cluster: Arc<dyn ClusterGateway>,
        config: ProvisioningConfig,
        chart_root: PathBuf,
    ) -> Self {
        Self {
            cluster,
            stores: StoreRepository::new(db.clone()),
            events: StoreEventRepository::new(db.clone()),
            slots: SlotRepository::new(db),
            slots_ready: OnceCell::new(),
            config,
            chart_root,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configured slot count.
    pub fn capacity(&self) -> u32 {
        self.config.max_concurrent.max(1)
    }

    /// Slots not held by any process sharing the database.
    pub async fn free_slots(&self) -> Result<u64, RepositoryError> {
        self.slots.free_slots(self.capacity()).await
    }

    /// Whether a task for the store runs here or in another process.
    ///
    /// A failed lookup answers `true` so callers hold off.
    pub async fn is_in_flight(&self, store_id: &str) -> bool {
        if self.running_task(store_id).is_some() {
            return true;
        }

        match self.slots.is_held(store_id).await {
            Ok(held) => held,
            Err(err) => {
                warn!(store_id = %store_id, error = %err, "Slot lookup failed");
                true
            }
        }
    }

    fn running_task(&self, store_id: &str) -> Option<RunningTask> {
        self.running
            .lock()
            .ok()
            .and_then(|running| running.get(store_id).cloned())
    }

    fn lease(&self) -> Duration {
        self.config.install_timeout() + LEASE_MARGIN
    }

    /// Public url for a store.
    pub fn store_url(&self, store_id: &str) -> String {
        format!("http://{}", self.store_host(store_id))
    }

    fn store_host(&self, store_id: &str) -> String {
        format!(
            "{}.{}",
            namespace_for(store_id),
            self.config.ingress_domain_suffix.trim()
        )
    }

    /// Reason recorded on stores rejected for lack of capacity.
    pub fn busy_reason(&self) -> String {
        format!(
            "Server busy: provisioning capacity of {} concurrent stores reached, please retry later",
            self.capacity()
        )
    }

    /// Start provisioning a freshly created store.
    ///
    /// When no slot is free the store is failed with [`Self::busy_reason`]
    /// before this returns.
    pub async fn submit(self: &Arc<Self>, store: StoreModel) -> Submission {
        let claim = match self.try_claim(&store.id).await {
            Ok(claim) => claim,
            Err(ClaimError::InFlight) => {
                warn!(store_id = %store.id, "Store is already being provisioned");
                return Submission::Rejected;
            }
            Err(ClaimError::Busy) => {
                let reason = self.busy_reason();
                warn!(store_id = %store.id, capacity = self.capacity(), "Provisioning rejected, no free slot");
                counter!("store_provisioning_total", "outcome" => "rejected").increment(1);
                self.events
                    .record(&store.id, EventType::Warning, &reason)
                    .await;
                self.mark_failed(&store.id, &reason).await;
                return Submission::Rejected;
            }
            Err(ClaimError::Database(err)) => {
                let detail = format!("could not reserve a provisioning slot: {err}");
                error!(store_id = %store.id, error = %err, "Provisioning slot claim failed");
                counter!("store_provisioning_total", "outcome" => "failed").increment(1);
                self.events
                    .record(
                        &store.id,
                        EventType::Error,
                        &format!("Provisioning failed: {detail}"),
                    )
                    .await;
                self.mark_failed(&store.id, &detail).await;
                return Submission::Rejected;
            }
        };

        let this = Arc::clone(self);
        Submission::Accepted(tokio::spawn(async move {
            let cancel = claim.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(store_id = %store.id, "Provisioning cancelled");
                }
                _ = this.run_provision(&store) => {}
            }
            this.release(claim).await;
        }))
    }

    /// Re-run the chart install for a store whose release went missing.
    ///
    /// Only proceeds when a slot is free and no process is working on the
    /// store; a failed repair is logged as an event and leaves the record's
    /// status alone.
    pub async fn try_reinstall(self: &Arc<Self>, store: StoreModel) -> Submission {
        let claim = match self.try_claim(&store.id).await {
            Ok(claim) => claim,
            Err(ClaimError::Busy) => {
                debug!(store_id = %store.id, "Release repair deferred, no free slot");
                return Submission::Rejected;
            }
            Err(ClaimError::InFlight) => return Submission::Rejected,
            Err(ClaimError::Database(err)) => {
                warn!(store_id = %store.id, error = %err, "Release repair deferred, slot claim failed");
                return Submission::Rejected;
            }
        };

        let this = Arc::clone(self);
        Submission::Accepted(tokio::spawn(async move {
            let cancel = claim.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(store_id = %store.id, "Release repair cancelled");
                }
                _ = this.run_reinstall(&store) => {}
            }
            this.release(claim).await;
        }))
    }

    async fn try_claim(&self, store_id: &str) -> Result<Claim, ClaimError> {
        if self.running_task(store_id).is_some() {
            return Err(ClaimError::InFlight);
        }

        self.slots_ready
            .get_or_try_init(|| self.slots.ensure_slots(self.capacity()))
            .await
            .map_err(ClaimError::Database)?;

        let slot = match self
            .slots
            .claim(store_id, self.capacity(), self.lease())
            .await
            .map_err(ClaimError::Database)?
        {
            SlotClaim::Claimed(slot) => slot,
            SlotClaim::Busy => return Err(ClaimError::Busy),
            SlotClaim::InFlight => return Err(ClaimError::InFlight),
        };

        let task = RunningTask {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };

        if let Ok(mut running) = self.running.lock() {
            running.insert(store_id.to_string(), task.clone());
            gauge!("store_provisioning_in_flight").set(running.len() as f64);
        }

        let running = Arc::clone(&self.running);
        let remove: Box<dyn FnOnce(String) + Send> = Box::new(move |id: String| {
            if let Ok(mut running) = running.lock() {
                running.remove(&id);
                gauge!("store_provisioning_in_flight").set(running.len() as f64);
            }
        });

        Ok(Claim {
            slot,
            store_id: store_id.to_string(),
            cancel: task.cancel,
            _entry: scopeguard::guard(store_id.to_string(), remove),
            _finished: task.finished.drop_guard(),
        })
    }

    /// Free the slot row, then drop the local entry.
    async fn release(&self, claim: Claim) {
        match self.slots.release(claim.slot, &claim.store_id).await {
            Ok(true) => {}
            Ok(false) => warn!(store_id = %claim.store_id, slot = claim.slot, "Slot was no longer held"),
            Err(err) => {
                error!(store_id = %claim.store_id, slot = claim.slot, error = %err, "Failed to release slot, it frees when its lease expires")
            }
        }
        drop(claim);
    }

    #[instrument(skip_all, fields(store_id = %store.id, engine = %store.engine))]
    async fn run_provision(&self, store: &StoreModel) {
        let started = Instant::now();
        info!("Provisioning started");

        let result = match store.engine.parse::<Engine>() {
            Ok(engine) => self.install_release(store, engine).await,
            Err(slug) => Err(ClusterError::unknown(format!("unsupported engine '{slug}'"))),
        };

        match result {
            Ok(url) => match self.stores.set_url(&store.id, &url).await {
                Ok(true) => {
                    counter!("store_provisioning_total", "outcome" => "succeeded").increment(1);
                    info!(url = %url, "Provisioning finished, awaiting readiness");
                }
                Ok(false) => self.remove_orphan(&store.id).await,
                Err(err) => error!(error = %err, "Failed to save store url"),
            },
            Err(err) => {
                let detail = err.to_string();
                error!(error = %detail, "Provisioning failed");
                counter!("store_provisioning_total", "outcome" => "failed").increment(1);
                self.events
                    .record(
                        &store.id,
                        EventType::Error,
                        &format!("Provisioning failed: {detail}"),
                    )
                    .await;
                self.mark_failed(&store.id, &detail).await;
                if matches!(self.stores.find(&store.id).await, Ok(None)) {
                    self.remove_orphan(&store.id).await;
                }
            }
        }

        histogram!("store_provisioning_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    #[instrument(skip_all, fields(store_id = %store.id, engine = %store.engine))]
    async fn run_reinstall(&self, store: &StoreModel) {
        self.events
            .record(
                &store.id,
                EventType::Warning,
                "Helm release missing, reinstalling",
            )
            .await;

        let result = match store.engine.parse::<Engine>() {
            Ok(engine) => self.install_release(store, engine).await,
            Err(slug) => Err(ClusterError::unknown(format!("unsupported engine '{slug}'"))),
        };

        match result {
            Ok(url) => match self.stores.set_url(&store.id, &url).await {
                Ok(true) => {
                    info!("Release reinstalled");
                    self.events
                        .record(&store.id, EventType::Info, "Helm release reinstalled")
                        .await;
                }
                Ok(false) => self.remove_orphan(&store.id).await,
                Err(err) => error!(error = %err, "Failed to save store url after repair"),
            },
            Err(err) => {
                warn!(error = %err, "Release repair failed");
                self.events
                    .record(
                        &store.id,
                        EventType::Error,
                        &format!("Release repair failed: {err}"),
                    )
                    .await;
            }
        }
    }

    /// Namespace, credentials and chart install. Returns the store url.
    async fn install_release(
        &self,
        store: &StoreModel,
        engine: Engine,
    ) -> Result<String, ClusterError> {
        let (labels, annotations) = namespace_metadata(store);

        let outcome = with_deadline(
            "namespace creation",
            API_CALL_TIMEOUT,
            self.cluster.create_namespace(&store.id, labels, annotations),
        )
        .await?;

        let message = match outcome {
            NamespaceOutcome::Created => "Namespace created with isolation labels",
            NamespaceOutcome::AlreadyExists => "Namespace already exists, reusing it",
        };
        self.events.record(&store.id, EventType::Info, message).await;

        let credentials = self.resolve_credentials(&store.id).await;
        let host = self.store_host(&store.id);
        let release = ChartRelease {
            store_id: store.id.clone(),
            release_name: store.namespace(),
            namespace: store.namespace(),
            chart: engine.chart_path(&self.chart_root),
            values: engine.chart_values(&host, &credentials),
            timeout: self.config.install_timeout(),
        };

        self.events
            .record(
                &store.id,
                EventType::Info,
                &format!("Starting Helm install for {engine}..."),
            )
            .await;

        with_deadline(
            "chart install",
            self.config.install_timeout(),
            self.cluster.install_or_upgrade_chart(&release),
        )
        .await?;

        self.events
            .record(&store.id, EventType::Info, "Helm installation completed")
            .await;

        Ok(self.store_url(&store.id))
    }

    /// Reuse credentials from an earlier install, generating any that are missing.
    async fn resolve_credentials(&self, store_id: &str) -> StoreCredentials {
        let existing = match with_deadline(
            "secret read",
            API_CALL_TIMEOUT,
            self.cluster.read_secret(store_id, STORE_SECRET),
        )
        .await
        {
            Ok(Some(values)) => values,
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                debug!(store_id = %store_id, error = %err, "Secret unreadable, generating credentials");
                BTreeMap::new()
            }
        };

        let pick = |key: &str| {
            existing
                .get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .unwrap_or_else(generate_password)
        };

        StoreCredentials {
            db_password: pick("db-password"),
            root_password: pick("root-password"),
            admin_password: pick("admin-password"),
        }
    }

    /// Tear down a store's release and namespace, recording each step.
    ///
    /// A task still working on the store in this process is cancelled and
    /// awaited first, so it cannot recreate what is being removed. A task in
    /// another process is waited for until it releases its slot or the lease
    /// runs out. Cluster errors are logged as events and never returned; the
    /// record itself is left for the caller to remove.
    #[instrument(skip(self))]
    pub async fn deprovision(&self, store_id: &str) {
        if let Some(task) = self.running_task(store_id) {
            info!("Cancelling in-flight provisioning before teardown");
            task.cancel.cancel();
            task.finished.cancelled().await;
        } else {
            self.wait_for_remote_task(store_id).await;
        }

        self.teardown(store_id).await;
    }

    async fn wait_for_remote_task(&self, store_id: &str) {
        let deadline = Instant::now() + self.lease();
        let mut logged = false;

        loop {
            match self.slots.is_held(store_id).await {
                Ok(false) => return,
                Ok(true) if Instant::now() >= deadline => {
                    warn!("Provisioning in another process outlived its lease, tearing down anyway");
                    return;
                }
                Ok(true) => {
                    if !logged {
                        info!("Waiting for provisioning in another process to finish");
                        logged = true;
                    }
                    tokio::time::sleep(REMOTE_POLL_INTERVAL).await;
                }
                Err(err) => {
                    warn!(error = %err, "Slot lookup failed, tearing down without waiting");
                    return;
                }
            }
        }
    }

    /// Resources created by a task whose store was deleted meanwhile.
    async fn remove_orphan(&self, store_id: &str) {
        warn!(store_id = %store_id, "Store deleted during provisioning, removing its resources");
        self.events
            .record(
                store_id,
                EventType::Warning,
                "Store was deleted during provisioning, removing its resources",
            )
            .await;
        self.teardown(store_id).await;
    }

    async fn teardown(&self, store_id: &str) {
        self.events
            .record(store_id, EventType::Info, "Deleting store resources...")
            .await;
        self.events
            .record(store_id, EventType::Info, "Uninstalling Helm release...")
            .await;

        match with_deadline(
            "helm uninstall",
            UNINSTALL_TIMEOUT,
            self.cluster.uninstall_chart(store_id),
        )
        .await
        {
            Ok(UninstallOutcome::Removed) => info!("Helm release removed"),
            Ok(UninstallOutcome::AlreadyAbsent) => debug!("No Helm release to remove"),
            Err(err) => warn!(error = %err, "Helm uninstall failed, continuing"),
        }

        self.events
            .record(store_id, EventType::Info, "Helm release uninstalled")
            .await;
        self.events
            .record(
                store_id,
                EventType::Info,
                "Deleting namespace (this may take 30-60 seconds)...",
            )
            .await;

        let result = with_deadline(
            "namespace deletion",
            self.config.namespace_delete_timeout(),
            self.cluster.delete_namespace(store_id),
        )
        .await;

        match result {
            Ok(DeleteOutcome::Initiated) => {
                self.events
                    .record(
                        store_id,
                        EventType::Info,
                        "Namespace deletion initiated successfully",
                    )
                    .await;
            }
            Ok(DeleteOutcome::NotFound) => {
                self.events
                    .record(store_id, EventType::Info, "Namespace already deleted")
                    .await;
            }
            Err(err) if err.is_timeout() => {
                warn!(error = %err, "Namespace deletion timed out, likely proceeding in background");
                self.events
                    .record(
                        store_id,
                        EventType::Warning,
                        "Namespace deletion initiated but may take time to complete",
                    )
                    .await;
            }
            Err(err) => {
                error!(error = %err, "Namespace deletion failed");
                self.events
                    .record(
                        store_id,
                        EventType::Error,
                        &format!("Error deleting namespace: {err}"),
                    )
                    .await;
            }
        }
    }

    async fn mark_failed(&self, store_id: &str, reason: &str) {
        match self.stores.mark_failed(store_id, reason).await {
            Ok(true) => {}
            Ok(false) => debug!(store_id = %store_id, "Store no longer provisioning, failure not recorded"),
            Err(err) => error!(store_id = %store_id, error = %err, "Failed to mark store failed"),
        }
    }
}

/// Labels and annotations stamped on a store namespace.
pub fn namespace_metadata(
    store: &StoreModel,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let labels = BTreeMap::from([
        ("type".to_string(), "store-tenant".to_string()),
        ("managedBy".to_string(), "store-provisioner".to_string()),
        ("store-id".to_string(), store.id.clone()),
    ]);

    let annotations = BTreeMap::from([
        ("store-name".to_string(), store.name.clone()),
        ("store-engine".to_string(), store.engine.clone()),
        ("created-at".to_string(), Utc::now().to_rfc3339()),
    ]);

    (labels, annotations)
}

/// 16 random bytes from the OS RNG, hex encoded.
pub fn generate_password() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
