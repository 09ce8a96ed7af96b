//! # Store Service
//!
//! Facade used by external callers such as the CLI. It owns the
//! request-side rules: engine validation, per-owner quota, id generation and
//! the first event, then hands the store to the provisioning worker.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::info;
use uuid::Uuid;

use crate::config::ProvisioningConfig;
use crate::engine::Engine;
use crate::error::{RepositoryError, ServiceError};
use crate::models::store::Model as StoreModel;
use crate::models::store_event::{EventType, Model as StoreEventModel};
use crate::provisioner::{Provisioner, Submission};
use crate::repositories::store_event::DEFAULT_EVENT_LIMIT;
use crate::repositories::{NewStore, StoreEventRepository, StoreRepository};

const ID_ATTEMPTS: usize = 3;

/// Request data for creating a new store
#[derive(Debug, Clone)]
pub struct CreateStoreRequest {
    pub name: String,
    pub engine: String,
    pub owner_id: Option<Uuid>,
}

/// A persisted store and the worker's answer for it.
#[derive(Debug)]
pub struct CreatedStore {
    pub store: StoreModel,
    pub submission: Submission,
}

pub struct StoreService {
    stores: StoreRepository,
    events: StoreEventRepository,
    provisioner: Arc<Provisioner>,
    max_stores_per_owner: u32,
}

impl StoreService {
    pub fn new(
        db: DatabaseConnection,
        provisioner: Arc<Provisioner>,
        config: &ProvisioningConfig,
    ) -> Self {
        Self {
            stores: StoreRepository::new(db.clone()),
            events: StoreEventRepository::new(db),
            provisioner,
            max_stores_per_owner: config.max_stores_per_owner,
        }
    }

    /// Persist a new store in `Provisioning` and hand it to the worker.
    ///
    /// Returns as soon as the record exists; provisioning continues on the
    /// worker's task. A store rejected for capacity is returned already
    /// `Failed`.
    pub async fn create_store(
        &self,
        request: CreateStoreRequest,
    ) -> Result<CreatedStore, ServiceError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::Validation(
                "store name cannot be empty".to_string(),
            ));
        }

        let engine: Engine = request
            .engine
            .parse()
            .map_err(ServiceError::UnsupportedEngine)?;

        if let Some(owner) = request.owner_id {
            self.check_quota(owner).await?;
        }

        let store = self.insert_with_fresh_id(&name, engine, request.owner_id).await?;

        info!(store_id = %store.id, engine = %engine, "Store creation accepted");
        self.events
            .record(
                &store.id,
                EventType::Info,
                &format!("Store creation initiated for {name} using {engine}"),
            )
            .await;

        let submission = self.provisioner.submit(store.clone()).await;
        let store = if submission.is_accepted() {
            store
        } else {
            self.stores.find(&store.id).await?.unwrap_or(store)
        };

        Ok(CreatedStore { store, submission })
    }

    async fn check_quota(&self, owner: Uuid) -> Result<(), ServiceError> {
        if self.max_stores_per_owner == 0 {
            return Ok(());
        }

        let held = self.stores.count_by_owner(owner).await?;
        if held >= u64::from(self.max_stores_per_owner) {
            return Err(ServiceError::QuotaExceeded {
                limit: self.max_stores_per_owner,
            });
        }

        Ok(())
    }

    async fn insert_with_fresh_id(
        &self,
        name: &str,
        engine: Engine,
        owner_id: Option<Uuid>,
    ) -> Result<StoreModel, ServiceError> {
        let mut attempt = 1;
        loop {
            let new_store = NewStore {
                id: generate_store_id(),
                name: name.to_string(),
                engine: engine.slug().to_string(),
                owner_id,
            };

            match self.stores.create(new_store).await {
                Ok(store) => return Ok(store),
                Err(err) if err.is_unique_violation() && attempt < ID_ATTEMPTS => {
                    attempt += 1;
                }
                Err(RepositoryError::Validation(message)) => {
                    return Err(ServiceError::Validation(message));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get(&self, store_id: &str) -> Result<StoreModel, ServiceError> {
        self.stores
            .find(store_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(store_id.to_string()))
    }

    /// Records newest first, optionally for one owner.
    pub async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<StoreModel>, ServiceError> {
        Ok(self.stores.list(owner_id).await?)
    }

    /// Event log newest first. Events of deleted stores stay readable.
    pub async fn events(
        &self,
        store_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<StoreEventModel>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_EVENT_LIMIT).max(1);
        Ok(self.events.list(store_id, limit).await?)
    }

    /// Tear down the store's cluster resources, then remove the record.
    ///
    /// Cluster failures are recorded as events and do not block removal.
    pub async fn delete_store(&self, store_id: &str) -> Result<(), ServiceError> {
        let store = self.get(store_id).await?;

        self.provisioner.deprovision(&store.id).await;

        if !self.stores.delete(&store.id).await? {
            return Err(ServiceError::NotFound(store.id));
        }

        info!(store_id = %store.id, "Store deleted");
        Ok(())
    }
}

/// Eight lowercase hex characters: the first group of a v4 UUID.
pub fn generate_store_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
