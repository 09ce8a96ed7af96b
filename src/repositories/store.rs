//! # Store Repository
//!
//! CRUD and lifecycle transitions for store records. Status changes are
//! conditional on the record still being `Provisioning`, so a late write can
//! never move a record out of a terminal state.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::store::{ActiveModel, Column, Entity, Model, StoreStatus};

const MAX_NAME_LEN: usize = 255;

/// Data required to persist a new store record
#[derive(Debug, Clone)]
pub struct NewStore {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub owner_id: Option<Uuid>,
}

/// Repository for store database operations
#[derive(Debug, Clone)]
pub struct StoreRepository {
    db: DatabaseConnection,
}

impl StoreRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a new record in `Provisioning` with no url and no error.
    pub async fn create(&self, new_store: NewStore) -> Result<Model, RepositoryError> {
        validate_name(&new_store.name)?;

        let now = Utc::now().fixed_offset();
        let store = ActiveModel {
            id: Set(new_store.id),
            name: Set(new_store.name.trim().to_string()),
            engine: Set(new_store.engine),
            status: Set(StoreStatus::Provisioning.as_str().to_string()),
            error_reason: Set(None),
            url: Set(None),
            owner_id: Set(new_store.owner_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = store
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result)
    }

    pub async fn find(&self, store_id: &str) -> Result<Option<Model>, RepositoryError> {
        let store = Entity::find_by_id(store_id.to_string())
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(store)
    }

    /// List records newest first, optionally restricted to one owner.
    pub async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<Model>, RepositoryError> {
        let mut query = Entity::find();

        if let Some(owner) = owner_id {
            query = query.filter(Column::OwnerId.eq(owner));
        }

        let stores = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(stores)
    }

    /// Every record the reconciler should look at, oldest first.
    pub async fn list_non_failed(&self) -> Result<Vec<Model>, RepositoryError> {
        let stores = Entity::find()
            .filter(Column::Status.ne(StoreStatus::Failed.as_str()))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(stores)
    }

    pub async fn count_by_owner(&self, owner_id: Uuid) -> Result<u64, RepositoryError> {
        let count = Entity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(count)
    }

    /// Record the public url. Returns false when the record no longer exists.
    pub async fn set_url(&self, store_id: &str, url: &str) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::Url, Expr::value(url))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(store_id))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }

    /// `Provisioning -> Failed`. Returns false if the record was not
    /// `Provisioning` (or is gone) and nothing changed.
    pub async fn mark_failed(&self, store_id: &str, reason: &str) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(StoreStatus::Failed.as_str()))
            .col_expr(Column::ErrorReason, Expr::value(reason))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(store_id))
            .filter(Column::Status.eq(StoreStatus::Provisioning.as_str()))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }

    /// `Provisioning -> Ready`, clearing any error reason.
    pub async fn promote_ready(&self, store_id: &str) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(StoreStatus::Ready.as_str()))
            .col_expr(Column::ErrorReason, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(store_id))
            .filter(Column::Status.eq(StoreStatus::Provisioning.as_str()))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }

    pub async fn delete(&self, store_id: &str) -> Result<bool, RepositoryError> {
        let result = Entity::delete_by_id(store_id.to_string())
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }
}

fn validate_name(name: &str) -> Result<(), RepositoryError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(RepositoryError::validation_error(
            "Store name cannot be empty",
        ));
    }

    if trimmed.len() > MAX_NAME_LEN {
        return Err(RepositoryError::validation_error(format!(
            "Store name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }

    Ok(())
}
