//! # StoreEvent Repository
//!
//! Append and list operations for the store event log.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::error::RepositoryError;
use crate::models::store_event::{ActiveModel, Column, Entity, EventType, Model};

/// Default number of events returned by [`StoreEventRepository::list`] callers.
pub const DEFAULT_EVENT_LIMIT: u64 = 100;

/// Repository for the append-only store event log
#[derive(Debug, Clone)]
pub struct StoreEventRepository {
    db: DatabaseConnection,
}

impl StoreEventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append one event.
    pub async fn append(
        &self,
        store_id: &str,
        event_type: EventType,
        message: &str,
    ) -> Result<Model, RepositoryError> {
        let event = ActiveModel {
            id: NotSet,
            store_id: Set(store_id.to_string()),
            event_type: Set(event_type.as_str().to_string()),
            message: Set(message.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let result = event
            .insert(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result)
    }

    /// Append one event, logging instead of failing when the write is lost.
    pub async fn record(&self, store_id: &str, event_type: EventType, message: &str) {
        if let Err(e) = self.append(store_id, event_type, message).await {
            tracing::warn!(
                store_id = %store_id,
                event_type = %event_type,
                error = %e,
                "Failed to record store event"
            );
        }
    }

    /// Events for a store, newest first.
    pub async fn list(&self, store_id: &str, limit: u64) -> Result<Vec<Model>, RepositoryError> {
        let events = Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(events)
    }
}
