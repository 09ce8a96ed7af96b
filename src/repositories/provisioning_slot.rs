//! # Provisioning Slot Repository
//!
//! Claims and releases the shared provisioning slots. A claim is a single
//! conditional UPDATE on one slot row, so two processes racing for the same
//! slot cannot both win, and the unique `store_id` index keeps a store from
//! holding two slots at once.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::provisioning_slot::{ActiveModel, Column, Entity};

/// Result of trying to take a slot for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClaim {
    Claimed(i32),
    /// Every slot below the ceiling is held.
    Busy,
    /// The store already holds a live slot.
    InFlight,
}

/// Repository for the shared provisioning slot table
#[derive(Debug, Clone)]
pub struct SlotRepository {
    db: DatabaseConnection,
}

impl SlotRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Make sure rows `0..capacity` exist. Existing rows are left untouched.
    pub async fn ensure_slots(&self, capacity: u32) -> Result<(), RepositoryError> {
        for slot in 0..slot_count(capacity) {
            let row = ActiveModel {
                slot: Set(slot),
                store_id: Set(None),
                lease_until: Set(None),
            };

            Entity::insert(row)
                .on_conflict(OnConflict::column(Column::Slot).do_nothing().to_owned())
                .exec_without_returning(&self.db)
                .await
                .map_err(RepositoryError::database_error)?;
        }

        Ok(())
    }

    /// Take the first free (or expired) slot below `capacity` for `store_id`.
    pub async fn claim(
        &self,
        store_id: &str,
        capacity: u32,
        lease: Duration,
    ) -> Result<SlotClaim, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let lease_until = TimeDelta::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or_else(|| now + TimeDelta::hours(24));

        // A lease this store left behind is dropped before checking for a live one
        Entity::update_many()
            .col_expr(Column::StoreId, Expr::value(Option::<String>::None))
            .col_expr(Column::LeaseUntil, Expr::value(Option::<DateTimeWithTimeZone>::None))
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::LeaseUntil.lt(now))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if self.is_held(store_id).await? {
            return Ok(SlotClaim::InFlight);
        }

        for slot in 0..slot_count(capacity) {
            let result = Entity::update_many()
                .col_expr(Column::StoreId, Expr::value(store_id))
                .col_expr(Column::LeaseUntil, Expr::value(lease_until))
                .filter(Column::Slot.eq(slot))
                .filter(
                    Condition::any()
                        .add(Column::StoreId.is_null())
                        .add(Column::LeaseUntil.lt(now)),
                )
                .exec(&self.db)
                .await;

            match result {
                Ok(res) if res.rows_affected > 0 => return Ok(SlotClaim::Claimed(slot)),
                Ok(_) => continue,
                Err(err) if is_unique_violation(&err) => return Ok(SlotClaim::InFlight),
                Err(err) => return Err(RepositoryError::database_error(err)),
            }
        }

        Ok(SlotClaim::Busy)
    }

    /// Free `slot` if `store_id` still holds it.
    pub async fn release(&self, slot: i32, store_id: &str) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .col_expr(Column::StoreId, Expr::value(Option::<String>::None))
            .col_expr(Column::LeaseUntil, Expr::value(Option::<DateTimeWithTimeZone>::None))
            .filter(Column::Slot.eq(slot))
            .filter(Column::StoreId.eq(store_id))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }

    /// Whether any process holds a live slot for `store_id`.
    pub async fn is_held(&self, store_id: &str) -> Result<bool, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let held = Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::LeaseUntil.gte(now))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(held > 0)
    }

    /// Slots below `capacity` not held by a live lease.
    pub async fn free_slots(&self, capacity: u32) -> Result<u64, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let held = Entity::find()
            .filter(Column::Slot.lt(slot_count(capacity)))
            .filter(Column::StoreId.is_not_null())
            .filter(Column::LeaseUntil.gte(now))
            .count(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(u64::from(capacity.max(1)).saturating_sub(held))
    }
}

fn slot_count(capacity: u32) -> i32 {
    i32::try_from(capacity.max(1)).unwrap_or(i32::MAX)
}
