//! ProvisioningSlot entity model
//!
//! Database-backed provisioning slots. Holding a row is what lets a process
//! run an install, so the concurrency ceiling covers every process sharing
//! the database.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provisioning_slots")]
pub struct Model {
    /// Slot number, `0..max_concurrent`
    #[sea_orm(primary_key, auto_increment = false)]
    pub slot: i32,

    /// Store currently holding the slot (unique), `None` when free
    pub store_id: Option<String>,

    /// Claim expiry; an expired claim may be taken over
    pub lease_until: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
