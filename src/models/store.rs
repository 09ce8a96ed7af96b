//! Store entity model
//!
//! This module contains the SeaORM entity model for the stores table, one row
//! per provisioned tenant environment, plus the typed status lifecycle.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store entity representing one isolated tenant environment
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stores")]
pub struct Model {
    /// Short opaque identifier (primary key), also the namespace suffix
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Human label chosen at creation
    pub name: String,

    /// Engine slug selecting the chart to install
    pub engine: String,

    /// Lifecycle status (Provisioning|Ready|Failed)
    pub status: String,

    /// Failure detail, present only while status is Failed
    pub error_reason: Option<String>,

    /// Public URL, assigned once the chart install returned
    pub url: Option<String>,

    /// Owning user for multi-user deployments
    pub owner_id: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle status; unknown values are treated as `Provisioning`.
    pub fn lifecycle(&self) -> StoreStatus {
        self.status.parse().unwrap_or(StoreStatus::Provisioning)
    }

    /// Cluster namespace owned by this store.
    pub fn namespace(&self) -> String {
        namespace_for(&self.id)
    }
}

/// Namespace (and chart release) name for a store id.
pub fn namespace_for(store_id: &str) -> String {
    format!("store-{store_id}")
}

/// Lifecycle of a store record.
///
/// `Provisioning` is the initial state; `Ready` and `Failed` are terminal and
/// are never left automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreStatus {
    Provisioning,
    Ready,
    Failed,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Provisioning => "Provisioning",
            StoreStatus::Ready => "Ready",
            StoreStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Provisioning" => Ok(StoreStatus::Provisioning),
            "Ready" => Ok(StoreStatus::Ready),
            "Failed" => Ok(StoreStatus::Failed),
            other => Err(format!("unknown store status '{other}'")),
        }
    }
}
