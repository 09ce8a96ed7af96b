//! StoreEvent entity model
//!
//! Append-only lifecycle log for stores. Rows are never updated.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

/// One entry in a store's event log
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "store_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Store this event belongs to (not a foreign key, history outlives the store)
    pub store_id: String,

    /// INFO|WARNING|ERROR|SUCCESS
    pub event_type: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Severity of a store event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Info,
    Warning,
    Error,
    Success,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Info => "INFO",
            EventType::Warning => "WARNING",
            EventType::Error => "ERROR",
            EventType::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INFO" => Ok(EventType::Info),
            "WARNING" => Ok(EventType::Warning),
            "ERROR" => Ok(EventType::Error),
            "SUCCESS" => Ok(EventType::Success),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}
