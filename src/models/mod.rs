//! # Data Models
//!
//! SeaORM entities for store records, their event log and the shared
//! provisioning slots.

pub mod provisioning_slot;
pub mod store;
pub mod store_event;

pub use provisioning_slot::Entity as ProvisioningSlot;
pub use store::{Entity as Store, StoreStatus};
pub use store_event::{Entity as StoreEvent, EventType};
