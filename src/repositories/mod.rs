//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! store record, its event log and the shared provisioning slots.

pub mod provisioning_slot;
pub mod store;
pub mod store_event;

pub use provisioning_slot::{SlotClaim, SlotRepository};
pub use store::{NewStore, StoreRepository};
pub use store_event::StoreEventRepository;
