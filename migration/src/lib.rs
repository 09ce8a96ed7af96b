//! Database migrations for the store provisioner.
//!
//! Creates the `stores` table (one row per tenant environment), the
//! append-only `store_events` log and the shared `provisioning_slots`.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_stores;
mod m2026_10_01_000002_create_store_events;
mod m2026_10_20_000003_create_provisioning_slots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_stores::Migration),
            Box::new(m2026_10_01_000002_create_store_events::Migration),
            Box::new(m2026_10_20_000003_create_provisioning_slots::Migration),
        ]
    }
}
