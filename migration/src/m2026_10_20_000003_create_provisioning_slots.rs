//! Migration to create the provisioning_slots table.
//!
//! One row per provisioning slot, shared by every process using the same
//! database. A slot is held by at most one store and a store holds at most one
//! slot; `lease_until` lets a slot left behind by a crashed process be
//! reclaimed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProvisioningSlots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProvisioningSlots::Slot)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProvisioningSlots::StoreId).text().null())
                    .col(
                        ColumnDef::new(ProvisioningSlots::LeaseUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // NULL holders do not collide, so free slots are unaffected
        manager
            .create_index(
                Index::create()
                    .name("idx_provisioning_slots_store_id")
                    .table(ProvisioningSlots::Table)
                    .col(ProvisioningSlots::StoreId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_provisioning_slots_store_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ProvisioningSlots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProvisioningSlots {
    Table,
    Slot,
    StoreId,
    LeaseUntil,
}
