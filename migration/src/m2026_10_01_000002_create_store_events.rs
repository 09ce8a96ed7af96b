//! Migration to create the store_events table.
//!
//! Events are append-only and carry no foreign key to `stores`, so
//! the history of a deleted store stays readable after deletion.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StoreEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StoreEvents::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StoreEvents::StoreId).text().not_null())
                    .col(
                        ColumnDef::new(StoreEvents::EventType)
                            .text()
                            .not_null()
                            .default("INFO"),
                    )
                    .col(ColumnDef::new(StoreEvents::Message).text().not_null())
                    .col(
                        ColumnDef::new(StoreEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_store_events_store_created")
                    .table(StoreEvents::Table)
                    .col(StoreEvents::StoreId)
                    .col(StoreEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_store_events_store_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(StoreEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StoreEvents {
    Table,
    Id,
    StoreId,
    EventType,
    Message,
    CreatedAt,
}
