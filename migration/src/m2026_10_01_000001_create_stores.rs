//! Migration to create the stores table.
//!
//! Each row is one tenant environment. The short text id doubles as the
//! suffix of the tenant's namespace and chart release (`store-<id>`).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Stores::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Stores::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Stores::Name).text().not_null())
                    .col(ColumnDef::new(Stores::Engine).text().not_null())
                    .col(
                        ColumnDef::new(Stores::Status)
                            .text()
                            .not_null()
                            .default("Provisioning"),
                    )
                    .col(ColumnDef::new(Stores::ErrorReason).text().null())
                    .col(ColumnDef::new(Stores::Url).text().null())
                    .col(ColumnDef::new(Stores::OwnerId).uuid().null())
                    .col(
                        ColumnDef::new(Stores::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Stores::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Reconciliation sweeps filter on status
        manager
            .create_index(
                Index::create()
                    .name("idx_stores_status")
                    .table(Stores::Table)
                    .col(Stores::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stores_owner_created")
                    .table(Stores::Table)
                    .col(Stores::OwnerId)
                    .col(Stores::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_stores_status").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_stores_owner_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Stores::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Stores {
    Table,
    Id,
    Name,
    Engine,
    Status,
    ErrorReason,
    Url,
    OwnerId,
    CreatedAt,
    UpdatedAt,
}
