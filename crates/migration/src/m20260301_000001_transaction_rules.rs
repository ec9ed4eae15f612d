//! User-authored categorization rules.

use sea_orm_migration::prelude::*;

use crate::m20260301_000000_init::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum TransactionRules {
    Table,
    Id,
    UserId,
    Name,
    Conditions,
    Category,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TransactionRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TransactionRules::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TransactionRules::UserId).integer().not_null())
                    .col(ColumnDef::new(TransactionRules::Name).string().not_null())
                    .col(ColumnDef::new(TransactionRules::Conditions).text().not_null())
                    .col(ColumnDef::new(TransactionRules::Category).string().not_null())
                    .col(
                        ColumnDef::new(TransactionRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TransactionRules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transaction_rules-user_id")
                            .from(TransactionRules::Table, TransactionRules::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transaction_rules-user_id")
                    .table(TransactionRules::Table)
                    .col(TransactionRules::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TransactionRules::Table).to_owned())
            .await
    }
}
