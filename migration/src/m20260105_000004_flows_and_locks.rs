use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Multi-step authentication/registration flows. One row per flow; the
        // ordered step results live in the steps JSON column and the cursor
        // points at the single pending step.
        manager
            .create_table(
                Table::create()
                    .table(AuthFlow::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthFlow::FlowTokenHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthFlow::TenantId).string().not_null())
                    .col(ColumnDef::new(AuthFlow::FlowType).string().not_null())
                    .col(ColumnDef::new(AuthFlow::UserId).string())
                    .col(ColumnDef::new(AuthFlow::Steps).text().not_null())
                    .col(
                        ColumnDef::new(AuthFlow::Cursor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(AuthFlow::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(AuthFlow::ExpiresAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_auth_flows_expires_at")
                    .table(AuthFlow::Table)
                    .col(AuthFlow::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // Lease-based mutual exclusion for background sweep jobs.
        manager
            .create_table(
                Table::create()
                    .table(SchedulerLock::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchedulerLock::LockName)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchedulerLock::LockInstanceId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SchedulerLock::LockStartedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SchedulerLock::LockExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchedulerLock::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthFlow::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuthFlow {
    #[sea_orm(iden = "auth_flows")]
    Table,
    FlowTokenHash,
    TenantId,
    FlowType,
    UserId,
    Steps,
    Cursor,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum SchedulerLock {
    #[sea_orm(iden = "scheduler_locks")]
    Table,
    LockName,
    LockInstanceId,
    LockStartedAt,
    LockExpiresAt,
}
