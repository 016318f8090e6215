use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Per-tenant, per-service-group rate limit assignments
        manager
            .create_table(
                Table::create()
                    .table(TenantRateLimit::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantRateLimit::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantRateLimit::ServiceGroupId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantRateLimit::AllowUnlimitedRate)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(TenantRateLimit::RateLimit).big_integer())
                    .col(
                        ColumnDef::new(TenantRateLimit::RateLimitPeriodMinutes)
                            .big_integer(),
                    )
                    .primary_key(
                        Index::create()
                            .col(TenantRateLimit::TenantId)
                            .col(TenantRateLimit::ServiceGroupId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LoginFailurePolicy::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LoginFailurePolicy::TenantId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LoginFailurePolicy::PolicyType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LoginFailurePolicy::FailureThreshold)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LoginFailurePolicy::PauseDurationMinutes)
                            .big_integer(),
                    )
                    .col(
                        ColumnDef::new(LoginFailurePolicy::MaximumLoginFailures)
                            .big_integer(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserFailedLogin::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserFailedLogin::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserFailedLogin::FailureCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserFailedLogin::LastFailureAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserFailedLogin::NextLoginNotBefore)
                            .big_integer(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserFailedLogin::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LoginFailurePolicy::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TenantRateLimit::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TenantRateLimit {
    #[sea_orm(iden = "tenant_rate_limits")]
    Table,
    TenantId,
    ServiceGroupId,
    AllowUnlimitedRate,
    RateLimit,
    RateLimitPeriodMinutes,
}

#[derive(DeriveIden)]
enum LoginFailurePolicy {
    #[sea_orm(iden = "login_failure_policies")]
    Table,
    TenantId,
    PolicyType,
    FailureThreshold,
    PauseDurationMinutes,
    MaximumLoginFailures,
}

#[derive(DeriveIden)]
enum UserFailedLogin {
    #[sea_orm(iden = "user_failed_logins")]
    Table,
    UserId,
    FailureCount,
    LastFailureAt,
    NextLoginNotBefore,
}
