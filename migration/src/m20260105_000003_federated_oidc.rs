use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FederatedProvider::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FederatedProvider::ProviderId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FederatedProvider::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedProvider::Issuer).string().not_null())
                    .col(
                        ColumnDef::new(FederatedProvider::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedProvider::ClientSecret)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedProvider::AuthorizeEndpoint)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedProvider::TokenEndpoint)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedProvider::UserinfoEndpoint).string())
                    .col(ColumnDef::new(FederatedProvider::Scopes).string().not_null())
                    .col(
                        ColumnDef::new(FederatedProvider::UsePkce)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(FederatedProvider::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_federated_providers_tenant_id")
                    .table(FederatedProvider::Table)
                    .col(FederatedProvider::TenantId)
                    .to_owned(),
            )
            .await?;

        // Correlation state for an in-flight round trip to an external provider.
        // The init_* columns preserve the caller's original request so the local
        // flow can resume after the callback.
        manager
            .create_table(
                Table::create()
                    .table(FederatedAuthorization::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FederatedAuthorization::StateHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::RelType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::ProviderId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedAuthorization::CodeVerifier).string())
                    .col(
                        ColumnDef::new(FederatedAuthorization::InitClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::InitRedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::InitScope)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedAuthorization::InitState).string())
                    .col(
                        ColumnDef::new(FederatedAuthorization::InitCodeChallenge)
                            .string(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::InitCodeChallengeMethod)
                            .string(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedAuthorization::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_federated_authorizations_expires_at")
                    .table(FederatedAuthorization::Table)
                    .col(FederatedAuthorization::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(FederatedAuthorization::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(FederatedProvider::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FederatedProvider {
    #[sea_orm(iden = "federated_providers")]
    Table,
    ProviderId,
    TenantId,
    Issuer,
    ClientId,
    ClientSecret,
    AuthorizeEndpoint,
    TokenEndpoint,
    UserinfoEndpoint,
    Scopes,
    UsePkce,
    Enabled,
}

#[derive(DeriveIden)]
enum FederatedAuthorization {
    #[sea_orm(iden = "federated_authorizations")]
    Table,
    StateHash,
    RelType,
    ProviderId,
    TenantId,
    CodeVerifier,
    InitClientId,
    InitRedirectUri,
    InitScope,
    InitState,
    InitCodeChallenge,
    InitCodeChallengeMethod,
    CreatedAt,
    ExpiresAt,
}
