use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tenant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tenant::TenantId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tenant::Name).string().not_null())
                    .col(
                        ColumnDef::new(Tenant::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Tenant::AllowUnlimitedRate)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Tenant::DefaultRateLimit)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Tenant::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Client::ClientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Client::TenantId).string().not_null())
                    .col(
                        ColumnDef::new(Client::ClientSecretHash)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Client::ClientName).string())
                    .col(ColumnDef::new(Client::ClientType).string().not_null())
                    .col(ColumnDef::new(Client::RedirectUris).string().not_null())
                    .col(ColumnDef::new(Client::Scopes).string().not_null())
                    .col(
                        ColumnDef::new(Client::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Client::MarkedForDelete)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Client::MaxRefreshTokenCount)
                            .big_integer()
                            .not_null()
                            .default(50),
                    )
                    .col(ColumnDef::new(Client::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_clients_tenant_id")
                    .table(Client::Table)
                    .col(Client::TenantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(User::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(User::TenantId).string().not_null())
                    .col(ColumnDef::new(User::Username).string().not_null())
                    .col(ColumnDef::new(User::PasswordHash).string().not_null())
                    .col(ColumnDef::new(User::Email).string())
                    .col(
                        ColumnDef::new(User::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(User::Locked)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(User::FederatedSubject).string())
                    .col(ColumnDef::new(User::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_users_tenant_username")
                    .table(User::Table)
                    .col(User::TenantId)
                    .col(User::Username)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_users_federated_subject")
                    .table(User::Table)
                    .col(User::FederatedSubject)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AuthCode::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthCode::CodeHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthCode::ClientId).string().not_null())
                    .col(ColumnDef::new(AuthCode::TenantId).string().not_null())
                    .col(ColumnDef::new(AuthCode::UserId).string().not_null())
                    .col(ColumnDef::new(AuthCode::Scope).string().not_null())
                    .col(ColumnDef::new(AuthCode::RedirectUri).string().not_null())
                    .col(ColumnDef::new(AuthCode::CodeChallenge).string())
                    .col(ColumnDef::new(AuthCode::CodeChallengeMethod).string())
                    .col(ColumnDef::new(AuthCode::Nonce).string())
                    .col(
                        ColumnDef::new(AuthCode::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthCode::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthCode::Consumed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_auth_codes_expires_at")
                    .table(AuthCode::Table)
                    .col(AuthCode::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeviceCodeGrant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeviceCodeGrant::DeviceCodeId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeviceCodeGrant::DeviceCodeHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCodeGrant::UserCodeHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCodeGrant::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCodeGrant::TenantId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeviceCodeGrant::Scope).string().not_null())
                    .col(
                        ColumnDef::new(DeviceCodeGrant::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(DeviceCodeGrant::UserId).string())
                    .col(
                        ColumnDef::new(DeviceCodeGrant::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceCodeGrant::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeviceCodeGrant::LastPollAt).big_integer())
                    .col(
                        ColumnDef::new(DeviceCodeGrant::PollInterval)
                            .big_integer()
                            .not_null()
                            .default(5),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_code_grants_device_code_hash")
                    .table(DeviceCodeGrant::Table)
                    .col(DeviceCodeGrant::DeviceCodeHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_code_grants_user_code_hash")
                    .table(DeviceCodeGrant::Table)
                    .col(DeviceCodeGrant::UserCodeHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_code_grants_expires_at")
                    .table(DeviceCodeGrant::Table)
                    .col(DeviceCodeGrant::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefreshGrant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RefreshGrant::TokenHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RefreshGrant::TenantId).string().not_null())
                    .col(ColumnDef::new(RefreshGrant::UserId).string().not_null())
                    .col(ColumnDef::new(RefreshGrant::ClientId).string().not_null())
                    .col(
                        ColumnDef::new(RefreshGrant::RedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefreshGrant::RefreshCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RefreshGrant::ClientType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RefreshGrant::Scope).string().not_null())
                    .col(ColumnDef::new(RefreshGrant::CodeChallenge).string())
                    .col(ColumnDef::new(RefreshGrant::CodeChallengeMethod).string())
                    .col(
                        ColumnDef::new(RefreshGrant::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefreshGrant::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefreshGrant::Revoked)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_refresh_grants_expires_at")
                    .table(RefreshGrant::Table)
                    .col(RefreshGrant::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SigningKey::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SigningKey::KeyId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SigningKey::TenantId).string())
                    .col(ColumnDef::new(SigningKey::KeyUse).string().not_null())
                    .col(ColumnDef::new(SigningKey::KeyType).string().not_null())
                    .col(ColumnDef::new(SigningKey::PrivateKey).text().not_null())
                    .col(ColumnDef::new(SigningKey::PublicKey).text().not_null())
                    .col(ColumnDef::new(SigningKey::Status).string().not_null())
                    .col(
                        ColumnDef::new(SigningKey::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SigningKey::ExpiresAt)
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
                    .name("idx_signing_keys_tenant_use_status")
                    .table(SigningKey::Table)
                    .col(SigningKey::TenantId)
                    .col(SigningKey::KeyUse)
                    .col(SigningKey::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SigningKey::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefreshGrant::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceCodeGrant::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuthCode::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Client::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tenant::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tenant {
    #[sea_orm(iden = "tenants")]
    Table,
    TenantId,
    Name,
    Enabled,
    AllowUnlimitedRate,
    DefaultRateLimit,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Client {
    #[sea_orm(iden = "clients")]
    Table,
    ClientId,
    TenantId,
    ClientSecretHash,
    ClientName,
    ClientType,
    RedirectUris,
    Scopes,
    Enabled,
    MarkedForDelete,
    MaxRefreshTokenCount,
    CreatedAt,
}

#[derive(DeriveIden)]
enum User {
    #[sea_orm(iden = "users")]
    Table,
    UserId,
    TenantId,
    Username,
    PasswordHash,
    Email,
    Enabled,
    Locked,
    FederatedSubject,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AuthCode {
    #[sea_orm(iden = "auth_codes")]
    Table,
    CodeHash,
    ClientId,
    TenantId,
    UserId,
    Scope,
    RedirectUri,
    CodeChallenge,
    CodeChallengeMethod,
    Nonce,
    CreatedAt,
    ExpiresAt,
    Consumed,
}

#[derive(DeriveIden)]
enum DeviceCodeGrant {
    #[sea_orm(iden = "device_code_grants")]
    Table,
    DeviceCodeId,
    DeviceCodeHash,
    UserCodeHash,
    ClientId,
    TenantId,
    Scope,
    Status,
    UserId,
    CreatedAt,
    ExpiresAt,
    LastPollAt,
    PollInterval,
}

#[derive(DeriveIden)]
enum RefreshGrant {
    #[sea_orm(iden = "refresh_grants")]
    Table,
    TokenHash,
    TenantId,
    UserId,
    ClientId,
    RedirectUri,
    RefreshCount,
    ClientType,
    Scope,
    CodeChallenge,
    CodeChallengeMethod,
    CreatedAt,
    ExpiresAt,
    Revoked,
}

#[derive(DeriveIden)]
enum SigningKey {
    #[sea_orm(iden = "signing_keys")]
    Table,
    KeyId,
    TenantId,
    KeyUse,
    KeyType,
    PrivateKey,
    PublicKey,
    Status,
    CreatedAt,
    ExpiresAt,
}
