use crate::entities;
use crate::entities::signing_key::KeyStatus;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

fn tenant_filter(
    query: sea_orm::Select<entities::signing_key::Entity>,
    tenant_id: Option<&str>,
) -> sea_orm::Select<entities::signing_key::Entity> {
    use entities::signing_key::Column;

    match tenant_id {
        Some(t) => query.filter(Column::TenantId.eq(t)),
        None => query.filter(Column::TenantId.is_null()),
    }
}

pub struct NewSigningKey {
    pub tenant_id: Option<String>,
    pub key_use: String,
    pub key_type: String,
    pub private_key: String,
    pub public_key: String,
    pub ttl_ms: i64,
}

pub async fn insert<C: ConnectionTrait>(
    db: &C,
    input: NewSigningKey,
    status: KeyStatus,
) -> Result<entities::signing_key::Model, GatehouseError> {
    let now = secrets::now_ms();

    let row = entities::signing_key::ActiveModel {
        key_id: Set(secrets::random_id()),
        tenant_id: Set(input.tenant_id),
        key_use: Set(input.key_use),
        key_type: Set(input.key_type),
        private_key: Set(input.private_key),
        public_key: Set(input.public_key),
        status: Set(status),
        created_at: Set(now),
        expires_at: Set(now + input.ttl_ms),
    };

    Ok(row.insert(db).await?)
}

pub async fn get_active(
    db: &DatabaseConnection,
    tenant_id: Option<&str>,
    key_use: &str,
) -> Result<Option<entities::signing_key::Model>, GatehouseError> {
    use entities::signing_key::{Column, Entity};

    Ok(tenant_filter(Entity::find(), tenant_id)
        .filter(Column::KeyUse.eq(key_use))
        .filter(Column::Status.eq(KeyStatus::Active))
        .one(db)
        .await?)
}

pub async fn get_by_kid(
    db: &DatabaseConnection,
    key_id: &str,
) -> Result<Option<entities::signing_key::Model>, GatehouseError> {
    Ok(entities::SigningKey::find_by_id(key_id).one(db).await?)
}

/// Active + unexpired Retiring keys: everything a verifier must accept.
/// Retired keys are excluded; they are retained for audit only.
pub async fn verification_keys(
    db: &DatabaseConnection,
    tenant_id: Option<&str>,
    key_use: &str,
) -> Result<Vec<entities::signing_key::Model>, GatehouseError> {
    use entities::signing_key::{Column, Entity};

    let now = secrets::now_ms();
    Ok(tenant_filter(Entity::find(), tenant_id)
        .filter(Column::KeyUse.eq(key_use))
        .filter(Column::Status.is_in([KeyStatus::Active, KeyStatus::Retiring]))
        .filter(Column::ExpiresAt.gt(now))
        .order_by_desc(Column::CreatedAt)
        .all(db)
        .await?)
}

/// Demote the current Active key for (tenant, use) to Retiring. Run inside the
/// rotation transaction, before the replacement is inserted.
pub async fn demote_active<C: ConnectionTrait>(
    db: &C,
    tenant_id: Option<&str>,
    key_use: &str,
) -> Result<u64, GatehouseError> {
    use entities::signing_key::{Column, Entity};

    let mut update = Entity::update_many()
        .col_expr(Column::Status, Expr::value(KeyStatus::Retiring))
        .filter(Column::KeyUse.eq(key_use))
        .filter(Column::Status.eq(KeyStatus::Active));

    update = match tenant_id {
        Some(t) => update.filter(Column::TenantId.eq(t)),
        None => update.filter(Column::TenantId.is_null()),
    };

    Ok(update.exec(db).await?.rows_affected)
}

/// Retiring keys past their own expiry stop verifying and become audit-only.
pub async fn retire_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::signing_key::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(KeyStatus::Retired))
        .filter(Column::Status.eq(KeyStatus::Retiring))
        .filter(Column::ExpiresAt.lte(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
