use crate::entities;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

pub struct NewAuthCode {
    pub tenant_id: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub ttl_ms: i64,
}

/// Persist a new authorization code. Only the hash is stored; the clear code
/// is returned to the caller and never seen again.
pub async fn issue(db: &DatabaseConnection, input: NewAuthCode) -> Result<String, GatehouseError> {
    let code = secrets::random_secret();
    let now = secrets::now_ms();

    let row = entities::auth_code::ActiveModel {
        code_hash: Set(secrets::hash_secret(&code)),
        client_id: Set(input.client_id),
        tenant_id: Set(input.tenant_id),
        user_id: Set(input.user_id),
        scope: Set(input.scope),
        redirect_uri: Set(input.redirect_uri),
        code_challenge: Set(input.code_challenge),
        code_challenge_method: Set(input.code_challenge_method),
        nonce: Set(input.nonce),
        created_at: Set(now),
        expires_at: Set(now + input.ttl_ms),
        consumed: Set(0),
    };

    row.insert(db).await?;
    Ok(code)
}

/// One-time consume. The conditional update is the authority: of any number of
/// concurrent redemptions exactly one observes `rows_affected == 1`.
pub async fn consume(
    db: &DatabaseConnection,
    code: &str,
) -> Result<Option<entities::auth_code::Model>, GatehouseError> {
    use entities::auth_code::{Column, Entity};

    let hash = secrets::hash_secret(code);
    let now = secrets::now_ms();

    let result = Entity::update_many()
        .col_expr(Column::Consumed, Expr::value(1))
        .filter(Column::CodeHash.eq(&hash))
        .filter(Column::Consumed.eq(0))
        .filter(Column::ExpiresAt.gt(now))
        .exec(db)
        .await?;

    if result.rows_affected != 1 {
        return Ok(None);
    }

    Ok(Entity::find_by_id(hash).one(db).await?)
}

pub async fn cleanup_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::auth_code::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
