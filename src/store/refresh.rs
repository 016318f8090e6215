use crate::entities;
use crate::entities::client::ClientType;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};

pub struct NewRefreshGrant {
    pub tenant_id: String,
    pub user_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub client_type: ClientType,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub ttl_ms: i64,
}

/// Outcome of a rotation attempt. A concurrent loser and an unknown token are
/// indistinguishable on purpose; both surface as InvalidGrant upstream.
pub enum RotationOutcome {
    Rotated {
        previous: entities::refresh_grant::Model,
        token: String,
        model: entities::refresh_grant::Model,
    },
    CeilingReached,
    NotFound,
}

pub async fn issue<C: ConnectionTrait>(
    db: &C,
    input: NewRefreshGrant,
) -> Result<String, GatehouseError> {
    let (token, _) = insert_grant(db, input, 0).await?;
    Ok(token)
}

async fn insert_grant<C: ConnectionTrait>(
    db: &C,
    input: NewRefreshGrant,
    refresh_count: i64,
) -> Result<(String, entities::refresh_grant::Model), GatehouseError> {
    let token = secrets::random_secret();
    let now = secrets::now_ms();

    let row = entities::refresh_grant::ActiveModel {
        token_hash: Set(secrets::hash_secret(&token)),
        tenant_id: Set(input.tenant_id),
        user_id: Set(input.user_id),
        client_id: Set(input.client_id),
        redirect_uri: Set(input.redirect_uri),
        refresh_count: Set(refresh_count),
        client_type: Set(input.client_type),
        scope: Set(input.scope),
        code_challenge: Set(input.code_challenge),
        code_challenge_method: Set(input.code_challenge_method),
        created_at: Set(now),
        expires_at: Set(now + input.ttl_ms),
        revoked: Set(0),
    };

    let model = row.insert(db).await?;
    Ok((token, model))
}

/// Rotate a refresh grant: revoke the old row and insert the successor with
/// `refresh_count + 1` in one transaction. The conditional revoke is the race
/// arbiter; a losing concurrent caller observes NotFound.
pub async fn rotate(
    db: &DatabaseConnection,
    token: &str,
    client_id: &str,
    max_refresh_count: i64,
    ttl_ms: i64,
) -> Result<RotationOutcome, GatehouseError> {
    use entities::refresh_grant::{Column, Entity};

    let hash = secrets::hash_secret(token);
    let now = secrets::now_ms();

    let txn = db.begin().await?;

    let previous = match Entity::find_by_id(&hash).one(&txn).await? {
        Some(row) if row.client_id == client_id && row.revoked == 0 && row.expires_at > now => row,
        _ => {
            txn.rollback().await?;
            return Ok(RotationOutcome::NotFound);
        }
    };

    if previous.refresh_count >= max_refresh_count {
        txn.rollback().await?;
        return Ok(RotationOutcome::CeilingReached);
    }

    let revoked = Entity::update_many()
        .col_expr(Column::Revoked, Expr::value(1))
        .filter(Column::TokenHash.eq(&hash))
        .filter(Column::Revoked.eq(0))
        .filter(Column::ExpiresAt.gt(now))
        .exec(&txn)
        .await?;

    if revoked.rows_affected != 1 {
        // Lost the race to a concurrent rotation.
        txn.rollback().await?;
        return Ok(RotationOutcome::NotFound);
    }

    let (new_token, model) = insert_grant(
        &txn,
        NewRefreshGrant {
            tenant_id: previous.tenant_id.clone(),
            user_id: previous.user_id.clone(),
            client_id: previous.client_id.clone(),
            redirect_uri: previous.redirect_uri.clone(),
            client_type: previous.client_type,
            scope: previous.scope.clone(),
            code_challenge: previous.code_challenge.clone(),
            code_challenge_method: previous.code_challenge_method.clone(),
            ttl_ms,
        },
        previous.refresh_count + 1,
    )
    .await?;

    txn.commit().await?;

    Ok(RotationOutcome::Rotated {
        previous,
        token: new_token,
        model,
    })
}

/// Valid (unrevoked, unexpired) grant lookup by clear token.
pub async fn find(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<entities::refresh_grant::Model>, GatehouseError> {
    use entities::refresh_grant::Entity;

    let now = secrets::now_ms();
    if let Some(model) = Entity::find_by_id(secrets::hash_secret(token)).one(db).await? {
        if model.revoked != 0 || now > model.expires_at {
            return Ok(None);
        }
        Ok(Some(model))
    } else {
        Ok(None)
    }
}

pub async fn revoke(db: &DatabaseConnection, token: &str) -> Result<bool, GatehouseError> {
    use entities::refresh_grant::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Revoked, Expr::value(1))
        .filter(Column::TokenHash.eq(secrets::hash_secret(token)))
        .filter(Column::Revoked.eq(0))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

pub async fn cleanup_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::refresh_grant::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
