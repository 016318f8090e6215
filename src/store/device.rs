use crate::entities;
use crate::entities::device_code_grant::DeviceAuthorizationStatus;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

/// Freshly issued device grant; both clear secrets are returned exactly once.
pub struct IssuedDeviceGrant {
    pub device_code: String,
    pub user_code: String,
    pub model: entities::device_code_grant::Model,
}

pub async fn issue(
    db: &DatabaseConnection,
    tenant_id: &str,
    client_id: &str,
    scope: &str,
    ttl_ms: i64,
    poll_interval: i64,
) -> Result<IssuedDeviceGrant, GatehouseError> {
    let device_code = secrets::random_secret();
    let user_code = secrets::generate_user_code();
    let now = secrets::now_ms();

    let row = entities::device_code_grant::ActiveModel {
        device_code_id: Set(secrets::random_id()),
        device_code_hash: Set(secrets::hash_secret(&device_code)),
        user_code_hash: Set(secrets::hash_user_code(&user_code)),
        client_id: Set(client_id.to_string()),
        tenant_id: Set(tenant_id.to_string()),
        scope: Set(scope.to_string()),
        status: Set(DeviceAuthorizationStatus::Pending),
        user_id: Set(None),
        created_at: Set(now),
        expires_at: Set(now + ttl_ms),
        last_poll_at: Set(None),
        poll_interval: Set(poll_interval),
    };

    let model = row.insert(db).await?;
    Ok(IssuedDeviceGrant {
        device_code,
        user_code,
        model,
    })
}

pub async fn find_by_device_code(
    db: &DatabaseConnection,
    device_code: &str,
) -> Result<Option<entities::device_code_grant::Model>, GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::DeviceCodeHash.eq(secrets::hash_secret(device_code)))
        .one(db)
        .await?)
}

pub async fn find_by_user_code(
    db: &DatabaseConnection,
    user_code: &str,
) -> Result<Option<entities::device_code_grant::Model>, GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::UserCodeHash.eq(secrets::hash_user_code(user_code)))
        .one(db)
        .await?)
}

/// Guarded state transition: refuses moves outside the transition table and
/// races through a conditional update on the current status.
async fn transition(
    db: &DatabaseConnection,
    device_code_id: &str,
    from: DeviceAuthorizationStatus,
    to: DeviceAuthorizationStatus,
    user_id: Option<&str>,
) -> Result<bool, GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    if !from.can_transition_to(to) {
        return Err(GatehouseError::Other(format!(
            "illegal device grant transition {:?} -> {:?}",
            from, to
        )));
    }

    let now = secrets::now_ms();
    let mut update = Entity::update_many()
        .col_expr(Column::Status, Expr::value(to))
        .filter(Column::DeviceCodeId.eq(device_code_id))
        .filter(Column::Status.eq(from))
        .filter(Column::ExpiresAt.gt(now));

    if let Some(uid) = user_id {
        update = update.col_expr(Column::UserId, Expr::value(Some(uid.to_string())));
    }

    Ok(update.exec(db).await?.rows_affected == 1)
}

pub async fn approve(
    db: &DatabaseConnection,
    device_code_id: &str,
    user_id: &str,
) -> Result<bool, GatehouseError> {
    transition(
        db,
        device_code_id,
        DeviceAuthorizationStatus::Pending,
        DeviceAuthorizationStatus::Approved,
        Some(user_id),
    )
    .await
}

pub async fn deny(db: &DatabaseConnection, device_code_id: &str) -> Result<bool, GatehouseError> {
    transition(
        db,
        device_code_id,
        DeviceAuthorizationStatus::Pending,
        DeviceAuthorizationStatus::Denied,
        None,
    )
    .await
}

/// Approved -> Consumed. The single winner of this transition mints tokens;
/// every later poll sees Consumed and never tokens again.
pub async fn claim_tokens(
    db: &DatabaseConnection,
    device_code_id: &str,
) -> Result<bool, GatehouseError> {
    transition(
        db,
        device_code_id,
        DeviceAuthorizationStatus::Approved,
        DeviceAuthorizationStatus::Consumed,
        None,
    )
    .await
}

pub async fn record_poll(
    db: &DatabaseConnection,
    device_code_id: &str,
    polled_at: i64,
) -> Result<(), GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    Entity::update_many()
        .col_expr(Column::LastPollAt, Expr::value(Some(polled_at)))
        .filter(Column::DeviceCodeId.eq(device_code_id))
        .exec(db)
        .await?;

    Ok(())
}

/// Increment the polling interval (RFC 8628 slow_down).
pub async fn bump_interval(
    db: &DatabaseConnection,
    device_code_id: &str,
    add_secs: i64,
) -> Result<(), GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    Entity::update_many()
        .col_expr(
            Column::PollInterval,
            Expr::col(Column::PollInterval).add(add_secs),
        )
        .filter(Column::DeviceCodeId.eq(device_code_id))
        .exec(db)
        .await?;

    Ok(())
}

/// Move Pending/Approved grants past their expiry into the Expired state so
/// polls report it; rows are physically removed by `cleanup_expired`.
pub async fn mark_expired(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceAuthorizationStatus::Expired))
        .filter(Column::ExpiresAt.lte(now))
        .filter(
            Column::Status
                .is_in([
                    DeviceAuthorizationStatus::Pending,
                    DeviceAuthorizationStatus::Approved,
                ]),
        )
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

pub async fn cleanup_expired(
    db: &DatabaseConnection,
    grace_ms: i64,
) -> Result<u64, GatehouseError> {
    use entities::device_code_grant::{Column, Entity};

    let now = secrets::now_ms();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now - grace_ms))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
