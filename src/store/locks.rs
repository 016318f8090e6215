use crate::entities;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

/// Try to take the named lease. Returns true when this instance holds the
/// lock: either the row did not exist, or the previous holder's lease had
/// lapsed and was reclaimed. A live lease held by another instance loses.
pub async fn try_acquire(
    db: &DatabaseConnection,
    lock_name: &str,
    instance_id: &str,
    lease_ms: i64,
) -> Result<bool, GatehouseError> {
    use entities::scheduler_lock::{ActiveModel, Column, Entity};

    let now = secrets::now_ms();

    let fresh = ActiveModel {
        lock_name: Set(lock_name.to_string()),
        lock_instance_id: Set(instance_id.to_string()),
        lock_started_at: Set(now),
        lock_expires_at: Set(now + lease_ms),
    };

    let inserted = Entity::insert(fresh)
        .on_conflict(OnConflict::column(Column::LockName).do_nothing().to_owned())
        .exec_without_returning(db)
        .await?;

    if inserted == 1 {
        return Ok(true);
    }

    // Row exists; reclaim only if the lease has lapsed.
    let reclaimed = Entity::update_many()
        .col_expr(Column::LockInstanceId, Expr::value(instance_id.to_string()))
        .col_expr(Column::LockStartedAt, Expr::value(now))
        .col_expr(Column::LockExpiresAt, Expr::value(now + lease_ms))
        .filter(Column::LockName.eq(lock_name))
        .filter(Column::LockExpiresAt.lte(now))
        .exec(db)
        .await?;

    Ok(reclaimed.rows_affected == 1)
}

/// Drop the lease if this instance still holds it. A lapsed lease reclaimed
/// by someone else is left alone.
pub async fn release(
    db: &DatabaseConnection,
    lock_name: &str,
    instance_id: &str,
) -> Result<(), GatehouseError> {
    use entities::scheduler_lock::{Column, Entity};

    Entity::delete_many()
        .filter(Column::LockName.eq(lock_name))
        .filter(Column::LockInstanceId.eq(instance_id))
        .exec(db)
        .await?;

    Ok(())
}
