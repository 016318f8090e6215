use crate::entities;
use crate::errors::GatehouseError;
use crate::secrets;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

/// Upsert a service-group rate limit for a tenant.
///
/// Write-time invariant: unless the tenant itself allows unlimited rate, the
/// sum of finite limits across its service groups (including this one) must
/// not exceed the tenant's default_rate_limit.
pub async fn put_tenant_rate_limit(
    db: &DatabaseConnection,
    model: entities::tenant_rate_limit::Model,
) -> Result<(), GatehouseError> {
    use entities::tenant_rate_limit::{ActiveModel, Column, Entity};

    let tenant = entities::Tenant::find_by_id(&model.tenant_id)
        .one(db)
        .await?
        .ok_or_else(|| GatehouseError::BadRequest("unknown tenant".to_string()))?;

    if tenant.allow_unlimited_rate == 0 {
        if let Some(new_limit) = effective_limit(&model) {
            let existing = Entity::find()
                .filter(Column::TenantId.eq(&model.tenant_id))
                .all(db)
                .await?;

            let other_sum: i64 = existing
                .iter()
                .filter(|rel| rel.service_group_id != model.service_group_id)
                .filter_map(effective_limit)
                .sum();

            if other_sum + new_limit > tenant.default_rate_limit {
                return Err(GatehouseError::BadRequest(format!(
                    "service group limits {} would exceed the tenant limit {}",
                    other_sum + new_limit,
                    tenant.default_rate_limit
                )));
            }
        }
    }

    let active = ActiveModel {
        tenant_id: Set(model.tenant_id),
        service_group_id: Set(model.service_group_id),
        allow_unlimited_rate: Set(model.allow_unlimited_rate),
        rate_limit: Set(model.rate_limit),
        rate_limit_period_minutes: Set(model.rate_limit_period_minutes),
    };

    Entity::insert(active)
        .on_conflict(
            OnConflict::columns([Column::TenantId, Column::ServiceGroupId])
                .update_columns([
                    Column::AllowUnlimitedRate,
                    Column::RateLimit,
                    Column::RateLimitPeriodMinutes,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

fn effective_limit(rel: &entities::tenant_rate_limit::Model) -> Option<i64> {
    if rel.allow_unlimited_rate != 0 {
        None
    } else {
        rel.rate_limit
    }
}

pub async fn get_tenant_rate_limit(
    db: &DatabaseConnection,
    tenant_id: &str,
    service_group_id: &str,
) -> Result<Option<entities::tenant_rate_limit::Model>, GatehouseError> {
    use entities::tenant_rate_limit::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::TenantId.eq(tenant_id))
        .filter(Column::ServiceGroupId.eq(service_group_id))
        .one(db)
        .await?)
}

pub async fn list_tenant_rate_limits(
    db: &DatabaseConnection,
    tenant_id: &str,
) -> Result<Vec<entities::tenant_rate_limit::Model>, GatehouseError> {
    use entities::tenant_rate_limit::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::TenantId.eq(tenant_id))
        .all(db)
        .await?)
}

pub async fn put_login_failure_policy(
    db: &DatabaseConnection,
    model: entities::login_failure_policy::Model,
) -> Result<(), GatehouseError> {
    use entities::login_failure_policy::{ActiveModel, Column, Entity, LoginFailurePolicyType};

    if model.policy_type == LoginFailurePolicyType::PauseLogin
        && (model.pause_duration_minutes.is_none() || model.maximum_login_failures.is_none())
    {
        return Err(GatehouseError::BadRequest(
            "pause_login policy requires pause_duration_minutes and maximum_login_failures"
                .to_string(),
        ));
    }

    let active = ActiveModel {
        tenant_id: Set(model.tenant_id),
        policy_type: Set(model.policy_type),
        failure_threshold: Set(model.failure_threshold),
        pause_duration_minutes: Set(model.pause_duration_minutes),
        maximum_login_failures: Set(model.maximum_login_failures),
    };

    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::TenantId)
                .update_columns([
                    Column::PolicyType,
                    Column::FailureThreshold,
                    Column::PauseDurationMinutes,
                    Column::MaximumLoginFailures,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

pub async fn get_login_failure_policy(
    db: &DatabaseConnection,
    tenant_id: &str,
) -> Result<Option<entities::login_failure_policy::Model>, GatehouseError> {
    Ok(entities::LoginFailurePolicy::find_by_id(tenant_id)
        .one(db)
        .await?)
}

pub async fn get_failed_login(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<entities::user_failed_login::Model>, GatehouseError> {
    Ok(entities::UserFailedLogin::find_by_id(user_id).one(db).await?)
}

pub async fn put_failed_login(
    db: &DatabaseConnection,
    user_id: &str,
    failure_count: i64,
    next_login_not_before: Option<i64>,
) -> Result<(), GatehouseError> {
    use entities::user_failed_login::{ActiveModel, Column, Entity};

    let active = ActiveModel {
        user_id: Set(user_id.to_string()),
        failure_count: Set(failure_count),
        last_failure_at: Set(secrets::now_ms()),
        next_login_not_before: Set(next_login_not_before),
    };

    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::UserId)
                .update_columns([
                    Column::FailureCount,
                    Column::LastFailureAt,
                    Column::NextLoginNotBefore,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

/// A successful login wipes the ledger entry.
pub async fn clear_failed_login(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<(), GatehouseError> {
    use entities::user_failed_login::{Column, Entity};

    Entity::delete_many()
        .filter(Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    Ok(())
}
