//! Per-tenant admission policy: rate limits evaluated against an external
//! usage aggregator, and the login-failure ledger driving account
//! lockout/pause decisions.

use crate::entities;
use crate::entities::login_failure_policy::LoginFailurePolicyType;
use crate::errors::{GatehouseError, ProtocolErrorKind};
use crate::secrets;
use crate::settings;
use crate::store;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Mutex;

/// Rate-limit window counts come from outside the core (telemetry/usage
/// aggregation); the engine only compares them against configuration.
#[async_trait]
pub trait UsageAggregator: Send + Sync {
    async fn count_in_window(
        &self,
        tenant_id: &str,
        service_group_id: &str,
        window_minutes: i64,
    ) -> u64;

    async fn record(&self, tenant_id: &str, service_group_id: &str);
}

/// Process-local aggregator: a rolling timestamp list per (tenant, group).
/// Suitable for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryUsageAggregator {
    counters: Mutex<HashMap<(String, String), Vec<i64>>>,
}

#[async_trait]
impl UsageAggregator for InMemoryUsageAggregator {
    async fn count_in_window(
        &self,
        tenant_id: &str,
        service_group_id: &str,
        window_minutes: i64,
    ) -> u64 {
        let cutoff = secrets::now_ms() - window_minutes * 60_000;
        let mut counters = self.counters.lock().expect("usage counter lock poisoned");
        match counters.get_mut(&(tenant_id.to_string(), service_group_id.to_string())) {
            Some(stamps) => {
                stamps.retain(|t| *t > cutoff);
                stamps.len() as u64
            }
            None => 0,
        }
    }

    async fn record(&self, tenant_id: &str, service_group_id: &str) {
        let mut counters = self.counters.lock().expect("usage counter lock poisoned");
        counters
            .entry((tenant_id.to_string(), service_group_id.to_string()))
            .or_default()
            .push(secrets::now_ms());
    }
}

pub enum RateLimitDecision {
    Allow,
    Denied { retry_after_ms: i64 },
}

/// Request-time rate admission. Only the single relevant service group is
/// consulted; the cross-group sum invariant is a write-time concern of the
/// store layer.
pub async fn check_rate_limit(
    db: &DatabaseConnection,
    usage: &dyn UsageAggregator,
    tenant_id: &str,
    service_group_id: &str,
) -> Result<RateLimitDecision, GatehouseError> {
    let Some(rel) = store::policy::get_tenant_rate_limit(db, tenant_id, service_group_id).await?
    else {
        // No limit configured for this group.
        return Ok(RateLimitDecision::Allow);
    };

    if rel.allow_unlimited_rate != 0 {
        return Ok(RateLimitDecision::Allow);
    }

    let (limit, period_minutes) = match (rel.rate_limit, rel.rate_limit_period_minutes) {
        (Some(l), Some(p)) if l >= 0 && p > 0 => (l as u64, p),
        _ => return Ok(RateLimitDecision::Allow),
    };

    let used = usage
        .count_in_window(tenant_id, service_group_id, period_minutes)
        .await;

    if used >= limit {
        Ok(RateLimitDecision::Denied {
            retry_after_ms: period_minutes * 60_000,
        })
    } else {
        Ok(RateLimitDecision::Allow)
    }
}

pub enum LoginAdmission {
    Allow,
    Locked,
    PausedUntil(i64),
}

struct EffectivePolicy {
    policy_type: LoginFailurePolicyType,
    failure_threshold: i64,
    pause_duration_minutes: i64,
    maximum_login_failures: i64,
}

/// Tenant policy row, falling back to the system default when absent.
async fn effective_policy(
    db: &DatabaseConnection,
    cfg: &settings::Policy,
    tenant_id: &str,
) -> Result<EffectivePolicy, GatehouseError> {
    match store::policy::get_login_failure_policy(db, tenant_id).await? {
        Some(row) => Ok(EffectivePolicy {
            policy_type: row.policy_type,
            failure_threshold: row.failure_threshold,
            pause_duration_minutes: row
                .pause_duration_minutes
                .unwrap_or(cfg.default_pause_duration_minutes),
            maximum_login_failures: row
                .maximum_login_failures
                .unwrap_or(cfg.default_maximum_login_failures),
        }),
        None => Ok(EffectivePolicy {
            policy_type: LoginFailurePolicyType::PauseLogin,
            failure_threshold: cfg.default_failure_threshold,
            pause_duration_minutes: cfg.default_pause_duration_minutes,
            maximum_login_failures: cfg.default_maximum_login_failures,
        }),
    }
}

pub async fn check_login_allowed(
    db: &DatabaseConnection,
    user: &entities::user::Model,
) -> Result<LoginAdmission, GatehouseError> {
    if user.locked != 0 {
        return Ok(LoginAdmission::Locked);
    }

    if let Some(ledger) = store::policy::get_failed_login(db, &user.user_id).await? {
        if let Some(not_before) = ledger.next_login_not_before {
            if not_before > secrets::now_ms() {
                return Ok(LoginAdmission::PausedUntil(not_before));
            }
        }
    }

    Ok(LoginAdmission::Allow)
}

/// Apply the tenant policy to one more consecutive failure.
///
/// LockUserAccount: the threshold-th failure locks the account until an
/// administrator unlocks it. PauseLogin: failures past the threshold push
/// next_login_not_before out by the pause duration; reaching
/// maximum_login_failures converts to a hard lock.
pub async fn record_login_failure(
    db: &DatabaseConnection,
    cfg: &settings::Policy,
    user: &entities::user::Model,
) -> Result<(), GatehouseError> {
    let policy = effective_policy(db, cfg, &user.tenant_id).await?;

    let count = store::policy::get_failed_login(db, &user.user_id)
        .await?
        .map(|l| l.failure_count)
        .unwrap_or(0)
        + 1;

    match policy.policy_type {
        LoginFailurePolicyType::LockUserAccount => {
            if count >= policy.failure_threshold {
                store::tenants::set_user_locked(db, &user.user_id, true).await?;
                tracing::warn!(user_id = %user.user_id, count, "Account locked by failure policy");
            }
            store::policy::put_failed_login(db, &user.user_id, count, None).await?;
        }
        LoginFailurePolicyType::PauseLogin => {
            if count >= policy.maximum_login_failures {
                store::tenants::set_user_locked(db, &user.user_id, true).await?;
                tracing::warn!(user_id = %user.user_id, count, "Account hard-locked after maximum login failures");
                store::policy::put_failed_login(db, &user.user_id, count, None).await?;
            } else if count > policy.failure_threshold {
                let not_before = secrets::now_ms() + policy.pause_duration_minutes * 60_000;
                store::policy::put_failed_login(db, &user.user_id, count, Some(not_before))
                    .await?;
            } else {
                store::policy::put_failed_login(db, &user.user_id, count, None).await?;
            }
        }
    }

    Ok(())
}

pub async fn record_login_success(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<(), GatehouseError> {
    store::policy::clear_failed_login(db, user_id).await
}

/// Password authentication gated by the tenant's failure policy: admission
/// check before the password is even looked at, ledger update after.
pub async fn authenticate(
    db: &DatabaseConnection,
    cfg: &settings::Policy,
    tenant_id: &str,
    username: &str,
    password: &str,
) -> Result<entities::user::Model, GatehouseError> {
    let Some(user) = store::tenants::get_user_by_username(db, tenant_id, username).await? else {
        return Err(GatehouseError::protocol(ProtocolErrorKind::InvalidGrant));
    };

    match check_login_allowed(db, &user).await? {
        LoginAdmission::Locked => {
            return Err(GatehouseError::protocol(ProtocolErrorKind::AccountLocked))
        }
        LoginAdmission::PausedUntil(ts) => {
            return Err(GatehouseError::protocol_retry_after(
                ProtocolErrorKind::AccountPaused,
                ts,
            ))
        }
        LoginAdmission::Allow => {}
    }

    match store::tenants::verify_user_password(db, tenant_id, username, password).await? {
        Some(user) => {
            record_login_success(db, &user.user_id).await?;
            Ok(user)
        }
        None => {
            record_login_failure(db, cfg, &user).await?;
            Err(GatehouseError::protocol(ProtocolErrorKind::InvalidGrant))
        }
    }
}
