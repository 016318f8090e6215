//! Administrative surface consumed by the (external) management front-end:
//! tenant and client provisioning, rate-limit and login-failure policy
//! configuration, signing-key rotation, and federated-provider management.
//! Served on its own port, away from the public OIDC endpoints.

use crate::entities;
use crate::errors::GatehouseError;
use crate::keyring::USE_TOKEN_SIGNING;
use crate::store;
use crate::web::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/tenants", post(create_tenant))
        .route("/admin/tenants/{tenant}/clients", post(create_client))
        .route("/admin/tenants/{tenant}/users", post(create_user))
        .route(
            "/admin/tenants/{tenant}/users/{user}/unlock",
            post(unlock_user),
        )
        .route("/admin/tenants/{tenant}/rate-limits", get(list_rate_limits))
        .route(
            "/admin/tenants/{tenant}/rate-limits/{group}",
            put(put_rate_limit),
        )
        .route(
            "/admin/tenants/{tenant}/login-failure-policy",
            get(get_login_policy).put(put_login_policy),
        )
        .route("/admin/tenants/{tenant}/keys/rotate", post(rotate_key))
        .route("/admin/tenants/{tenant}/providers", get(list_providers))
        .route(
            "/admin/tenants/{tenant}/providers/{provider}",
            put(put_provider).delete(delete_provider),
        )
        .with_state(state)
}

fn admin_error(err: GatehouseError) -> Response {
    match err {
        GatehouseError::BadRequest(msg) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
        }
        other => {
            tracing::error!(error = %other, "Admin operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTenantRequest {
    name: String,
    default_rate_limit: i64,
    #[serde(default)]
    allow_unlimited_rate: bool,
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> Response {
    match store::tenants::create_tenant(
        &state.db,
        &req.name,
        req.default_rate_limit,
        req.allow_unlimited_rate,
    )
    .await
    {
        Ok(tenant) => (StatusCode::CREATED, Json(json!(tenant))).into_response(),
        Err(e) => admin_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    client_name: Option<String>,
    client_type: entities::client::ClientType,
    redirect_uris: Vec<String>,
    scopes: Vec<String>,
    #[serde(default = "default_max_refresh")]
    max_refresh_token_count: i64,
}

fn default_max_refresh() -> i64 {
    50
}

async fn create_client(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<CreateClientRequest>,
) -> Response {
    match store::tenants::create_client(
        &state.db,
        store::tenants::NewClient {
            tenant_id: tenant,
            client_name: req.client_name,
            client_type: req.client_type,
            redirect_uris: req.redirect_uris,
            scopes: req.scopes,
            max_refresh_token_count: req.max_refresh_token_count,
        },
    )
    .await
    {
        Ok(created) => (
            StatusCode::CREATED,
            // The clear secret appears in this response and nowhere else.
            Json(json!({
                "client": created.model,
                "client_secret": created.client_secret,
            })),
        )
            .into_response(),
        Err(e) => admin_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    email: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    match store::tenants::create_user(&state.db, &tenant, &req.username, &req.password, req.email)
        .await
    {
        Ok(user) => (StatusCode::CREATED, Json(json!(user))).into_response(),
        Err(e) => admin_error(e),
    }
}

/// Explicit administrative unlock: the only way out of a LockUserAccount
/// lockout, and it clears the failure ledger with it.
async fn unlock_user(
    State(state): State<AppState>,
    Path((_tenant, user)): Path<(String, String)>,
) -> Response {
    let result = async {
        store::tenants::set_user_locked(&state.db, &user, false).await?;
        store::policy::clear_failed_login(&state.db, &user).await
    }
    .await;

    match result {
        Ok(()) => Json(json!({"status": "unlocked"})).into_response(),
        Err(e) => admin_error(e),
    }
}

async fn list_rate_limits(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Response {
    match store::policy::list_tenant_rate_limits(&state.db, &tenant).await {
        Ok(limits) => Json(json!(limits)).into_response(),
        Err(e) => admin_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct PutRateLimitRequest {
    #[serde(default)]
    allow_unlimited_rate: bool,
    rate_limit: Option<i64>,
    rate_limit_period_minutes: Option<i64>,
}

async fn put_rate_limit(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
    Json(req): Json<PutRateLimitRequest>,
) -> Response {
    let model = entities::tenant_rate_limit::Model {
        tenant_id: tenant,
        service_group_id: group,
        allow_unlimited_rate: if req.allow_unlimited_rate { 1 } else { 0 },
        rate_limit: req.rate_limit,
        rate_limit_period_minutes: req.rate_limit_period_minutes,
    };

    match store::policy::put_tenant_rate_limit(&state.db, model).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => admin_error(e),
    }
}

async fn get_login_policy(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Response {
    match store::policy::get_login_failure_policy(&state.db, &tenant).await {
        Ok(Some(policy)) => Json(json!(policy)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => admin_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct PutLoginPolicyRequest {
    policy_type: entities::login_failure_policy::LoginFailurePolicyType,
    failure_threshold: i64,
    pause_duration_minutes: Option<i64>,
    maximum_login_failures: Option<i64>,
}

async fn put_login_policy(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<PutLoginPolicyRequest>,
) -> Response {
    let model = entities::login_failure_policy::Model {
        tenant_id: tenant,
        policy_type: req.policy_type,
        failure_threshold: req.failure_threshold,
        pause_duration_minutes: req.pause_duration_minutes,
        maximum_login_failures: req.maximum_login_failures,
    };

    match store::policy::put_login_failure_policy(&state.db, model).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => admin_error(e),
    }
}

async fn rotate_key(State(state): State<AppState>, Path(tenant): Path<String>) -> Response {
    match state
        .keyring
        .rotate(&state.db, Some(&tenant), USE_TOKEN_SIGNING)
        .await
    {
        Ok(key) => Json(json!({
            "key_id": key.key_id,
            "status": key.status,
            "expires_at": key.expires_at,
        }))
        .into_response(),
        Err(e) => admin_error(e),
    }
}

async fn list_providers(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Response {
    match store::federated::list_providers(&state.db, &tenant).await {
        Ok(providers) => Json(json!(providers)).into_response(),
        Err(e) => admin_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct PutProviderRequest {
    issuer: String,
    client_id: String,
    client_secret: String,
    authorize_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: Option<String>,
    scopes: String,
    #[serde(default = "default_true")]
    use_pkce: bool,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn put_provider(
    State(state): State<AppState>,
    Path((tenant, provider)): Path<(String, String)>,
    Json(req): Json<PutProviderRequest>,
) -> Response {
    let model = entities::federated_provider::Model {
        provider_id: provider,
        tenant_id: tenant,
        issuer: req.issuer,
        client_id: req.client_id,
        client_secret: req.client_secret,
        authorize_endpoint: req.authorize_endpoint,
        token_endpoint: req.token_endpoint,
        userinfo_endpoint: req.userinfo_endpoint,
        scopes: req.scopes,
        use_pkce: if req.use_pkce { 1 } else { 0 },
        enabled: if req.enabled { 1 } else { 0 },
    };

    match store::federated::put_provider(&state.db, model).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => admin_error(e),
    }
}

async fn delete_provider(
    State(state): State<AppState>,
    Path((_tenant, provider)): Path<(String, String)>,
) -> Response {
    match store::federated::delete_provider(&state.db, &provider).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => admin_error(e),
    }
}
