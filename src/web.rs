//! Public HTTP surface: per-tenant OIDC endpoints for device authorization,
//! token issuance, device approval, discovery/JWKS, and the federated
//! broker's start/callback pair. Every protocol failure is rendered with one
//! error body shape carrying a stable code and trace id.

use crate::errors::{GatehouseError, ProtocolError, ProtocolErrorKind};
use crate::federation::{self, ProviderClient};
use crate::grants::{self, DevicePollOutcome};
use crate::keyring::Keyring;
use crate::policy::{self, RateLimitDecision, UsageAggregator};
use crate::secrets;
use crate::settings::Settings;
use crate::store;
use axum::body::Body;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64ct::{Base64, Encoding};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

/// Service groups charged against tenant rate limits.
pub const SERVICE_GROUP_TOKEN: &str = "oidc_token";
pub const SERVICE_GROUP_DEVICE: &str = "oidc_devicecode";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub keyring: Keyring,
    pub provider_client: Arc<dyn ProviderClient>,
    pub usage: Arc<dyn UsageAggregator>,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{tenant}/oidc/.well-known/openid-configuration",
            get(discovery),
        )
        .route("/{tenant}/oidc/.well-known/jwks.json", get(jwks_handler))
        .route("/{tenant}/oidc/devicecode", post(device_authorization))
        .route("/{tenant}/oidc/token", post(token))
        .route("/{tenant}/oidc/device/approve", post(device_approve))
        .route("/{tenant}/oidc/device/deny", post(device_deny))
        .route(
            "/{tenant}/oidc/federated/{provider}/start",
            get(federated_start),
        )
        .route("/{tenant}/oidc/federated/callback", get(federated_callback))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(state: AppState, admin_router: Router) -> miette::Result<()> {
    let public_addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let admin_port = state
        .settings
        .server
        .admin_port
        .unwrap_or(state.settings.server.port + 1);
    let admin_addr: SocketAddr = format!("{}:{}", state.settings.server.host, admin_port)
        .parse()
        .map_err(|e| miette::miette!("bad admin addr: {e}"))?;

    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%admin_addr, "Admin API listening");

    tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .await
            .expect("Admin server failed");
    });

    let app = router(state);
    tracing::info!(%public_addr, "Public API listening");
    let listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

// Error rendering. One body shape for every protocol failure:
// {error, error_code, error_description, error_uri, timestamp, trace_id}

fn protocol_status(kind: ProtocolErrorKind) -> StatusCode {
    match kind {
        ProtocolErrorKind::InvalidRequest
        | ProtocolErrorKind::InvalidGrant
        | ProtocolErrorKind::PkceFailure => StatusCode::BAD_REQUEST,
        ProtocolErrorKind::UnauthorizedClient
        | ProtocolErrorKind::AccountLocked
        | ProtocolErrorKind::AccountPaused => StatusCode::UNAUTHORIZED,
        ProtocolErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ProtocolErrorKind::UpstreamProvider => StatusCode::BAD_GATEWAY,
        ProtocolErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &ProtocolError) -> Value {
    json!({
        "error": err.kind.oauth_error(),
        "error_code": err.kind.code(),
        "error_description": err.kind.description(),
        "error_uri": Value::Null,
        "timestamp": secrets::now_ms(),
        "trace_id": err.trace_id,
    })
}

fn protocol_response(err: &ProtocolError) -> Response {
    let mut response =
        (protocol_status(err.kind), Json(error_body(err))).into_response();

    if let Some(retry_ms) = err.retry_after_ms {
        let secs = (retry_ms.max(0) + 999) / 1000;
        if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("retry-after"), v);
        }
    }

    response
}

/// Internal failures are logged with their trace id and rendered as a generic
/// server error; no detail crosses the trust boundary.
fn error_response(err: GatehouseError) -> Response {
    match err {
        GatehouseError::Protocol(p) => {
            tracing::debug!(code = p.kind.code(), trace_id = %p.trace_id, "Protocol error");
            protocol_response(&p)
        }
        other => {
            let p = ProtocolError::new(ProtocolErrorKind::ServerError);
            tracing::error!(error = %other, trace_id = %p.trace_id, "Internal error");
            protocol_response(&p)
        }
    }
}

fn no_store_json(value: Value) -> Response {
    let mut response = (StatusCode::OK, Json(value)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    headers.insert(
        HeaderName::from_static("pragma"),
        HeaderValue::from_static("no-cache"),
    );
    response
}

// Client authentication: client_secret_basic preferred, then client_secret_post.

fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Option<(String, Option<String>)> {
    if let Some(auth_val) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(b64) = auth_val.strip_prefix("Basic ") {
            if let Ok(decoded) = Base64::decode_vec(b64) {
                if let Ok(s) = String::from_utf8(decoded) {
                    if let Some((id, sec)) = s.split_once(':') {
                        return Some((id.to_string(), Some(sec.to_string())));
                    }
                }
            }
        }
    }

    form_id.map(|id| (id.to_string(), form_secret.map(|s| s.to_string())))
}

/// Resolve and authenticate the calling client. Confidential clients must
/// present their secret; public/device clients may not have one.
async fn authenticate_client(
    state: &AppState,
    tenant_id: &str,
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Result<crate::entities::client::Model, GatehouseError> {
    let Some((client_id, secret)) = client_credentials(headers, form_id, form_secret) else {
        return Err(GatehouseError::protocol(ProtocolErrorKind::InvalidRequest));
    };

    let client = store::tenants::get_client(&state.db, &client_id)
        .await?
        .filter(|c| c.tenant_id == tenant_id && c.enabled == 1 && c.marked_for_delete == 0)
        .ok_or_else(|| GatehouseError::protocol(ProtocolErrorKind::UnauthorizedClient))?;

    let secret_ok = match (&secret, client.client_type) {
        (Some(s), _) => store::tenants::verify_client_secret(&client, s),
        (None, crate::entities::client::ClientType::Confidential) => false,
        (None, _) => true,
    };

    if !secret_ok {
        return Err(GatehouseError::protocol(
            ProtocolErrorKind::UnauthorizedClient,
        ));
    }

    Ok(client)
}

/// Rate-limit admission for one service group, charging the usage counter on
/// success.
async fn admit(
    state: &AppState,
    tenant_id: &str,
    service_group: &str,
) -> Result<(), GatehouseError> {
    match policy::check_rate_limit(&state.db, state.usage.as_ref(), tenant_id, service_group)
        .await?
    {
        RateLimitDecision::Allow => {
            state.usage.record(tenant_id, service_group).await;
            Ok(())
        }
        RateLimitDecision::Denied { retry_after_ms } => Err(GatehouseError::protocol_retry_after(
            ProtocolErrorKind::RateLimited,
            retry_after_ms,
        )),
    }
}

// Handlers

async fn discovery(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> impl IntoResponse {
    let issuer = state.settings.issuer(&tenant);
    let metadata = json!({
        "issuer": issuer,
        "token_endpoint": format!("{}/token", issuer),
        "device_authorization_endpoint": format!("{}/devicecode", issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer),
        "grant_types_supported": [
            "authorization_code",
            "refresh_token",
            "urn:ietf:params:oauth:grant-type:device_code"
        ],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "client_secret_basic"],
        "code_challenge_methods_supported": ["S256"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [state.settings.keys.alg],
    });
    Json(metadata)
}

async fn jwks_handler(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Response {
    match state.keyring.jwks_json(&state.db, Some(&tenant)).await {
        Ok(jwks) => Json(jwks).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeRequest {
    client_id: String,
    scope: String,
}

async fn device_authorization(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Form(req): Form<DeviceCodeRequest>,
) -> Response {
    if let Err(e) = admit(&state, &tenant, SERVICE_GROUP_DEVICE).await {
        return error_response(e);
    }

    match grants::issue_device_code(&state.db, &state.settings, &tenant, &req.client_id, &req.scope)
        .await
    {
        Ok(resp) => no_store_json(serde_json::to_value(resp).unwrap_or_default()),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
    device_code: Option<String>,
}

async fn token(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Response {
    if let Err(e) = admit(&state, &tenant, SERVICE_GROUP_TOKEN).await {
        return error_response(e);
    }

    let client = match authenticate_client(
        &state,
        &tenant,
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )
    .await
    {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };

    match req.grant_type.as_str() {
        "authorization_code" => {
            let (Some(code), Some(redirect_uri)) = (req.code, req.redirect_uri) else {
                return error_response(GatehouseError::protocol(
                    ProtocolErrorKind::InvalidRequest,
                ));
            };

            match grants::redeem_authorization_code(
                &state.db,
                &state.keyring,
                &state.settings,
                grants::RedeemRequest {
                    tenant_id: tenant,
                    code,
                    client_id: client.client_id,
                    redirect_uri,
                    code_verifier: req.code_verifier,
                },
            )
            .await
            {
                Ok(tokens) => no_store_json(serde_json::to_value(tokens).unwrap_or_default()),
                Err(e) => error_response(e),
            }
        }
        "refresh_token" => {
            let Some(refresh_token) = req.refresh_token else {
                return error_response(GatehouseError::protocol(
                    ProtocolErrorKind::InvalidRequest,
                ));
            };

            match grants::refresh_tokens(
                &state.db,
                &state.keyring,
                &state.settings,
                &tenant,
                &client.client_id,
                &refresh_token,
            )
            .await
            {
                Ok(tokens) => no_store_json(serde_json::to_value(tokens).unwrap_or_default()),
                Err(e) => error_response(e),
            }
        }
        "urn:ietf:params:oauth:grant-type:device_code" => {
            let Some(device_code) = req.device_code else {
                return error_response(GatehouseError::protocol(
                    ProtocolErrorKind::InvalidRequest,
                ));
            };

            match grants::poll_device_code(
                &state.db,
                &state.keyring,
                &state.settings,
                &tenant,
                &client.client_id,
                &device_code,
            )
            .await
            {
                Ok(DevicePollOutcome::Tokens(tokens)) => {
                    no_store_json(serde_json::to_value(*tokens).unwrap_or_default())
                }
                Ok(outcome) => device_poll_error(outcome),
                Err(e) => error_response(e),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error":"unsupported_grant_type"})),
        )
            .into_response(),
    }
}

/// RFC 8628 poll outcomes that are not a token response share the standard
/// error body shape with their well-known error strings.
fn device_poll_error(outcome: DevicePollOutcome) -> Response {
    let (error, error_code, interval) = match outcome {
        DevicePollOutcome::Pending { interval } => {
            ("authorization_pending", "authorization_pending", Some(interval))
        }
        DevicePollOutcome::SlowDown { interval } => ("slow_down", "slow_down", Some(interval)),
        DevicePollOutcome::Denied => ("access_denied", "device_grant_denied", None),
        DevicePollOutcome::Expired => ("expired_token", "device_grant_expired", None),
        DevicePollOutcome::Claimed => ("invalid_grant", "device_grant_already_claimed", None),
        DevicePollOutcome::Tokens(_) => unreachable!("token outcome is handled by the caller"),
    };

    let mut body = json!({
        "error": error,
        "error_code": error_code,
        "error_description": Value::Null,
        "error_uri": Value::Null,
        "timestamp": secrets::now_ms(),
        "trace_id": secrets::random_id(),
    });
    if let Some(i) = interval {
        body["interval"] = json!(i);
    }

    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct DeviceApproveRequest {
    user_code: String,
    username: String,
    password: String,
}

/// The user-approval path for device grants: the user authenticates here
/// (subject to the tenant's login-failure policy) and approves the code shown
/// on their device.
async fn device_approve(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Form(req): Form<DeviceApproveRequest>,
) -> Response {
    let user = match policy::authenticate(
        &state.db,
        &state.settings.policy,
        &tenant,
        &req.username,
        &req.password,
    )
    .await
    {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };

    match grants::approve_device_grant(&state.db, &tenant, &req.user_code, &user.user_id).await {
        Ok(()) => Json(json!({"status": "approved"})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct DeviceDenyRequest {
    user_code: String,
}

async fn device_deny(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Form(req): Form<DeviceDenyRequest>,
) -> Response {
    match grants::deny_device_grant(&state.db, &tenant, &req.user_code).await {
        Ok(()) => Json(json!({"status": "denied"})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct FederatedStartQuery {
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    #[serde(default)]
    registration: bool,
}

fn federated_callback_uri(settings: &Settings, tenant: &str) -> String {
    format!("{}/federated/callback", settings.issuer(tenant))
}

async fn federated_start(
    State(state): State<AppState>,
    Path((tenant, provider)): Path<(String, String)>,
    Query(query): Query<FederatedStartQuery>,
) -> Response {
    use crate::entities::federated_authorization::FederatedRelType;

    let rel_type = if query.registration {
        FederatedRelType::Registration
    } else {
        FederatedRelType::Login
    };

    let callback_uri = federated_callback_uri(&state.settings, &tenant);
    let init = federation::InboundAuthRequest {
        client_id: query.client_id,
        redirect_uri: query.redirect_uri,
        scope: query.scope,
        state: query.state,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
    };

    match federation::begin(
        &state.db,
        &state.settings,
        &tenant,
        &provider,
        rel_type,
        init,
        &callback_uri,
    )
    .await
    {
        Ok(outcome) => Redirect::to(&outcome.authorize_url).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct FederatedCallbackQuery {
    state: String,
    code: String,
}

async fn federated_callback(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<FederatedCallbackQuery>,
) -> Response {
    let callback_uri = federated_callback_uri(&state.settings, &tenant);

    let identity = match federation::complete(
        &state.db,
        &state.settings,
        state.provider_client.as_ref(),
        &tenant,
        &query.state,
        &query.code,
        &callback_uri,
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => return error_response(e),
    };

    // Unknown subjects hand off to registration, which provisions the user
    // and resumes the same preserved request.
    let identity = match identity {
        federation::BrokeredIdentity::RegistrationRequired {
            claims,
            provider_id,
            init,
        } => {
            match federation::complete_registration(
                &state.db,
                &state.settings,
                &tenant,
                &provider_id,
                &claims,
                &init,
            )
            .await
            {
                Ok(identity) => identity,
                Err(e) => return error_response(e),
            }
        }
        resolved => resolved,
    };

    match identity {
        federation::BrokeredIdentity::ExistingUser {
            code,
            redirect_uri,
            state: init_state,
            ..
        } => {
            let mut location = format!("{}?code={}", redirect_uri, urlencoding::encode(&code));
            if let Some(s) = init_state {
                location.push_str(&format!("&state={}", urlencoding::encode(&s)));
            }
            Redirect::to(&location).into_response()
        }
        federation::BrokeredIdentity::RegistrationRequired { .. } => {
            unreachable!("registration is resolved above")
        }
    }
}
