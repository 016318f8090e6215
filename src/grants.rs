//! Grant issuer: the authorization-code (with PKCE), device-code, and
//! refresh-token state machines, plus the multi-step authentication flows.
//! Every failure surfaces as a [`ProtocolError`] with a stable code; nothing
//! here distinguishes "unknown" from "already used" to callers.

use crate::entities;
use crate::entities::client::ClientType;
use crate::entities::device_code_grant::DeviceAuthorizationStatus;
use crate::errors::{GatehouseError, ProtocolErrorKind};
use crate::keyring::{Keyring, USE_TOKEN_SIGNING};
use crate::secrets;
use crate::settings::Settings;
use crate::store;
use crate::store::flows::{FlowSteps, StepOutcome};
use josekit::jwt::JwtPayload;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

fn protocol(kind: ProtocolErrorKind) -> GatehouseError {
    GatehouseError::protocol(kind)
}

/// Load and vet the tenant: unknown or disabled tenants are indistinguishable.
async fn require_tenant(
    db: &DatabaseConnection,
    tenant_id: &str,
) -> Result<entities::tenant::Model, GatehouseError> {
    match store::tenants::get_tenant(db, tenant_id).await? {
        Some(t) if t.enabled == 1 => Ok(t),
        _ => Err(protocol(ProtocolErrorKind::UnauthorizedClient)),
    }
}

/// Load and vet the client against its tenant: must exist, belong to the
/// tenant, be enabled, and not be marked for deletion.
async fn require_client(
    db: &DatabaseConnection,
    tenant_id: &str,
    client_id: &str,
) -> Result<entities::client::Model, GatehouseError> {
    match store::tenants::get_client(db, client_id).await? {
        Some(c)
            if c.tenant_id == tenant_id && c.enabled == 1 && c.marked_for_delete == 0 =>
        {
            Ok(c)
        }
        _ => Err(protocol(ProtocolErrorKind::UnauthorizedClient)),
    }
}

/// Intersect the requested scope with what the client supports. An empty
/// intersection fails the request rather than silently issuing nothing.
fn intersect_scope(
    requested: &str,
    client: &entities::client::Model,
) -> Result<String, GatehouseError> {
    let supported = store::tenants::client_scopes(client);
    let granted: Vec<&str> = requested
        .split_whitespace()
        .filter(|s| supported.iter().any(|sup| sup == s))
        .collect();

    if granted.is_empty() {
        return Err(protocol(ProtocolErrorKind::InvalidRequest));
    }
    Ok(granted.join(" "))
}

pub struct AuthorizeRequest {
    pub tenant_id: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

/// Issue a short-lived, single-use authorization code bound to the client,
/// redirect URI, and (optionally) a PKCE challenge.
pub async fn issue_authorization_code(
    db: &DatabaseConnection,
    settings: &Settings,
    req: AuthorizeRequest,
) -> Result<String, GatehouseError> {
    require_tenant(db, &req.tenant_id).await?;
    let client = require_client(db, &req.tenant_id, &req.client_id).await?;

    if !store::tenants::client_redirect_uris(&client)
        .iter()
        .any(|uri| *uri == req.redirect_uri)
    {
        return Err(protocol(ProtocolErrorKind::InvalidRequest));
    }

    let scope = intersect_scope(&req.scope, &client)?;

    store::codes::issue(
        db,
        store::codes::NewAuthCode {
            tenant_id: req.tenant_id,
            client_id: req.client_id,
            user_id: req.user_id,
            redirect_uri: req.redirect_uri,
            scope,
            code_challenge: req.code_challenge,
            code_challenge_method: req.code_challenge_method,
            nonce: req.nonce,
            ttl_ms: settings.grants.auth_code_ttl_minutes * 60_000,
        },
    )
    .await
}

pub struct RedeemRequest {
    pub tenant_id: String,
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_verifier: Option<String>,
}

/// Redeem an authorization code for tokens. The code is consumed atomically;
/// a second redemption, a binding mismatch, and an expired code all surface
/// as InvalidGrant, a PKCE mismatch as PKCEFailure.
pub async fn redeem_authorization_code(
    db: &DatabaseConnection,
    keyring: &Keyring,
    settings: &Settings,
    req: RedeemRequest,
) -> Result<TokenSet, GatehouseError> {
    require_tenant(db, &req.tenant_id).await?;
    let client = require_client(db, &req.tenant_id, &req.client_id).await?;

    let code_row = store::codes::consume(db, &req.code)
        .await?
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))?;

    if code_row.tenant_id != req.tenant_id
        || code_row.client_id != req.client_id
        || code_row.redirect_uri != req.redirect_uri
    {
        return Err(protocol(ProtocolErrorKind::InvalidGrant));
    }

    if let Some(challenge) = &code_row.code_challenge {
        let verifier = req
            .code_verifier
            .as_deref()
            .ok_or_else(|| protocol(ProtocolErrorKind::InvalidRequest))?;

        let method = code_row.code_challenge_method.as_deref().unwrap_or("S256");
        if method != "S256" || secrets::pkce_s256(verifier) != *challenge {
            return Err(protocol(ProtocolErrorKind::PkceFailure));
        }
    }

    mint_token_set(
        db,
        keyring,
        settings,
        &client,
        &code_row.user_id,
        &code_row.scope,
        code_row.nonce.as_deref(),
        &code_row.redirect_uri,
        code_row.code_challenge.clone(),
        code_row.code_challenge_method.clone(),
    )
    .await
}

#[derive(Debug, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// Start a device authorization (RFC 8628). Only device-type clients qualify;
/// both secrets are independent and stored hashed.
pub async fn issue_device_code(
    db: &DatabaseConnection,
    settings: &Settings,
    tenant_id: &str,
    client_id: &str,
    scope: &str,
) -> Result<DeviceCodeResponse, GatehouseError> {
    require_tenant(db, tenant_id).await?;
    let client = require_client(db, tenant_id, client_id).await?;

    if client.client_type != ClientType::Device {
        return Err(protocol(ProtocolErrorKind::UnauthorizedClient));
    }

    let scope = intersect_scope(scope, &client)?;
    let ttl_ms = settings.grants.device_code_ttl_minutes * 60_000;
    let interval = settings.grants.device_poll_interval_secs;

    let issued = store::device::issue(db, tenant_id, client_id, &scope, ttl_ms, interval).await?;

    Ok(DeviceCodeResponse {
        device_code: issued.device_code,
        user_code: issued.user_code,
        verification_uri: format!("{}/device", settings.issuer(tenant_id)),
        expires_in: ttl_ms / 1000,
        interval,
    })
}

pub enum DevicePollOutcome {
    Pending { interval: i64 },
    SlowDown { interval: i64 },
    Tokens(Box<TokenSet>),
    /// Approved and already claimed: the status is reported, tokens are not.
    Claimed,
    Denied,
    Expired,
}

/// Client-driven short poll. Tokens are handed out on exactly one poll: the
/// winner of the Approved -> Consumed transition. Everything after reports
/// the claimed status.
pub async fn poll_device_code(
    db: &DatabaseConnection,
    keyring: &Keyring,
    settings: &Settings,
    tenant_id: &str,
    client_id: &str,
    device_code: &str,
) -> Result<DevicePollOutcome, GatehouseError> {
    require_tenant(db, tenant_id).await?;
    let client = require_client(db, tenant_id, client_id).await?;

    let grant = store::device::find_by_device_code(db, device_code)
        .await?
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))?;

    if grant.tenant_id != tenant_id || grant.client_id != client_id {
        return Err(protocol(ProtocolErrorKind::InvalidGrant));
    }

    let now = secrets::now_ms();
    if grant.status == DeviceAuthorizationStatus::Expired || grant.expires_at <= now {
        return Ok(DevicePollOutcome::Expired);
    }

    // RFC 8628 slow_down: polling faster than the advertised interval bumps it.
    if let Some(last) = grant.last_poll_at {
        if now - last < grant.poll_interval * 1000 {
            store::device::bump_interval(db, &grant.device_code_id, 5).await?;
            store::device::record_poll(db, &grant.device_code_id, now).await?;
            return Ok(DevicePollOutcome::SlowDown {
                interval: grant.poll_interval + 5,
            });
        }
    }
    store::device::record_poll(db, &grant.device_code_id, now).await?;

    match grant.status {
        DeviceAuthorizationStatus::Pending => Ok(DevicePollOutcome::Pending {
            interval: grant.poll_interval,
        }),
        DeviceAuthorizationStatus::Denied => Ok(DevicePollOutcome::Denied),
        DeviceAuthorizationStatus::Consumed => Ok(DevicePollOutcome::Claimed),
        DeviceAuthorizationStatus::Approved => {
            if !store::device::claim_tokens(db, &grant.device_code_id).await? {
                // A concurrent poll claimed first.
                return Ok(DevicePollOutcome::Claimed);
            }

            let user_id = grant
                .user_id
                .as_deref()
                .ok_or_else(|| protocol(ProtocolErrorKind::ServerError))?;

            let tokens = mint_token_set(
                db,
                keyring,
                settings,
                &client,
                user_id,
                &grant.scope,
                None,
                "",
                None,
                None,
            )
            .await?;

            Ok(DevicePollOutcome::Tokens(Box::new(tokens)))
        }
        DeviceAuthorizationStatus::Expired => Ok(DevicePollOutcome::Expired),
    }
}

/// The user-approval path: resolve the user code shown on the second device.
pub async fn approve_device_grant(
    db: &DatabaseConnection,
    tenant_id: &str,
    user_code: &str,
    user_id: &str,
) -> Result<(), GatehouseError> {
    require_tenant(db, tenant_id).await?;

    let user = store::tenants::get_user(db, user_id)
        .await?
        .filter(|u| u.tenant_id == tenant_id && u.enabled == 1)
        .ok_or_else(|| protocol(ProtocolErrorKind::UnauthorizedClient))?;

    let grant = store::device::find_by_user_code(db, user_code)
        .await?
        .filter(|g| g.tenant_id == tenant_id)
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))?;

    if !store::device::approve(db, &grant.device_code_id, &user.user_id).await? {
        return Err(protocol(ProtocolErrorKind::InvalidGrant));
    }
    Ok(())
}

pub async fn deny_device_grant(
    db: &DatabaseConnection,
    tenant_id: &str,
    user_code: &str,
) -> Result<(), GatehouseError> {
    require_tenant(db, tenant_id).await?;

    let grant = store::device::find_by_user_code(db, user_code)
        .await?
        .filter(|g| g.tenant_id == tenant_id)
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))?;

    if !store::device::deny(db, &grant.device_code_id).await? {
        return Err(protocol(ProtocolErrorKind::InvalidGrant));
    }
    Ok(())
}

/// Rotate a refresh grant and mint fresh tokens. The old token is dead the
/// instant this returns; a concurrent redemption of the same token gets
/// InvalidGrant, never a half-applied rotation.
pub async fn refresh_tokens(
    db: &DatabaseConnection,
    keyring: &Keyring,
    settings: &Settings,
    tenant_id: &str,
    client_id: &str,
    refresh_token: &str,
) -> Result<TokenSet, GatehouseError> {
    require_tenant(db, tenant_id).await?;
    let client = require_client(db, tenant_id, client_id).await?;

    let ttl_ms = settings.grants.refresh_token_ttl_days * 24 * 60 * 60 * 1000;
    let outcome = store::refresh::rotate(
        db,
        refresh_token,
        client_id,
        client.max_refresh_token_count,
        ttl_ms,
    )
    .await?;

    let (previous, token, model) = match outcome {
        store::refresh::RotationOutcome::Rotated {
            previous,
            token,
            model,
        } => (previous, token, model),
        store::refresh::RotationOutcome::CeilingReached
        | store::refresh::RotationOutcome::NotFound => {
            return Err(protocol(ProtocolErrorKind::InvalidGrant));
        }
    };

    if previous.tenant_id != tenant_id {
        // Cross-tenant token presented through the wrong tenant path; the
        // rotation already happened, kill the successor too.
        store::refresh::revoke(db, &token).await?;
        return Err(protocol(ProtocolErrorKind::InvalidGrant));
    }

    let mut tokens = mint_access_and_id(
        db,
        keyring,
        settings,
        &client,
        &model.user_id,
        &model.scope,
        None,
    )
    .await?;
    tokens.refresh_token = Some(token);
    Ok(tokens)
}

/// Mint access/ID tokens plus, for offline_access scope, a refresh grant.
#[allow(clippy::too_many_arguments)]
async fn mint_token_set(
    db: &DatabaseConnection,
    keyring: &Keyring,
    settings: &Settings,
    client: &entities::client::Model,
    user_id: &str,
    scope: &str,
    nonce: Option<&str>,
    redirect_uri: &str,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
) -> Result<TokenSet, GatehouseError> {
    let mut tokens =
        mint_access_and_id(db, keyring, settings, client, user_id, scope, nonce).await?;

    if scope.split_whitespace().any(|s| s == "offline_access") {
        let refresh = store::refresh::issue(
            db,
            store::refresh::NewRefreshGrant {
                tenant_id: client.tenant_id.clone(),
                user_id: user_id.to_string(),
                client_id: client.client_id.clone(),
                redirect_uri: redirect_uri.to_string(),
                client_type: client.client_type,
                scope: scope.to_string(),
                code_challenge,
                code_challenge_method,
                ttl_ms: settings.grants.refresh_token_ttl_days * 24 * 60 * 60 * 1000,
            },
        )
        .await?;
        tokens.refresh_token = Some(refresh);
    }

    Ok(tokens)
}

async fn mint_access_and_id(
    db: &DatabaseConnection,
    keyring: &Keyring,
    settings: &Settings,
    client: &entities::client::Model,
    user_id: &str,
    scope: &str,
    nonce: Option<&str>,
) -> Result<TokenSet, GatehouseError> {
    let issuer = settings.issuer(&client.tenant_id);
    let expires_in = settings.grants.access_token_ttl_minutes * 60;
    let now = SystemTime::now();
    let exp = now + Duration::from_secs(expires_in as u64);

    let mut access = JwtPayload::new();
    access.set_issuer(&issuer);
    access.set_subject(user_id);
    access.set_audience(vec![client.client_id.as_str()]);
    access.set_issued_at(&now);
    access.set_expires_at(&exp);
    access.set_jwt_id(secrets::random_id());
    let _ = access.set_claim("scope", Some(serde_json::json!(scope)));
    let _ = access.set_claim("tenant", Some(serde_json::json!(client.tenant_id)));

    let access_token = keyring
        .sign_jwt(db, Some(&client.tenant_id), USE_TOKEN_SIGNING, &access)
        .await?;

    let id_token = if scope.split_whitespace().any(|s| s == "openid") {
        let mut id = JwtPayload::new();
        id.set_issuer(&issuer);
        id.set_subject(user_id);
        id.set_audience(vec![client.client_id.as_str()]);
        id.set_issued_at(&now);
        id.set_expires_at(&exp);
        if let Some(n) = nonce {
            let _ = id.set_claim("nonce", Some(serde_json::Value::String(n.to_string())));
        }
        let _ = id.set_claim(
            "auth_time",
            Some(serde_json::json!(
                now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
            )),
        );

        Some(
            keyring
                .sign_jwt(db, Some(&client.tenant_id), USE_TOKEN_SIGNING, &id)
                .await?,
        )
    } else {
        None
    };

    Ok(TokenSet {
        access_token,
        token_type: "bearer".to_string(),
        expires_in,
        id_token,
        refresh_token: None,
        scope: scope.to_string(),
    })
}

// Multi-step authentication/registration flows. Thin over the store: the
// grant layer adds tenant vetting and the configured TTL bound.

pub async fn begin_flow(
    db: &DatabaseConnection,
    settings: &Settings,
    tenant_id: &str,
    flow_type: entities::auth_flow::FlowType,
    plan: Vec<String>,
) -> Result<String, GatehouseError> {
    require_tenant(db, tenant_id).await?;
    store::flows::begin(
        db,
        tenant_id,
        flow_type,
        plan,
        settings.grants.flow_ttl_minutes * 60_000,
    )
    .await
}

pub async fn advance_flow(
    db: &DatabaseConnection,
    flow_token: &str,
    outcome: StepOutcome,
    user_id: Option<&str>,
) -> Result<FlowSteps, GatehouseError> {
    store::flows::advance(db, flow_token, outcome, user_id)
        .await?
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))
}

pub async fn get_flow(
    db: &DatabaseConnection,
    flow_token: &str,
) -> Result<(entities::auth_flow::Model, FlowSteps), GatehouseError> {
    store::flows::get(db, flow_token)
        .await?
        .ok_or_else(|| protocol(ProtocolErrorKind::InvalidGrant))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_scopes(scopes: &[&str]) -> entities::client::Model {
        entities::client::Model {
            client_id: "c".into(),
            tenant_id: "t".into(),
            client_secret_hash: String::new(),
            client_name: None,
            client_type: ClientType::Confidential,
            redirect_uris: "[]".into(),
            scopes: serde_json::to_string(scopes).unwrap(),
            enabled: 1,
            marked_for_delete: 0,
            max_refresh_token_count: 50,
            created_at: 0,
        }
    }

    #[test]
    fn scope_intersection_keeps_supported_values() {
        let client = client_with_scopes(&["openid", "profile", "email"]);
        let granted = intersect_scope("openid email payments", &client).unwrap();
        assert_eq!(granted, "openid email");
    }

    #[test]
    fn empty_scope_intersection_is_rejected() {
        let client = client_with_scopes(&["openid"]);
        assert!(intersect_scope("payments ledger", &client).is_err());
    }
}
