//! Federated broker: relays an authorization request to an external OIDC
//! provider and reconciles the callback into a local grant. The caller's
//! original request parameters ride along in the correlation state so the
//! local flow resumes exactly where it left off.

use crate::entities;
use crate::entities::federated_authorization::FederatedRelType;
use crate::errors::{GatehouseError, ProtocolErrorKind};
use crate::grants;
use crate::secrets;
use crate::settings::Settings;
use crate::store;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::time::Duration;

/// Subject identity extracted from the upstream provider.
#[derive(Debug, Clone)]
pub struct SubjectClaims {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// External collaborator performing the upstream code exchange. Owns its own
/// retry/timeout behavior; the broker only sees claims or an error.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn exchange_code(
        &self,
        provider: &entities::federated_provider::Model,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> Result<SubjectClaims, GatehouseError>;
}

pub struct HttpProviderClient {
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration) -> Result<Self, GatehouseError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatehouseError::Other(format!("http client build failed: {}", e)))?;
        Ok(Self { http })
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UpstreamUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn exchange_code(
        &self,
        provider: &entities::federated_provider::Model,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> Result<SubjectClaims, GatehouseError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("client_id", &provider.client_id),
            ("client_secret", &provider.client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let token_res = self
            .http
            .post(&provider.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, provider_id = %provider.provider_id, "Upstream token exchange failed");
                GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider)
            })?;

        if !token_res.status().is_success() {
            let status = token_res.status();
            tracing::error!(status = %status, provider_id = %provider.provider_id, "Upstream token endpoint error");
            return Err(GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider));
        }

        let token_data: UpstreamTokenResponse = token_res.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse upstream token response");
            GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider)
        })?;

        let userinfo_endpoint = provider
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider))?;

        let info: UpstreamUserInfo = self
            .http
            .get(userinfo_endpoint)
            .bearer_auth(&token_data.access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to fetch upstream userinfo");
                GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider)
            })?
            .json()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to parse upstream userinfo");
                GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider)
            })?;

        Ok(SubjectClaims {
            subject: info.sub,
            email: info.email,
            name: info.name,
        })
    }
}

/// The caller's inbound authorization request, preserved verbatim across the
/// external round trip.
#[derive(Debug, Clone)]
pub struct InboundAuthRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub struct BeginOutcome {
    /// Correlation token; returned to the provider in the callback.
    pub state: String,
    /// Upstream authorize URL to redirect the user agent to.
    pub authorize_url: String,
}

/// Start the outbound leg: persist the correlation state (with an outbound
/// PKCE verifier when the provider requires one) and build the upstream
/// authorize URL.
pub async fn begin(
    db: &DatabaseConnection,
    settings: &Settings,
    tenant_id: &str,
    provider_id: &str,
    rel_type: FederatedRelType,
    init: InboundAuthRequest,
    callback_uri: &str,
) -> Result<BeginOutcome, GatehouseError> {
    let provider = store::federated::get_provider(db, provider_id)
        .await?
        .filter(|p| p.tenant_id == tenant_id && p.enabled == 1)
        .ok_or_else(|| GatehouseError::protocol(ProtocolErrorKind::InvalidRequest))?;

    let code_verifier = if provider.use_pkce != 0 {
        Some(secrets::random_secret())
    } else {
        None
    };

    let state = store::federated::begin(
        db,
        store::federated::NewFederatedAuthorization {
            rel_type,
            provider_id: provider.provider_id.clone(),
            tenant_id: tenant_id.to_string(),
            code_verifier: code_verifier.clone(),
            init_client_id: init.client_id,
            init_redirect_uri: init.redirect_uri,
            init_scope: init.scope,
            init_state: init.state,
            init_code_challenge: init.code_challenge,
            init_code_challenge_method: init.code_challenge_method,
            ttl_ms: settings.federation.state_ttl_minutes * 60_000,
        },
    )
    .await?;

    let mut authorize_url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        provider.authorize_endpoint,
        urlencoding::encode(&provider.client_id),
        urlencoding::encode(callback_uri),
        urlencoding::encode(&provider.scopes),
        urlencoding::encode(&state),
    );
    if let Some(verifier) = &code_verifier {
        authorize_url.push_str(&format!(
            "&code_challenge={}&code_challenge_method=S256",
            secrets::pkce_s256(verifier)
        ));
    }

    Ok(BeginOutcome {
        state,
        authorize_url,
    })
}

/// How the round trip resolved: either a local user matched the federated
/// subject and the preserved request was resumed through the grant issuer, or
/// the identity is new and registration takes over with the claims in hand.
#[derive(Debug)]
pub enum BrokeredIdentity {
    ExistingUser {
        user: entities::user::Model,
        /// Local authorization code minted from the preserved init request.
        code: String,
        redirect_uri: String,
        state: Option<String>,
    },
    RegistrationRequired {
        claims: SubjectClaims,
        provider_id: String,
        init: InboundAuthRequest,
    },
}

/// Reconcile the provider callback. The correlation state is single-use and
/// consumed here; replaying the callback yields InvalidGrant.
pub async fn complete(
    db: &DatabaseConnection,
    settings: &Settings,
    provider_client: &dyn ProviderClient,
    tenant_id: &str,
    state: &str,
    provider_code: &str,
    callback_uri: &str,
) -> Result<BrokeredIdentity, GatehouseError> {
    let rel = store::federated::consume_state(db, state)
        .await?
        .filter(|r| r.tenant_id == tenant_id)
        .ok_or_else(|| GatehouseError::protocol(ProtocolErrorKind::InvalidGrant))?;

    let provider = store::federated::get_provider(db, &rel.provider_id)
        .await?
        .filter(|p| p.enabled == 1)
        .ok_or_else(|| GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider))?;

    let claims = provider_client
        .exchange_code(
            &provider,
            provider_code,
            rel.code_verifier.as_deref(),
            callback_uri,
        )
        .await?;

    // Federated subjects are scoped by provider so two providers can not
    // collide on bare subject values.
    let federated_subject = format!("{}:{}", provider.provider_id, claims.subject);

    let init = InboundAuthRequest {
        client_id: rel.init_client_id.clone(),
        redirect_uri: rel.init_redirect_uri.clone(),
        scope: rel.init_scope.clone(),
        state: rel.init_state.clone(),
        code_challenge: rel.init_code_challenge.clone(),
        code_challenge_method: rel.init_code_challenge_method.clone(),
    };

    let existing =
        store::tenants::get_user_by_federated_subject(db, tenant_id, &federated_subject).await?;

    let Some(user) = existing else {
        return Ok(BrokeredIdentity::RegistrationRequired {
            claims,
            provider_id: provider.provider_id,
            init,
        });
    };

    if rel.rel_type == FederatedRelType::Registration {
        // Registration round trip for an already-known subject resumes as a
        // plain login.
        tracing::info!(user_id = %user.user_id, "Federated registration matched an existing user");
    }

    // Re-enter the grant issuer with the preserved inbound request.
    let code = grants::issue_authorization_code(
        db,
        settings,
        grants::AuthorizeRequest {
            tenant_id: tenant_id.to_string(),
            client_id: init.client_id.clone(),
            user_id: user.user_id.clone(),
            redirect_uri: init.redirect_uri.clone(),
            scope: init.scope.clone(),
            code_challenge: init.code_challenge.clone(),
            code_challenge_method: init.code_challenge_method.clone(),
            nonce: None,
        },
    )
    .await?;

    Ok(BrokeredIdentity::ExistingUser {
        user,
        code,
        redirect_uri: init.redirect_uri,
        state: init.state,
    })
}

/// Finish a registration handoff: provision the user against the federated
/// subject and resume the preserved request through the grant issuer.
pub async fn complete_registration(
    db: &DatabaseConnection,
    settings: &Settings,
    tenant_id: &str,
    provider_id: &str,
    claims: &SubjectClaims,
    init: &InboundAuthRequest,
) -> Result<BrokeredIdentity, GatehouseError> {
    let federated_subject = format!("{}:{}", provider_id, claims.subject);
    let username = claims
        .email
        .clone()
        .unwrap_or_else(|| federated_subject.clone());

    let user = store::tenants::create_federated_user(
        db,
        tenant_id,
        &username,
        &federated_subject,
        claims.email.clone(),
    )
    .await?;

    let code = grants::issue_authorization_code(
        db,
        settings,
        grants::AuthorizeRequest {
            tenant_id: tenant_id.to_string(),
            client_id: init.client_id.clone(),
            user_id: user.user_id.clone(),
            redirect_uri: init.redirect_uri.clone(),
            scope: init.scope.clone(),
            code_challenge: init.code_challenge.clone(),
            code_challenge_method: init.code_challenge_method.clone(),
            nonce: None,
        },
    )
    .await?;

    Ok(BrokeredIdentity::ExistingUser {
        user,
        code,
        redirect_uri: init.redirect_uri.clone(),
        state: init.state.clone(),
    })
}
