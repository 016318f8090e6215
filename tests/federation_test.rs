mod helpers;

use async_trait::async_trait;
use gatehouse::entities;
use gatehouse::entities::federated_authorization::FederatedRelType;
use gatehouse::errors::{GatehouseError, ProtocolErrorKind};
use gatehouse::federation::{
    self, BrokeredIdentity, InboundAuthRequest, ProviderClient, SubjectClaims,
};
use gatehouse::grants::{self, RedeemRequest};
use gatehouse::keyring::Keyring;
use gatehouse::store;
use helpers::{test_settings, ClientBuilder, TenantBuilder, TestDb};
use sea_orm::DatabaseConnection;

/// Upstream provider stub: returns a fixed subject without any network I/O.
struct MockProviderClient {
    subject: String,
    email: Option<String>,
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn exchange_code(
        &self,
        _provider: &entities::federated_provider::Model,
        code: &str,
        _code_verifier: Option<&str>,
        _redirect_uri: &str,
    ) -> Result<SubjectClaims, GatehouseError> {
        if code == "bad-code" {
            return Err(GatehouseError::protocol(ProtocolErrorKind::UpstreamProvider));
        }
        Ok(SubjectClaims {
            subject: self.subject.clone(),
            email: self.email.clone(),
            name: Some("Alice Example".to_string()),
        })
    }
}

async fn seed_provider(db: &DatabaseConnection, tenant_id: &str, use_pkce: bool) -> String {
    let provider_id = "upstream-idp".to_string();
    store::federated::put_provider(
        db,
        entities::federated_provider::Model {
            provider_id: provider_id.clone(),
            tenant_id: tenant_id.to_string(),
            issuer: "https://idp.upstream.example".to_string(),
            client_id: "gatehouse-client".to_string(),
            client_secret: "s3cret".to_string(),
            authorize_endpoint: "https://idp.upstream.example/authorize".to_string(),
            token_endpoint: "https://idp.upstream.example/token".to_string(),
            userinfo_endpoint: Some("https://idp.upstream.example/userinfo".to_string()),
            scopes: "openid email".to_string(),
            use_pkce: if use_pkce { 1 } else { 0 },
            enabled: 1,
        },
    )
    .await
    .expect("Failed to seed provider");
    provider_id
}

fn inbound(client_id: &str) -> InboundAuthRequest {
    InboundAuthRequest {
        client_id: client_id.to_string(),
        redirect_uri: "http://localhost:3000/callback".to_string(),
        scope: "openid profile".to_string(),
        state: Some("caller-state".to_string()),
        code_challenge: None,
        code_challenge_method: None,
    }
}

#[tokio::test]
async fn begin_builds_the_upstream_authorize_url_with_pkce() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).create(db).await;
    let provider_id = seed_provider(db, &tenant.tenant_id, true).await;

    let outcome = federation::begin(
        db,
        &settings,
        &tenant.tenant_id,
        &provider_id,
        FederatedRelType::Login,
        inbound(&client.model.client_id),
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("begin failed");

    assert!(outcome
        .authorize_url
        .starts_with("https://idp.upstream.example/authorize?"));
    assert!(outcome.authorize_url.contains("response_type=code"));
    assert!(outcome.authorize_url.contains("code_challenge_method=S256"));
    assert!(outcome.authorize_url.contains(&format!(
        "state={}",
        urlencoding::encode(&outcome.state)
    )));
}

#[tokio::test]
async fn callback_matches_an_existing_user_and_resumes_the_local_flow() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();
    let keyring = Keyring::ephemeral(86_400_000);

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).create(db).await;
    let provider_id = seed_provider(db, &tenant.tenant_id, true).await;

    // Pre-provisioned user whose federated subject matches the upstream claim
    let user = store::tenants::create_federated_user(
        db,
        &tenant.tenant_id,
        "alice@upstream.example",
        &format!("{}:subject-1", provider_id),
        Some("alice@upstream.example".to_string()),
    )
    .await
    .expect("seed user");

    let mock = MockProviderClient {
        subject: "subject-1".to_string(),
        email: Some("alice@upstream.example".to_string()),
    };

    let outcome = federation::begin(
        db,
        &settings,
        &tenant.tenant_id,
        &provider_id,
        FederatedRelType::Login,
        inbound(&client.model.client_id),
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("begin failed");

    let identity = federation::complete(
        db,
        &settings,
        &mock,
        &tenant.tenant_id,
        &outcome.state,
        "provider-code",
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("complete failed");

    let BrokeredIdentity::ExistingUser {
        user: matched,
        code,
        redirect_uri,
        state,
    } = identity
    else {
        panic!("expected an existing-user resolution");
    };

    assert_eq!(matched.user_id, user.user_id);
    assert_eq!(redirect_uri, "http://localhost:3000/callback");
    assert_eq!(state.as_deref(), Some("caller-state"));

    // The minted local code redeems through the grant issuer as usual
    let tokens = grants::redeem_authorization_code(
        db,
        &keyring,
        &settings,
        RedeemRequest {
            tenant_id: tenant.tenant_id.clone(),
            code,
            client_id: client.model.client_id.clone(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            code_verifier: None,
        },
    )
    .await
    .expect("redeem of the brokered code failed");
    assert!(tokens.id_token.is_some());
}

#[tokio::test]
async fn unknown_subject_hands_off_to_registration() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).create(db).await;
    let provider_id = seed_provider(db, &tenant.tenant_id, false).await;

    let mock = MockProviderClient {
        subject: "fresh-subject".to_string(),
        email: Some("new@upstream.example".to_string()),
    };

    let outcome = federation::begin(
        db,
        &settings,
        &tenant.tenant_id,
        &provider_id,
        FederatedRelType::Registration,
        inbound(&client.model.client_id),
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("begin failed");

    let identity = federation::complete(
        db,
        &settings,
        &mock,
        &tenant.tenant_id,
        &outcome.state,
        "provider-code",
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("complete failed");

    let BrokeredIdentity::RegistrationRequired {
        claims,
        provider_id: pid,
        init,
    } = identity
    else {
        panic!("expected a registration handoff");
    };
    assert_eq!(claims.subject, "fresh-subject");

    // Registration provisions the user and resumes the preserved request
    let resumed = federation::complete_registration(
        db,
        &settings,
        &tenant.tenant_id,
        &pid,
        &claims,
        &init,
    )
    .await
    .expect("registration failed");

    let BrokeredIdentity::ExistingUser { user, code, .. } = resumed else {
        panic!("registration should resolve to a user");
    };
    assert_eq!(
        user.federated_subject.as_deref(),
        Some(format!("{}:fresh-subject", pid).as_str())
    );
    assert!(!code.is_empty());
}

#[tokio::test]
async fn correlation_state_is_single_use() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).create(db).await;
    let provider_id = seed_provider(db, &tenant.tenant_id, false).await;

    let mock = MockProviderClient {
        subject: "subject-1".to_string(),
        email: None,
    };

    let outcome = federation::begin(
        db,
        &settings,
        &tenant.tenant_id,
        &provider_id,
        FederatedRelType::Login,
        inbound(&client.model.client_id),
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("begin failed");

    federation::complete(
        db,
        &settings,
        &mock,
        &tenant.tenant_id,
        &outcome.state,
        "provider-code",
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("first completion succeeds");

    let err = federation::complete(
        db,
        &settings,
        &mock,
        &tenant.tenant_id,
        &outcome.state,
        "provider-code",
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect_err("replayed state must fail");

    match err {
        GatehouseError::Protocol(p) => assert_eq!(p.kind, ProtocolErrorKind::InvalidGrant),
        other => panic!("expected InvalidGrant, got {}", other),
    }
}

#[tokio::test]
async fn upstream_failure_consumes_the_state_and_surfaces_upstream_error() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).create(db).await;
    let provider_id = seed_provider(db, &tenant.tenant_id, false).await;

    let mock = MockProviderClient {
        subject: "subject-1".to_string(),
        email: None,
    };

    let outcome = federation::begin(
        db,
        &settings,
        &tenant.tenant_id,
        &provider_id,
        FederatedRelType::Login,
        inbound(&client.model.client_id),
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect("begin failed");

    let err = federation::complete(
        db,
        &settings,
        &mock,
        &tenant.tenant_id,
        &outcome.state,
        "bad-code",
        "https://login.test/acme/oidc/federated/callback",
    )
    .await
    .expect_err("upstream failure must surface");

    match err {
        GatehouseError::Protocol(p) => assert_eq!(p.kind, ProtocolErrorKind::UpstreamProvider),
        other => panic!("expected UpstreamProvider, got {}", other),
    }
}
