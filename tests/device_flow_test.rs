mod helpers;

use gatehouse::errors::{GatehouseError, ProtocolErrorKind};
use gatehouse::grants::{self, DevicePollOutcome};
use gatehouse::keyring::Keyring;
use gatehouse::store;
use helpers::{test_settings, ClientBuilder, TenantBuilder, TestDb, UserBuilder};

fn assert_protocol(err: GatehouseError, kind: ProtocolErrorKind) {
    match err {
        GatehouseError::Protocol(p) => assert_eq!(p.kind, kind),
        other => panic!("expected protocol error {:?}, got {}", kind, other),
    }
}

#[tokio::test]
async fn device_flow_requires_a_device_client() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let confidential = ClientBuilder::new(&tenant.tenant_id).create(db).await;

    let err = grants::issue_device_code(
        db,
        &settings,
        &tenant.tenant_id,
        &confidential.model.client_id,
        "openid",
    )
    .await
    .expect_err("non-device client must be refused");

    assert_protocol(err, ProtocolErrorKind::UnauthorizedClient);
}

#[tokio::test]
async fn device_grant_issues_two_independent_secrets() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;

    let resp = grants::issue_device_code(
        db,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid profile",
    )
    .await
    .expect("device code issuance failed");

    assert_ne!(resp.device_code, resp.user_code);
    assert_eq!(resp.user_code.len(), 9);
    assert!(resp.expires_in > 0);

    // Neither secret is stored in the clear
    let grant = store::device::find_by_device_code(db, &resp.device_code)
        .await
        .expect("lookup failed")
        .expect("grant row expected");
    assert_ne!(grant.device_code_hash, resp.device_code);
    assert_ne!(grant.user_code_hash, resp.user_code);
}

#[tokio::test]
async fn poll_returns_pending_until_approved_and_tokens_exactly_once() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();
    let keyring = Keyring::ephemeral(86_400_000);

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;
    let user = UserBuilder::new(&tenant.tenant_id, "alice").create(db).await;

    let resp = grants::issue_device_code(
        db,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid",
    )
    .await
    .expect("device code issuance failed");

    // Pending before approval
    let outcome = grants::poll_device_code(
        db,
        &keyring,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        &resp.device_code,
    )
    .await
    .expect("poll failed");
    assert!(matches!(outcome, DevicePollOutcome::Pending { .. }));

    grants::approve_device_grant(db, &tenant.tenant_id, &resp.user_code, &user.user_id)
        .await
        .expect("approval failed");

    // First poll after approval: tokens
    let outcome = grants::poll_device_code(
        db,
        &keyring,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        &resp.device_code,
    )
    .await
    .expect("poll failed");
    let DevicePollOutcome::Tokens(tokens) = outcome else {
        panic!("expected tokens on the first post-approval poll");
    };
    assert!(!tokens.access_token.is_empty());

    // Second poll: the claimed status, never tokens again
    let outcome = grants::poll_device_code(
        db,
        &keyring,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        &resp.device_code,
    )
    .await
    .expect("poll failed");
    assert!(matches!(outcome, DevicePollOutcome::Claimed));
}

#[tokio::test]
async fn denied_grant_reports_denied() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();
    let keyring = Keyring::ephemeral(86_400_000);

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;

    let resp = grants::issue_device_code(
        db,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid",
    )
    .await
    .expect("device code issuance failed");

    grants::deny_device_grant(db, &tenant.tenant_id, &resp.user_code)
        .await
        .expect("deny failed");

    let outcome = grants::poll_device_code(
        db,
        &keyring,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        &resp.device_code,
    )
    .await
    .expect("poll failed");
    assert!(matches!(outcome, DevicePollOutcome::Denied));

    // A denied grant can not be approved afterwards
    let user = UserBuilder::new(&tenant.tenant_id, "alice").create(db).await;
    let err = grants::approve_device_grant(db, &tenant.tenant_id, &resp.user_code, &user.user_id)
        .await
        .expect_err("approving a denied grant must fail");
    assert_protocol(err, ProtocolErrorKind::InvalidGrant);
}

#[tokio::test]
async fn expired_grant_reports_expired() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();
    let keyring = Keyring::ephemeral(86_400_000);

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;

    // Issue directly through the store with an already-elapsed TTL
    let issued = store::device::issue(
        db,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid",
        -1000,
        0,
    )
    .await
    .expect("issue failed");

    let outcome = grants::poll_device_code(
        db,
        &keyring,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        &issued.device_code,
    )
    .await
    .expect("poll failed");
    assert!(matches!(outcome, DevicePollOutcome::Expired));
}

#[tokio::test]
async fn polling_faster_than_the_interval_slows_down() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let mut settings = test_settings();
    settings.grants.device_poll_interval_secs = 5;
    let keyring = Keyring::ephemeral(86_400_000);

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;

    let resp = grants::issue_device_code(
        db,
        &settings,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid",
    )
    .await
    .expect("device code issuance failed");

    let poll = || {
        grants::poll_device_code(
            db,
            &keyring,
            &settings,
            &tenant.tenant_id,
            &client.model.client_id,
            &resp.device_code,
        )
    };

    assert!(matches!(
        poll().await.expect("poll failed"),
        DevicePollOutcome::Pending { .. }
    ));

    // Immediate re-poll violates the advertised interval
    let outcome = poll().await.expect("poll failed");
    let DevicePollOutcome::SlowDown { interval } = outcome else {
        panic!("expected slow_down on an immediate re-poll");
    };
    assert_eq!(interval, 10);
}

#[tokio::test]
async fn expiry_sweep_marks_and_removes_stale_grants() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let tenant = TenantBuilder::new("acme").create(db).await;
    let client = ClientBuilder::new(&tenant.tenant_id).device().create(db).await;

    let issued = store::device::issue(
        db,
        &tenant.tenant_id,
        &client.model.client_id,
        "openid",
        -1000,
        0,
    )
    .await
    .expect("issue failed");

    let marked = store::device::mark_expired(db).await.expect("mark failed");
    assert_eq!(marked, 1);

    let grant = store::device::find_by_device_code(db, &issued.device_code)
        .await
        .expect("lookup failed")
        .expect("row should still exist within the grace window");
    assert_eq!(
        grant.status,
        gatehouse::entities::device_code_grant::DeviceAuthorizationStatus::Expired
    );

    // Past the grace window the row is removed outright
    let removed = store::device::cleanup_expired(db, 0).await.expect("cleanup failed");
    assert_eq!(removed, 1);
}
