mod helpers;

use gatehouse::entities::auth_flow::FlowType;
use gatehouse::errors::{GatehouseError, ProtocolErrorKind};
use gatehouse::grants;
use gatehouse::store;
use gatehouse::store::flows::StepOutcome;
use helpers::{test_settings, TenantBuilder, TestDb};

#[tokio::test]
async fn flow_advances_one_pending_step_at_a_time() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;

    let token = grants::begin_flow(
        db,
        &settings,
        &tenant.tenant_id,
        FlowType::Authentication,
        vec!["password".to_string(), "mfa".to_string()],
    )
    .await
    .expect("begin failed");

    let (_, steps) = grants::get_flow(db, &token).await.expect("get failed");
    assert_eq!(steps.current_step(), Some("password"));
    assert!(!steps.is_complete());

    let steps = grants::advance_flow(db, &token, StepOutcome::Completed, Some("user-1"))
        .await
        .expect("advance failed");
    assert_eq!(steps.current_step(), Some("mfa"));

    let steps = grants::advance_flow(db, &token, StepOutcome::Completed, None)
        .await
        .expect("advance failed");
    assert_eq!(steps.current_step(), None);
    assert!(steps.is_complete());

    // Advancing a finished flow fails
    let err = grants::advance_flow(db, &token, StepOutcome::Completed, None)
        .await
        .expect_err("completed flow has no pending step");
    assert!(matches!(
        err,
        GatehouseError::Protocol(p) if p.kind == ProtocolErrorKind::InvalidGrant
    ));

    // The user resolved during the flow is recorded on the row
    let (model, _) = grants::get_flow(db, &token).await.expect("get failed");
    assert_eq!(model.user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn failed_step_terminates_the_flow() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = test_settings();

    let tenant = TenantBuilder::new("acme").create(db).await;

    let token = grants::begin_flow(
        db,
        &settings,
        &tenant.tenant_id,
        FlowType::Registration,
        vec!["email_verification".to_string(), "profile".to_string()],
    )
    .await
    .expect("begin failed");

    let steps = grants::advance_flow(db, &token, StepOutcome::Failed, None)
        .await
        .expect("advance failed");
    assert!(steps.is_failed());
    assert_eq!(steps.current_step(), None, "a failed flow has no live step");

    let err = grants::advance_flow(db, &token, StepOutcome::Completed, None)
        .await
        .expect_err("failed flow must not advance");
    assert!(matches!(
        err,
        GatehouseError::Protocol(p) if p.kind == ProtocolErrorKind::InvalidGrant
    ));
}

#[tokio::test]
async fn expired_flow_is_gone() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let tenant = TenantBuilder::new("acme").create(db).await;

    // TTL already elapsed
    let token = store::flows::begin(
        db,
        &tenant.tenant_id,
        FlowType::PreAuthentication,
        vec!["password".to_string()],
        -1000,
    )
    .await
    .expect("begin failed");

    assert!(store::flows::get(db, &token).await.expect("get failed").is_none());

    let swept = store::flows::cleanup_expired(db).await.expect("sweep failed");
    assert_eq!(swept, 1);
}

#[tokio::test]
async fn scheduler_lock_is_exclusive_while_the_lease_lives() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let acquired = store::locks::try_acquire(db, "expiry_sweep", "instance-a", 60_000)
        .await
        .expect("acquire failed");
    assert!(acquired);

    // A second instance loses while the lease is live
    let acquired = store::locks::try_acquire(db, "expiry_sweep", "instance-b", 60_000)
        .await
        .expect("acquire failed");
    assert!(!acquired);

    // Releasing frees the lock for the next taker
    store::locks::release(db, "expiry_sweep", "instance-a")
        .await
        .expect("release failed");
    let acquired = store::locks::try_acquire(db, "expiry_sweep", "instance-b", 60_000)
        .await
        .expect("acquire failed");
    assert!(acquired);
}

#[tokio::test]
async fn lapsed_lease_is_reclaimed_by_another_instance() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    // Zero-length lease: expired the moment it is taken
    let acquired = store::locks::try_acquire(db, "expiry_sweep", "crashed-instance", 0)
        .await
        .expect("acquire failed");
    assert!(acquired);

    let reclaimed = store::locks::try_acquire(db, "expiry_sweep", "instance-b", 60_000)
        .await
        .expect("acquire failed");
    assert!(reclaimed, "an expired lease must be reclaimable");

    // The reclaiming instance now holds a live lease
    let acquired = store::locks::try_acquire(db, "expiry_sweep", "instance-c", 60_000)
        .await
        .expect("acquire failed");
    assert!(!acquired);
}

#[tokio::test]
async fn expiry_sweep_runs_under_the_lock_and_reports_rows() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let tenant = TenantBuilder::new("acme").create(db).await;

    // Two stale artifacts for the sweep to find
    store::flows::begin(
        db,
        &tenant.tenant_id,
        FlowType::Authentication,
        vec!["password".to_string()],
        -1000,
    )
    .await
    .expect("begin failed");

    store::federated::begin(
        db,
        store::federated::NewFederatedAuthorization {
            rel_type: gatehouse::entities::federated_authorization::FederatedRelType::Login,
            provider_id: "p".to_string(),
            tenant_id: tenant.tenant_id.clone(),
            code_verifier: None,
            init_client_id: "c".to_string(),
            init_redirect_uri: "http://localhost/cb".to_string(),
            init_scope: "openid".to_string(),
            init_state: None,
            init_code_challenge: None,
            init_code_challenge_method: None,
            ttl_ms: -1000,
        },
    )
    .await
    .expect("begin failed");

    let swept = gatehouse::jobs::run_expiry_sweep(db, "instance-a")
        .await
        .expect("sweep failed")
        .expect("lease should be free");
    assert_eq!(swept, 2);

    // While another instance holds the lease the sweep is skipped
    assert!(store::locks::try_acquire(db, "expiry_sweep", "instance-b", 60_000)
        .await
        .expect("acquire failed"));
    let skipped = gatehouse::jobs::run_expiry_sweep(db, "instance-a")
        .await
        .expect("sweep failed");
    assert!(skipped.is_none());
}
