mod helpers;

use gatehouse::entities::signing_key::KeyStatus;
use gatehouse::keyring::{Keyring, USE_TOKEN_SIGNING};
use gatehouse::secrets;
use gatehouse::store;
use helpers::TestDb;
use josekit::jwt::JwtPayload;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

const DAY_MS: i64 = 86_400_000;

#[tokio::test]
async fn active_key_is_created_on_first_touch() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let keyring = Keyring::ephemeral(DAY_MS);

    let key = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("active key");
    assert_eq!(key.status, KeyStatus::Active);
    assert_eq!(key.key_type, "RSA");

    // Second call returns the same key, not a new one
    let again = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("active key");
    assert_eq!(again.key_id, key.key_id);
}

#[tokio::test]
async fn keys_are_scoped_per_tenant_and_use() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let keyring = Keyring::ephemeral(DAY_MS);

    let acme = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("acme key");
    let globex = keyring
        .active_key(db, Some("globex"), USE_TOKEN_SIGNING)
        .await
        .expect("globex key");
    let shared = keyring
        .active_key(db, None, USE_TOKEN_SIGNING)
        .await
        .expect("shared key");

    assert_ne!(acme.key_id, globex.key_id);
    assert_ne!(acme.key_id, shared.key_id);
}

#[tokio::test]
async fn rotation_demotes_the_previous_key_and_keeps_it_verifying() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let keyring = Keyring::ephemeral(DAY_MS);

    // Sign a token with the first-generation key
    let mut payload = JwtPayload::new();
    payload.set_subject("alice");
    let old_token = keyring
        .sign_jwt(db, Some("acme"), USE_TOKEN_SIGNING, &payload)
        .await
        .expect("sign");

    let old_key = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("active key");

    let new_key = keyring
        .rotate(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("rotate");
    assert_ne!(new_key.key_id, old_key.key_id);

    // The new key is the single Active key
    let active = store::keys::get_active(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("query")
        .expect("active expected");
    assert_eq!(active.key_id, new_key.key_id);

    let demoted = store::keys::get_by_kid(db, &old_key.key_id)
        .await
        .expect("query")
        .expect("old key still present");
    assert_eq!(demoted.status, KeyStatus::Retiring);

    // Both generations are in the verification set; the old token verifies
    let verification = keyring
        .verification_keys(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("verification keys");
    assert_eq!(verification.len(), 2);

    let verified = keyring
        .verify_jwt(db, Some("acme"), USE_TOKEN_SIGNING, &old_token)
        .await
        .expect("verify");
    assert!(verified.is_some(), "pre-rotation tokens verify until the old key expires");
}

#[tokio::test]
async fn retired_keys_stop_verifying() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let keyring = Keyring::ephemeral(DAY_MS);

    let mut payload = JwtPayload::new();
    payload.set_subject("alice");
    let old_token = keyring
        .sign_jwt(db, Some("acme"), USE_TOKEN_SIGNING, &payload)
        .await
        .expect("sign");

    let old_key = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("active key");
    keyring
        .rotate(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("rotate");

    // Manually expire the retiring key, then run the retirement sweep
    use gatehouse::entities::signing_key::{Column, Entity};
    Entity::update_many()
        .col_expr(Column::ExpiresAt, Expr::value(secrets::now_ms() - 1000))
        .filter(Column::KeyId.eq(&old_key.key_id))
        .exec(db)
        .await
        .expect("Failed to update expiry");

    let retired = store::keys::retire_expired(db).await.expect("sweep");
    assert_eq!(retired, 1);

    let row = store::keys::get_by_kid(db, &old_key.key_id)
        .await
        .expect("query")
        .expect("retired key retained for audit");
    assert_eq!(row.status, KeyStatus::Retired);

    // Verification set excludes it and the old token no longer verifies
    let verification = keyring
        .verification_keys(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("verification keys");
    assert_eq!(verification.len(), 1);

    let verified = keyring
        .verify_jwt(db, Some("acme"), USE_TOKEN_SIGNING, &old_token)
        .await
        .expect("verify");
    assert!(verified.is_none());
}

#[tokio::test]
async fn jwks_document_carries_kids_and_no_private_material() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let keyring = Keyring::ephemeral(DAY_MS);

    let key = keyring
        .active_key(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("active key");
    keyring
        .rotate(db, Some("acme"), USE_TOKEN_SIGNING)
        .await
        .expect("rotate");

    let jwks = keyring.jwks_json(db, Some("acme")).await.expect("jwks");
    let keys = jwks["keys"].as_array().expect("keys array");
    assert_eq!(keys.len(), 2);

    let kids: Vec<&str> = keys.iter().filter_map(|k| k["kid"].as_str()).collect();
    assert!(kids.contains(&key.key_id.as_str()));

    for k in keys {
        assert!(k.get("d").is_none(), "JWKS must not expose private exponents");
        assert_eq!(k["kty"].as_str(), Some("RSA"));
    }
}
