//! Signing-key lifecycle: generation, rotation (Active -> Retiring ->
//! Retired), and RS256 signing/verification of issued tokens. Private JWKs
//! are wrapped in a compact JWE under the process master key before they
//! touch the database; the clear key exists only inside a signing or
//! verification call.

use crate::entities;
use crate::entities::signing_key::KeyStatus;
use crate::errors::GatehouseError;
use crate::store;
use base64ct::Encoding;
use josekit::jwe::{JweHeader, A256GCMKW};
use josekit::jwk::Jwk;
use josekit::jws::{JwsHeader, RS256};
use josekit::jwt::{self, JwtPayload};
use rand::RngCore;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::{json, Value};

/// Key use for tokens minted by the grant issuer.
pub const USE_TOKEN_SIGNING: &str = "token_signing";

#[derive(Clone)]
pub struct Keyring {
    master_key: Vec<u8>,
    key_ttl_ms: i64,
}

impl Keyring {
    pub fn new(cfg: &crate::settings::Keys) -> Result<Self, GatehouseError> {
        if cfg.alg != "RS256" {
            return Err(GatehouseError::Other(format!(
                "unsupported signing algorithm: {}",
                cfg.alg
            )));
        }

        let master_key = base64ct::Base64UrlUnpadded::decode_vec(&cfg.master_key)
            .map_err(|_| GatehouseError::Other("keys.master_key is not valid base64url".into()))?;
        if master_key.len() != 32 {
            return Err(GatehouseError::Other(
                "keys.master_key must decode to 32 bytes".into(),
            ));
        }

        Ok(Self {
            master_key,
            key_ttl_ms: cfg.key_ttl_days * 24 * 60 * 60 * 1000,
        })
    }

    /// Keyring with a random throwaway master key. Test and dev bootstrap only.
    pub fn ephemeral(key_ttl_ms: i64) -> Self {
        let mut master_key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut master_key);
        Self {
            master_key,
            key_ttl_ms,
        }
    }

    fn wrap_private_jwk(&self, jwk: &Jwk) -> Result<String, GatehouseError> {
        let mut header = JweHeader::new();
        header.set_content_encryption("A256GCM");

        let encrypter = A256GCMKW.encrypter_from_bytes(&self.master_key)?;
        let blob =
            josekit::jwe::serialize_compact(&serde_json::to_vec(jwk)?, &header, &encrypter)?;
        Ok(blob)
    }

    fn unwrap_private_jwk(&self, blob: &str) -> Result<Jwk, GatehouseError> {
        let decrypter = A256GCMKW.decrypter_from_bytes(&self.master_key)?;
        let (payload, _header) = josekit::jwe::deserialize_compact(blob, &decrypter)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    fn generate_key_material(&self) -> Result<(String, String), GatehouseError> {
        let mut jwk = Jwk::generate_rsa_key(2048)?;
        jwk.set_algorithm("RS256");
        jwk.set_key_use("sig");

        let public = jwk.to_public_key()?;
        let public_json = serde_json::to_string(&public)?;
        let private_blob = self.wrap_private_jwk(&jwk)?;
        Ok((private_blob, public_json))
    }

    /// Return the Active key for (tenant, use), creating one on first touch.
    pub async fn active_key(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
        key_use: &str,
    ) -> Result<entities::signing_key::Model, GatehouseError> {
        if let Some(key) = store::keys::get_active(db, tenant_id, key_use).await? {
            return Ok(key);
        }

        let (private_key, public_key) = self.generate_key_material()?;
        let model = store::keys::insert(
            db,
            store::keys::NewSigningKey {
                tenant_id: tenant_id.map(|t| t.to_string()),
                key_use: key_use.to_string(),
                key_type: "RSA".to_string(),
                private_key,
                public_key,
                ttl_ms: self.key_ttl_ms,
            },
            KeyStatus::Active,
        )
        .await?;

        tracing::info!(key_id = %model.key_id, key_use, "Generated initial signing key");
        Ok(model)
    }

    /// Rotate the Active key for (tenant, use): demote it to Retiring and
    /// insert a fresh Active key, atomically.
    pub async fn rotate(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
        key_use: &str,
    ) -> Result<entities::signing_key::Model, GatehouseError> {
        let (private_key, public_key) = self.generate_key_material()?;

        let txn = db.begin().await?;
        store::keys::demote_active(&txn, tenant_id, key_use).await?;
        let model = store::keys::insert(
            &txn,
            store::keys::NewSigningKey {
                tenant_id: tenant_id.map(|t| t.to_string()),
                key_use: key_use.to_string(),
                key_type: "RSA".to_string(),
                private_key,
                public_key,
                ttl_ms: self.key_ttl_ms,
            },
            KeyStatus::Active,
        )
        .await?;
        txn.commit().await?;

        tracing::info!(key_id = %model.key_id, key_use, "Rotated signing key");
        Ok(model)
    }

    pub async fn verification_keys(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
        key_use: &str,
    ) -> Result<Vec<entities::signing_key::Model>, GatehouseError> {
        store::keys::verification_keys(db, tenant_id, key_use).await
    }

    /// Public JWKS document for the tenant: every key a verifier must accept.
    pub async fn jwks_json(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
    ) -> Result<Value, GatehouseError> {
        let keys = store::keys::verification_keys(db, tenant_id, USE_TOKEN_SIGNING).await?;

        let mut jwks = Vec::with_capacity(keys.len());
        for key in keys {
            let mut jwk: Value = serde_json::from_str(&key.public_key)?;
            if let Some(map) = jwk.as_object_mut() {
                map.insert("kid".to_string(), json!(key.key_id));
            }
            jwks.push(jwk);
        }

        Ok(json!({ "keys": jwks }))
    }

    /// Sign a JWT with the tenant's Active key. The private JWK is unwrapped
    /// for the duration of this call only.
    pub async fn sign_jwt(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
        key_use: &str,
        payload: &JwtPayload,
    ) -> Result<String, GatehouseError> {
        let key = self.active_key(db, tenant_id, key_use).await?;
        let jwk = self.unwrap_private_jwk(&key.private_key)?;

        let signer = RS256.signer_from_jwk(&jwk)?;
        let mut header = JwsHeader::new();
        header.set_key_id(&key.key_id);
        header.set_algorithm("RS256");
        let token = jwt::encode_with_signer(payload, &header, &signer)?;
        Ok(token)
    }

    /// Verify against the current verification set (Active + Retiring). Tokens
    /// signed before a rotation keep verifying until the old key expires.
    pub async fn verify_jwt(
        &self,
        db: &DatabaseConnection,
        tenant_id: Option<&str>,
        key_use: &str,
        token: &str,
    ) -> Result<Option<JwtPayload>, GatehouseError> {
        let keys = store::keys::verification_keys(db, tenant_id, key_use).await?;

        for key in keys {
            let jwk: Jwk = serde_json::from_str(&key.public_key)?;
            let verifier = RS256.verifier_from_jwk(&jwk)?;
            if let Ok((payload, _header)) = jwt::decode_with_verifier(token, &verifier) {
                return Ok(Some(payload));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_jwk_round_trips_through_the_wrap() {
        let keyring = Keyring::ephemeral(1000);
        let jwk = Jwk::generate_rsa_key(2048).expect("generate key");

        let blob = keyring.wrap_private_jwk(&jwk).expect("wrap");
        assert!(!blob.contains(jwk.parameter("d").unwrap().as_str().unwrap()));

        let unwrapped = keyring.unwrap_private_jwk(&blob).expect("unwrap");
        assert_eq!(unwrapped.parameter("d"), jwk.parameter("d"));
    }

    #[test]
    fn wrap_is_bound_to_the_master_key() {
        let a = Keyring::ephemeral(1000);
        let b = Keyring::ephemeral(1000);
        let jwk = Jwk::generate_rsa_key(2048).expect("generate key");

        let blob = a.wrap_private_jwk(&jwk).expect("wrap");
        assert!(b.unwrap_private_jwk(&blob).is_err());
    }
}
