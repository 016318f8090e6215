use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "signing_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key_id: String,
    /// None means the key belongs to the shared, tenant-agnostic keyring.
    pub tenant_id: Option<String>,
    pub key_use: String,
    pub key_type: String,
    /// JWE-wrapped private JWK; decrypted only inside a signing call.
    pub private_key: String,
    /// Public JWK JSON, served as-is from the JWKS endpoint.
    pub public_key: String,
    pub status: KeyStatus,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Signing key lifecycle. At most one Active key exists per (tenant, use);
/// Retiring keys still verify, Retired keys are audit-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "retiring")]
    Retiring,
    #[sea_orm(string_value = "retired")]
    Retired,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
