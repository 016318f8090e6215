use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "federated_authorizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub state_hash: String,
    pub rel_type: FederatedRelType,
    pub provider_id: String,
    pub tenant_id: String,
    /// PKCE verifier for the outbound leg, when the upstream provider requires it.
    pub code_verifier: Option<String>,
    pub init_client_id: String,
    pub init_redirect_uri: String,
    pub init_scope: String,
    pub init_state: Option<String>,
    pub init_code_challenge: Option<String>,
    pub init_code_challenge_method: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum FederatedRelType {
    #[sea_orm(string_value = "login")]
    Login,
    #[sea_orm(string_value = "registration")]
    Registration,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
