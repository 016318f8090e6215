use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: String,
    pub tenant_id: String,
    pub client_secret_hash: String,
    pub client_name: Option<String>,
    pub client_type: ClientType,
    pub redirect_uris: String,
    pub scopes: String,
    pub enabled: i64,
    pub marked_for_delete: i64,
    pub max_refresh_token_count: i64,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[sea_orm(string_value = "confidential")]
    Confidential,
    #[sea_orm(string_value = "public")]
    Public,
    #[sea_orm(string_value = "device")]
    Device,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
