use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduler_locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub lock_name: String,
    pub lock_instance_id: String,
    pub lock_started_at: i64,
    pub lock_expires_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
