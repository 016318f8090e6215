//! Repository layer: one module per entity family, all plain functions over a
//! [`DatabaseConnection`] handed in at process start. Single-use artifacts are
//! consumed with conditional updates checked through `rows_affected`, never
//! read-then-write.

pub mod codes;
pub mod device;
pub mod federated;
pub mod flows;
pub mod keys;
pub mod locks;
pub mod policy;
pub mod refresh;
pub mod tenants;

use crate::errors::GatehouseError;
use crate::settings::Database as DbCfg;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, GatehouseError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None)
        .await
        .map_err(GatehouseError::Db)?;
    Ok(db)
}

pub(crate) fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn encode_string_list(items: &[String]) -> Result<String, GatehouseError> {
    Ok(serde_json::to_string(items)?)
}
