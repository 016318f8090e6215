pub use sea_orm_migration::prelude::*;

mod m20260105_000001_initial_schema;
mod m20260105_000002_policy_tables;
mod m20260105_000003_federated_oidc;
mod m20260105_000004_flows_and_locks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260105_000001_initial_schema::Migration),
            Box::new(m20260105_000002_policy_tables::Migration),
            Box::new(m20260105_000003_federated_oidc::Migration),
            Box::new(m20260105_000004_flows_and_locks::Migration),
        ]
    }
}
