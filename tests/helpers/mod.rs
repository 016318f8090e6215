#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::{test_settings, ClientBuilder, TenantBuilder, UserBuilder};
pub use db::TestDb;
