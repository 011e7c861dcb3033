pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{seed_demo, DemoAccount, SeedResult, DEMO_ACCOUNTS, DEMO_PASSWORD};
pub use migrations::run_pending;
pub use repositories::{InMemoryStore, SqlStore};
