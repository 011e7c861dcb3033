//! [`Store`](tourdesk_core::store::Store) implementations: SQLite for deployments, an
//! in-process map for tests and demos.

mod memory;
mod rows;
mod sql;

pub use memory::InMemoryStore;
pub use sql::SqlStore;
