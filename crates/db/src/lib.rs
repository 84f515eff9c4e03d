//! Postgres-backed `PersistenceGateway` and `KvStore` (§6).
//!
//! This crate is a thin storage driver: it maps `oracle-core`'s domain
//! types onto the `unified_*` relational schema and the `kv_blobs` table,
//! and nothing else. Business rules (debounce, validation, defaulting)
//! live in `oracle-core`; this crate only knows how to read and write rows.

mod error;
mod gateway;
mod kv;
mod pool;

pub use error::map_sqlx_error;
pub use gateway::PostgresGateway;
pub use kv::PostgresKvStore;
pub use pool::{connect, run_migrations};
