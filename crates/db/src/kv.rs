//! Postgres-backed `KvStore` over the `kv_blobs` table (§5, §6).

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::Utc;
use oracle_core::error::PersistenceError;
use oracle_core::traits::KvStore;
use sqlx::{PgPool, Row};

pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let row = sqlx::query("SELECT value FROM kv_blobs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("value").map_err(map_sqlx_error)?)),
            None => Ok(None),
        }
    }

    /// Single-writer semantics come from this being a plain upsert with no
    /// read-modify-write gap visible to callers: `put` always wins with
    /// whatever blob it was given, and `get` never blocks behind it.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO kv_blobs (key, value, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
