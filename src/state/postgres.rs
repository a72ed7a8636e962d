//! PostgreSQL storage backend

use super::store::KeyValueStore;
use crate::config::StorageConfig;
use crate::error::SwapResult;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Key/value tables in a single PostgreSQL relation
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store
    pub async fn new(config: &StorageConfig) -> SwapResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> SwapResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interop_kv (
                tbl VARCHAR(128) NOT NULL,
                key VARCHAR(256) NOT NULL,
                value BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, table: &str, key: &str) -> SwapResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM interop_kv WHERE tbl = $1 AND key = $2")
            .bind(table)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<()> {
        sqlx::query(
            r#"
            INSERT INTO interop_kv (tbl, key, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tbl, key)
            DO UPDATE SET value = $3, updated_at = NOW()
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_if_absent(&self, table: &str, key: &str, value: Vec<u8>) -> SwapResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO interop_kv (tbl, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (tbl, key) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!("Key {} already present in {}", key, table);
        }
        Ok(inserted)
    }

    async fn remove(&self, table: &str, key: &str) -> SwapResult<bool> {
        let result = sqlx::query("DELETE FROM interop_kv WHERE tbl = $1 AND key = $2")
            .bind(table)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan(&self, table: &str) -> SwapResult<Vec<(String, Vec<u8>)>> {
        let rows = sqlx::query("SELECT key, value FROM interop_kv WHERE tbl = $1")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn health_check(&self) -> SwapResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
