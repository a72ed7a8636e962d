//! Persisted key/value tables
//!
//! Handles:
//! - Oracle block, transaction and checkpoint tables per platform
//! - Settlement bookkeeping tables owned by the orchestrator
//! - Backend selection (PostgreSQL or in-memory)

mod postgres;
mod store;

pub use postgres::PostgresStore;
pub use store::{get_json, insert_json_if_absent, set_json, KeyValueStore, MemoryStore};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::SwapResult;

use std::sync::Arc;
use tracing::info;

/// Open the configured backend and run its migrations
pub async fn open_store(config: &StorageConfig) -> SwapResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::Postgres => {
            let store = PostgresStore::new(config).await?;
            store.run_migrations().await?;
            info!("Database connection established");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage, state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
