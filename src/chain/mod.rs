//! Chain module - thin RPC facades over the external platforms
//!
//! This module provides:
//! - Multi-endpoint JSON-RPC transport with random endpoint selection
//! - The platform-neutral `ChainClient` used by settlement and scanning
//! - Neo and Ethereum clients exposing their chain-native block and
//!   transaction shapes to the platform interpreters

pub mod ethereum;
pub mod neo;
pub mod provider;

pub use ethereum::{EthApi, EthClient};
pub use neo::{NeoApi, NeoClient};
pub use provider::RpcEndpoints;

use crate::error::SwapResult;
use crate::interop::SignedTransfer;

use async_trait::async_trait;
use tracing::error;

/// Outcome of a broadcast: the transaction id and the endpoint that took it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub tx_id: String,
    pub endpoint: String,
}

/// Platform-neutral operations on an external chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn platform(&self) -> &str;

    /// Number of blocks available for scanning; heights below it are final
    async fn get_height(&self) -> SwapResult<u64>;

    /// Whether the transaction is included in a block
    async fn is_included(&self, tx_id: &str) -> SwapResult<bool>;

    /// Whether `endpoint` still holds the transaction in its pending pool
    async fn is_in_mempool(&self, endpoint: &str, tx_id: &str) -> SwapResult<bool>;

    async fn broadcast(&self, tx: &SignedTransfer) -> SwapResult<Broadcast>;

    async fn health_check(&self) -> bool {
        match self.get_height().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for {}: {}", self.platform(), e);
                false
            }
        }
    }
}

/// Strip `0x` and lowercase, so ids from different sources compare equal
pub(crate) fn normalize_tx_id(tx_id: &str) -> String {
    let lower = tx_id.trim().to_lowercase();
    lower.strip_prefix("0x").map(str::to_string).unwrap_or(lower)
}
