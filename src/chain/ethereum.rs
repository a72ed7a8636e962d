//! Ethereum client built on ethers providers

use super::{Broadcast, ChainClient, RpcEndpoints};
use crate::error::{SwapError, SwapResult};
use crate::interop::{parse_hash, BlockId, SignedTransfer};

use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Block, BlockNumber, Bytes, Transaction, TransactionReceipt, H256, U256};
use tracing::debug;

/// Chain-native view of Ethereum used by the interpreter and the wallet
#[async_trait]
pub trait EthApi: ChainClient {
    fn chain_id(&self) -> u64;

    async fn get_block(&self, id: BlockId) -> SwapResult<Option<Block<Transaction>>>;

    async fn get_transaction(&self, hash: H256) -> SwapResult<Option<Transaction>>;

    async fn get_receipt(&self, hash: H256) -> SwapResult<Option<TransactionReceipt>>;

    /// Current gas price in wei
    async fn gas_price(&self) -> SwapResult<U256>;

    /// Next nonce of `address`, counting pending transactions
    async fn transaction_count(&self, address: Address) -> SwapResult<U256>;
}

pub struct EthClient {
    endpoints: RpcEndpoints,
    chain_id: u64,
    confirmations: u64,
}

impl EthClient {
    pub fn new(platform: &str, urls: &[String], chain_id: u64, confirmations: u64) -> SwapResult<Self> {
        Ok(Self {
            endpoints: RpcEndpoints::new(platform, urls)?,
            chain_id,
            confirmations,
        })
    }

    fn error(&self, e: impl std::fmt::Display) -> SwapError {
        SwapError::ChainConnection {
            platform: self.endpoints.platform().to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl ChainClient for EthClient {
    fn platform(&self) -> &str {
        self.endpoints.platform()
    }

    /// Blocks younger than the confirmation depth are not offered for scanning
    async fn get_height(&self) -> SwapResult<u64> {
        let (_, provider) = self.endpoints.pick();
        let tip = provider
            .get_block_number()
            .await
            .map_err(|e| self.error(e))?
            .as_u64();
        Ok((tip + 1).saturating_sub(self.confirmations))
    }

    async fn is_included(&self, tx_id: &str) -> SwapResult<bool> {
        let receipt = self.get_receipt(parse_hash(tx_id)?).await?;
        Ok(receipt.and_then(|r| r.block_number).is_some())
    }

    async fn is_in_mempool(&self, endpoint: &str, tx_id: &str) -> SwapResult<bool> {
        let tx = self
            .endpoints
            .endpoint(endpoint)?
            .get_transaction(parse_hash(tx_id)?)
            .await
            .map_err(|e| self.error(e))?;
        Ok(tx.map(|tx| tx.block_number.is_none()).unwrap_or(false))
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> SwapResult<Broadcast> {
        let (endpoint, provider) = self.endpoints.pick();
        let pending = provider
            .send_raw_transaction(Bytes::from(tx.raw.clone()))
            .await
            .map_err(|e| self.error(e))?;
        let tx_hash = pending.tx_hash();
        debug!("Broadcast {:#x} via {}", tx_hash, endpoint);

        Ok(Broadcast {
            tx_id: format!("{:#x}", tx_hash),
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl EthApi for EthClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_block(&self, id: BlockId) -> SwapResult<Option<Block<Transaction>>> {
        let (_, provider) = self.endpoints.pick();
        let block = match id {
            BlockId::Hash(hash) => provider.get_block_with_txs(hash).await,
            BlockId::Height(height) => provider.get_block_with_txs(height).await,
        };
        block.map_err(|e| self.error(e))
    }

    async fn get_transaction(&self, hash: H256) -> SwapResult<Option<Transaction>> {
        let (_, provider) = self.endpoints.pick();
        provider.get_transaction(hash).await.map_err(|e| self.error(e))
    }

    async fn get_receipt(&self, hash: H256) -> SwapResult<Option<TransactionReceipt>> {
        let (_, provider) = self.endpoints.pick();
        provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.error(e))
    }

    async fn gas_price(&self) -> SwapResult<U256> {
        let (_, provider) = self.endpoints.pick();
        provider.get_gas_price().await.map_err(|e| self.error(e))
    }

    async fn transaction_count(&self, address: Address) -> SwapResult<U256> {
        let (_, provider) = self.endpoints.pick();
        provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.error(e))
    }
}
