//! Ethereum interpreter: native value and ERC20 transfers into swap addresses

use crate::chain::EthApi;
use crate::config::PlatformConfig;
use crate::coordination::AddressRegistry;
use crate::error::{SwapError, SwapResult};
use crate::interop::address::{is_valid_native, native_from_interop};
use crate::interop::{BlockId, InteropBlock, InteropTransaction, InteropTransfer};
use crate::oracle::{FetchedBlock, PlatformReader};

use async_trait::async_trait;
use ethers::types::{Address, Transaction, H256, U256, U64};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::{debug, info};

lazy_static! {
    /// keccak256("Transfer(address,address,uint256)")
    pub static ref ERC20_TRANSFER_TOPIC: H256 =
        H256::from_slice(&Keccak256::digest(b"Transfer(address,address,uint256)"));
}

fn address_text(address: &Address) -> String {
    format!("{:#x}", address)
}

fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

pub struct EthereumReader {
    platform: String,
    api: Arc<dyn EthApi>,
    registry: Arc<AddressRegistry>,
    config: PlatformConfig,
}

impl EthereumReader {
    pub fn new(platform: &str, api: Arc<dyn EthApi>, registry: Arc<AddressRegistry>, config: PlatformConfig) -> Self {
        Self {
            platform: platform.to_string(),
            api,
            registry,
            config,
        }
    }

    /// A native address carried as UTF-8 calldata of a plain value transfer
    fn memo_address(tx: &Transaction) -> Option<String> {
        let text = std::str::from_utf8(tx.input.as_ref()).ok()?.trim();
        is_valid_native(text).then(|| text.to_string())
    }

    async fn interpret(&self, chain: &str, tx: &Transaction) -> SwapResult<InteropTransaction> {
        let to = match tx.to {
            Some(to) => to,
            None => return Ok(InteropTransaction::empty()),
        };
        let source = address_text(&tx.from);
        let target = address_text(&to);

        let native_hit = self.config.native_asset.is_some()
            && !tx.value.is_zero()
            && self.registry.is_swap_address(&self.platform, &target);
        let token_hit = self.config.asset(&target).is_some();
        if !native_hit && !token_hit {
            return Ok(InteropTransaction::empty());
        }

        if self.registry.is_controlled(&self.platform, &source) {
            debug!("Ignoring {} tx {:#x} sent from a controlled address", self.platform, tx.hash);
            return Ok(InteropTransaction::empty());
        }

        let receipt = match self.api.get_receipt(tx.hash).await? {
            Some(receipt) => receipt,
            None => return Ok(InteropTransaction::empty()),
        };
        if receipt.status != Some(U64::one()) {
            debug!("Ignoring reverted {} tx {:#x}", self.platform, tx.hash);
            return Ok(InteropTransaction::empty());
        }

        let interop = native_from_interop(self.config.platform_id, tx.from.as_bytes());
        let mut transfers = Vec::new();

        if let (true, Some(native)) = (native_hit, &self.config.native_asset) {
            transfers.push(InteropTransfer {
                source_chain: self.platform.clone(),
                source_address: source.clone(),
                destination_chain: chain.to_string(),
                destination_address: target.clone(),
                interop_address: Self::memo_address(tx).unwrap_or_else(|| interop.clone()),
                symbol: native.symbol.clone(),
                value: tx.value,
                data: Vec::new(),
            });
        }

        if token_hit {
            for log in &receipt.logs {
                let asset = match self.config.asset(&address_text(&log.address)) {
                    Some(asset) => asset,
                    None => continue,
                };
                if log.topics.len() != 3 || log.topics[0] != *ERC20_TRANSFER_TOPIC {
                    continue;
                }
                if topic_address(&log.topics[1]) != tx.from {
                    continue;
                }
                let recipient = address_text(&topic_address(&log.topics[2]));
                if !self.registry.is_swap_address(&self.platform, &recipient) || log.data.len() > 32 {
                    continue;
                }

                transfers.push(InteropTransfer {
                    source_chain: self.platform.clone(),
                    source_address: source.clone(),
                    destination_chain: chain.to_string(),
                    destination_address: recipient,
                    interop_address: interop.clone(),
                    symbol: asset.symbol.clone(),
                    value: U256::from_big_endian(log.data.as_ref()),
                    data: Vec::new(),
                });
            }
        }

        if !transfers.is_empty() {
            info!("Found {} swaps in {} tx {:#x}", transfers.len(), self.platform, tx.hash);
        }
        Ok(InteropTransaction::new(tx.hash, transfers))
    }
}

#[async_trait]
impl PlatformReader for EthereumReader {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_block(&self, chain: &str, id: BlockId) -> SwapResult<FetchedBlock> {
        let not_found = || SwapError::BlockNotFound {
            platform: self.platform.clone(),
            block: id.to_string(),
        };
        let block = self.api.get_block(id).await?.ok_or_else(not_found)?;
        // pending blocks carry neither
        let hash = block.hash.ok_or_else(not_found)?;
        let height = block.number.ok_or_else(not_found)?.as_u64();

        let mut transactions = Vec::new();
        for tx in &block.transactions {
            let interop = self.interpret(chain, tx).await?;
            if !interop.is_empty() {
                transactions.push((tx.hash, interop));
            }
        }
        let relevant = transactions.iter().map(|(tx_hash, _)| *tx_hash).collect();

        Ok(FetchedBlock {
            hash,
            height,
            block: InteropBlock::new(&self.platform, chain, hash, relevant),
            transactions,
        })
    }

    async fn fetch_transaction(&self, chain: &str, hash: H256) -> SwapResult<InteropTransaction> {
        match self.api.get_transaction(hash).await? {
            Some(tx) => self.interpret(chain, &tx).await,
            None => Ok(InteropTransaction::empty()),
        }
    }

    async fn gas_price(&self) -> SwapResult<U256> {
        self.api.gas_price().await
    }
}
