//! In-process fakes shared by unit tests

use crate::chain::{Broadcast, ChainClient};
use crate::error::{SwapError, SwapResult};
use crate::interop::address::neo_address_from_public_key;
use crate::interop::{BlockId, InteropBlock, InteropTransaction, InteropTransfer, SignedTransfer};
use crate::oracle::{FetchedBlock, PlatformReader};

use async_trait::async_trait;
use ethers::types::{H256, U256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn transfer(source: &str, destination: &str, value: u64) -> InteropTransfer {
    InteropTransfer {
        source_chain: "main".to_string(),
        source_address: source.to_string(),
        destination_chain: "main".to_string(),
        destination_address: destination.to_string(),
        interop_address: format!("P{}", source),
        symbol: "GAS".to_string(),
        value: U256::from(value),
        data: Vec::new(),
    }
}

/// Well-formed Neo address derived from a dummy key
pub fn neo_address(seed: u8) -> String {
    neo_address_from_public_key(&[seed; 33])
}

type FakeTransactions = Vec<(H256, Vec<InteropTransfer>)>;

/// Platform reader serving scripted blocks
pub struct FakeReader {
    platform: String,
    blocks: Mutex<BTreeMap<u64, FakeTransactions>>,
    failures: Mutex<HashMap<u64, usize>>,
    gas_price: Mutex<U256>,
    block_fetches: AtomicUsize,
    transaction_fetches: AtomicUsize,
    gas_price_fetches: AtomicUsize,
}

impl FakeReader {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            blocks: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            gas_price: Mutex::new(U256::zero()),
            block_fetches: AtomicUsize::new(0),
            transaction_fetches: AtomicUsize::new(0),
            gas_price_fetches: AtomicUsize::new(0),
        }
    }

    pub fn block_hash(height: u64) -> H256 {
        H256::from_low_u64_be(0x1000 + height)
    }

    pub fn add_block(&self, height: u64, transactions: FakeTransactions) {
        self.blocks.lock().unwrap().insert(height, transactions);
    }

    pub fn add_empty_blocks(&self, heights: std::ops::Range<u64>) {
        for height in heights {
            self.add_block(height, vec![]);
        }
    }

    /// Fail the next `times` fetches of `height` with a connection error
    pub fn fail_block(&self, height: u64, times: usize) {
        self.failures.lock().unwrap().insert(height, times);
    }

    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn transaction_fetches(&self) -> usize {
        self.transaction_fetches.load(Ordering::SeqCst)
    }

    pub fn gas_price_fetches(&self) -> usize {
        self.gas_price_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformReader for FakeReader {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_block(&self, chain: &str, id: BlockId) -> SwapResult<FetchedBlock> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        let blocks = self.blocks.lock().unwrap().clone();
        let height = match id {
            BlockId::Height(height) => Some(height),
            BlockId::Hash(hash) => blocks.keys().copied().find(|h| Self::block_hash(*h) == hash),
        };
        let not_found = || SwapError::BlockNotFound {
            platform: self.platform.clone(),
            block: id.to_string(),
        };
        let height = height.ok_or_else(not_found)?;

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SwapError::ChainConnection {
                        platform: self.platform.clone(),
                        message: "connection reset".to_string(),
                    });
                }
            }
        }

        let entries = blocks.get(&height).cloned().ok_or_else(not_found)?;
        let transactions: Vec<(H256, InteropTransaction)> = entries
            .into_iter()
            .map(|(hash, transfers)| (hash, InteropTransaction::new(hash, transfers)))
            .collect();
        let relevant = transactions
            .iter()
            .filter(|(_, tx)| !tx.is_empty())
            .map(|(hash, _)| *hash)
            .collect();
        let hash = Self::block_hash(height);

        Ok(FetchedBlock {
            hash,
            height,
            block: InteropBlock::new(&self.platform, chain, hash, relevant),
            transactions,
        })
    }

    async fn fetch_transaction(&self, _chain: &str, hash: H256) -> SwapResult<InteropTransaction> {
        self.transaction_fetches.fetch_add(1, Ordering::SeqCst);
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .values()
            .flatten()
            .find(|(candidate, _)| *candidate == hash)
            .map(|(_, transfers)| InteropTransaction::new(hash, transfers.clone()))
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> SwapResult<U256> {
        self.gas_price_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(*self.gas_price.lock().unwrap())
    }
}

/// Chain client with scripted inclusion and mempool state
pub struct FakeChain {
    platform: String,
    height: AtomicU64,
    included: Mutex<HashSet<String>>,
    mempool: Mutex<HashSet<String>>,
    mempool_error: AtomicBool,
    broadcast_error: AtomicBool,
    inclusion_checks: AtomicUsize,
    mempool_checks: Mutex<Vec<String>>,
    broadcasts: Mutex<Vec<SignedTransfer>>,
}

pub const FAKE_ENDPOINT: &str = "http://node-b.example";

impl FakeChain {
    pub fn new(platform: &str, height: u64) -> Self {
        Self {
            platform: platform.to_string(),
            height: AtomicU64::new(height),
            included: Mutex::new(HashSet::new()),
            mempool: Mutex::new(HashSet::new()),
            mempool_error: AtomicBool::new(false),
            broadcast_error: AtomicBool::new(false),
            inclusion_checks: AtomicUsize::new(0),
            mempool_checks: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn include(&self, tx_id: &str) {
        self.included.lock().unwrap().insert(tx_id.to_string());
    }

    pub fn put_in_mempool(&self, tx_id: &str) {
        self.mempool.lock().unwrap().insert(tx_id.to_string());
    }

    pub fn fail_mempool_checks(&self) {
        self.mempool_error.store(true, Ordering::SeqCst);
    }

    pub fn fail_broadcasts(&self) {
        self.broadcast_error.store(true, Ordering::SeqCst);
    }

    pub fn inclusion_checks(&self) -> usize {
        self.inclusion_checks.load(Ordering::SeqCst)
    }

    pub fn mempool_checks(&self) -> Vec<String> {
        self.mempool_checks.lock().unwrap().clone()
    }

    pub fn broadcasts(&self) -> Vec<SignedTransfer> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn get_height(&self) -> SwapResult<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn is_included(&self, tx_id: &str) -> SwapResult<bool> {
        self.inclusion_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.included.lock().unwrap().contains(tx_id))
    }

    async fn is_in_mempool(&self, endpoint: &str, tx_id: &str) -> SwapResult<bool> {
        self.mempool_checks.lock().unwrap().push(endpoint.to_string());
        if self.mempool_error.load(Ordering::SeqCst) {
            return Err(SwapError::ChainConnection {
                platform: self.platform.clone(),
                message: "mempool unavailable".to_string(),
            });
        }
        Ok(self.mempool.lock().unwrap().contains(tx_id))
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> SwapResult<Broadcast> {
        if self.broadcast_error.load(Ordering::SeqCst) {
            return Err(SwapError::ChainConnection {
                platform: self.platform.clone(),
                message: "broadcast refused".to_string(),
            });
        }
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(Broadcast {
            tx_id: tx.tx_id.clone(),
            endpoint: FAKE_ENDPOINT.to_string(),
        })
    }
}
