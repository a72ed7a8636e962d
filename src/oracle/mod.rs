//! Oracle cache - read-through record of what the external chains looked like
//!
//! This module provides:
//! - Pull-through block and transaction reads, interpreted by the registered
//!   platform reader and persisted before they are returned
//! - Per-platform checkpoint accessors
//! - Fee and price quotes with time-bounded caching
//!
//! Persisted records are first-write-wins. Block records are only ever
//! overwritten when an operator resync re-fetches a block.

pub mod price;
pub mod ttl;

pub use price::{CryptoCompare, PriceSource};
pub use ttl::TimedCache;

use crate::config::OracleConfig;
use crate::error::{SwapError, SwapResult};
use crate::interop::{BlockId, InteropBlock, InteropTransaction};
use crate::metrics;
use crate::state::{get_json, insert_json_if_absent, set_json, KeyValueStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::{H256, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A block fetched live, with every transaction interpreted
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    /// Chain hash of the block, known even when nothing in it is swap-relevant
    pub hash: H256,
    pub height: u64,
    pub block: InteropBlock,
    pub transactions: Vec<(H256, InteropTransaction)>,
}

/// Live, platform-native fetch and interpretation
#[async_trait]
pub trait PlatformReader: Send + Sync {
    fn platform(&self) -> &str;

    /// Fails with `BlockNotFound` when the chain does not return the block
    async fn fetch_block(&self, chain: &str, id: BlockId) -> SwapResult<FetchedBlock>;

    async fn fetch_transaction(&self, chain: &str, hash: H256) -> SwapResult<InteropTransaction>;

    /// Current gas price in the platform's smallest unit
    async fn gas_price(&self) -> SwapResult<U256> {
        Err(SwapError::Oracle(format!(
            "{} has no gas market",
            self.platform()
        )))
    }
}

/// How a platform's fee quote is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    /// Flat fee, never fetched
    Fixed(U256),
    /// Live gas price times a fixed gas limit
    Metered { gas_limit: u64 },
}

#[derive(Clone)]
struct RegisteredPlatform {
    reader: Arc<dyn PlatformReader>,
    fee: FeePolicy,
}

pub struct OracleCache {
    store: Arc<dyn KeyValueStore>,
    platforms: DashMap<String, RegisteredPlatform>,
    fees: TimedCache<U256>,
    prices: TimedCache<Decimal>,
    price_source: Option<Arc<dyn PriceSource>>,
    config: OracleConfig,
}

fn block_table(platform: &str) -> String {
    format!("{}.block", platform)
}

fn index_table(platform: &str) -> String {
    format!("{}.blockindex", platform)
}

fn transaction_table(platform: &str) -> String {
    format!("{}.transaction", platform)
}

fn height_table(platform: &str) -> String {
    format!("{}.height", platform)
}

fn hash_key(chain: &str, hash: &H256) -> String {
    format!("{}:{:#x}", chain, hash)
}

fn height_key(chain: &str, height: u64) -> String {
    format!("{}:{}", chain, height)
}

impl OracleCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: OracleConfig,
        price_source: Option<Arc<dyn PriceSource>>,
    ) -> Self {
        Self {
            store,
            platforms: DashMap::new(),
            fees: TimedCache::with_secs(config.fee_ttl_secs),
            prices: TimedCache::with_secs(config.price_ttl_secs),
            price_source,
            config,
        }
    }

    /// Make a platform readable; replaces an earlier registration
    pub fn register_platform(&self, reader: Arc<dyn PlatformReader>, fee: FeePolicy) {
        let name = reader.platform().to_string();
        info!("Oracle registered platform {} ({:?})", name, fee);
        self.platforms.insert(name, RegisteredPlatform { reader, fee });
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.platforms.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn registered(&self, platform: &str) -> SwapResult<RegisteredPlatform> {
        self.platforms
            .get(platform)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SwapError::UnknownPlatform(platform.to_string()))
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// Persist a record unless one already exists under `key`
    ///
    /// A duplicate is logged and reported as `false`; the stored value wins.
    pub async fn persist<T: Serialize + Sync>(&self, table: &str, key: &str, value: &T) -> SwapResult<bool> {
        let inserted = insert_json_if_absent(self.store.as_ref(), table, key, value).await?;
        if !inserted {
            warn!("Oracle record {} already present in {}, keeping the stored value", key, table);
        }
        Ok(inserted)
    }

    async fn cached_block(&self, platform: &str, chain: &str, id: BlockId) -> SwapResult<Option<InteropBlock>> {
        let hash = match id {
            BlockId::Hash(hash) => hash,
            BlockId::Height(height) => {
                match get_json::<H256>(self.store.as_ref(), &index_table(platform), &height_key(chain, height)).await? {
                    Some(hash) => hash,
                    None => return Ok(None),
                }
            }
        };
        get_json(self.store.as_ref(), &block_table(platform), &hash_key(chain, &hash)).await
    }

    /// Read a block by hash, or by height when no hash is given
    pub async fn read_block(
        &self,
        platform: &str,
        chain: &str,
        hash: Option<H256>,
        height: Option<u64>,
    ) -> SwapResult<InteropBlock> {
        let id = match (hash, height) {
            (Some(hash), _) => BlockId::Hash(hash),
            (None, Some(height)) => BlockId::Height(height),
            (None, None) => {
                return Err(SwapError::Oracle(
                    "Block request needs a hash or a height".to_string(),
                ))
            }
        };
        let registered = self.registered(platform)?;

        if let Some(block) = self.cached_block(platform, chain, id).await? {
            metrics::record_cache_hit(platform, "block");
            return Ok(block);
        }
        metrics::record_cache_miss(platform, "block");

        let fetched = registered.reader.fetch_block(chain, id).await?;
        self.persist_fetched(platform, chain, &fetched).await?;

        Ok(fetched.block)
    }

    /// Re-fetch a block at `height` bypassing the cache
    ///
    /// The block record and height index are overwritten with the fresh block.
    /// Transactions already cached keep their stored interpretation; the fresh
    /// one is returned to the caller.
    pub async fn refresh_block(&self, platform: &str, chain: &str, height: u64) -> SwapResult<FetchedBlock> {
        let registered = self.registered(platform)?;
        let fetched = registered.reader.fetch_block(chain, BlockId::Height(height)).await?;

        for (hash, tx) in &fetched.transactions {
            insert_json_if_absent(self.store.as_ref(), &transaction_table(platform), &hash_key(chain, hash), tx)
                .await?;
        }
        set_json(
            self.store.as_ref(),
            &block_table(platform),
            &hash_key(chain, &fetched.hash),
            &fetched.block,
        )
        .await?;
        set_json(
            self.store.as_ref(),
            &index_table(platform),
            &height_key(chain, fetched.height),
            &fetched.hash,
        )
        .await?;

        debug!("Refreshed {} block {} on {}", platform, height, chain);
        Ok(fetched)
    }

    async fn persist_fetched(&self, platform: &str, chain: &str, fetched: &FetchedBlock) -> SwapResult<()> {
        for (hash, tx) in &fetched.transactions {
            self.persist(&transaction_table(platform), &hash_key(chain, hash), tx)
                .await?;
        }
        self.persist(
            &block_table(platform),
            &hash_key(chain, &fetched.hash),
            &fetched.block,
        )
        .await?;
        // index last, so it never points at a block that is not stored
        insert_json_if_absent(
            self.store.as_ref(),
            &index_table(platform),
            &height_key(chain, fetched.height),
            &fetched.hash,
        )
        .await?;
        Ok(())
    }

    /// Read a transaction; a cached "no swap" result is a hit
    pub async fn read_transaction(&self, platform: &str, chain: &str, hash: H256) -> SwapResult<InteropTransaction> {
        let registered = self.registered(platform)?;
        let table = transaction_table(platform);
        let key = hash_key(chain, &hash);

        if let Some(tx) = get_json::<InteropTransaction>(self.store.as_ref(), &table, &key).await? {
            metrics::record_cache_hit(platform, "transaction");
            return Ok(tx);
        }
        metrics::record_cache_miss(platform, "transaction");

        let tx = registered.reader.fetch_transaction(chain, hash).await?;
        self.persist(&table, &key, &tx).await?;
        Ok(tx)
    }

    /// Every persisted block of a platform/chain, in storage order
    pub async fn read_all_blocks(&self, platform: &str, chain: &str) -> SwapResult<Vec<InteropBlock>> {
        let prefix = format!("{}:", chain);
        let mut blocks = Vec::new();
        for (key, value) in self.store.scan(&block_table(platform)).await? {
            if key.starts_with(&prefix) {
                blocks.push(serde_json::from_slice(&value)?);
            }
        }
        Ok(blocks)
    }

    pub async fn get_current_height(&self, platform: &str, chain: &str) -> SwapResult<Option<u64>> {
        get_json(self.store.as_ref(), &height_table(platform), chain).await
    }

    pub async fn set_current_height(&self, platform: &str, chain: &str, height: u64) -> SwapResult<()> {
        set_json(self.store.as_ref(), &height_table(platform), chain, &height).await?;
        metrics::record_checkpoint(platform, height);
        Ok(())
    }

    /// Fee quote for one transfer on `platform` at oracle time `now`
    pub async fn pull_fee(&self, now: DateTime<Utc>, platform: &str) -> SwapResult<U256> {
        let registered = self.registered(platform)?;

        match registered.fee {
            FeePolicy::Fixed(fee) => Ok(fee),
            FeePolicy::Metered { gas_limit } => {
                let gas_price = match self.fees.get_if_fresh(platform, now).await {
                    Some(price) => {
                        metrics::record_cache_hit(platform, "fee");
                        price
                    }
                    None => {
                        metrics::record_cache_miss(platform, "fee");
                        let price = registered.reader.gas_price().await?;
                        debug!("Refreshed {} gas price: {}", platform, price);
                        self.fees.store(platform, now, price).await;
                        price
                    }
                };
                Ok(gas_price * U256::from(gas_limit))
            }
        }
    }

    /// Fiat price of `symbol`; the fuel token is a fixed fraction of the staking token
    pub async fn pull_price(&self, now: DateTime<Utc>, symbol: &str) -> SwapResult<Decimal> {
        let source = match (&self.price_source, self.config.api_key()) {
            (Some(source), Some(_)) => source,
            _ => {
                return Err(SwapError::Oracle(
                    "Price API key not configured".to_string(),
                ))
            }
        };

        if let Some(price) = self.prices.get_if_fresh(symbol, now).await {
            return Ok(price);
        }

        let fiat = &self.config.fiat_symbol;
        let price = if symbol == self.config.fuel_symbol {
            let staking = source.fetch_price(&self.config.staking_symbol, fiat).await?;
            staking
                .checked_div(Decimal::from(self.config.fuel_price_divisor))
                .ok_or_else(|| SwapError::Config("Fuel price divisor must be non-zero".to_string()))?
        } else {
            source.fetch_price(symbol, fiat).await?
        };

        self.prices.store(symbol, now, price).await;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::price::MockPriceSource;
    use super::*;
    use crate::state::MemoryStore;
    use crate::testing::{transfer, FakeReader};
    use chrono::{Duration, TimeZone};
    use mockall::predicate::eq;

    fn oracle_with(reader: Arc<FakeReader>, fee: FeePolicy) -> OracleCache {
        let oracle = OracleCache::new(Arc::new(MemoryStore::new()), OracleConfig::default(), None);
        oracle.register_platform(reader, fee);
        oracle
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_read_block_requires_hash_or_height() {
        let oracle = oracle_with(Arc::new(FakeReader::new("neo")), FeePolicy::Fixed(U256::one()));
        let err = oracle.read_block("neo", "main", None, None).await.unwrap_err();
        assert!(matches!(err, SwapError::Oracle(_)));

        let err = oracle.read_block("tron", "main", None, Some(1)).await.unwrap_err();
        assert!(matches!(err, SwapError::UnknownPlatform(_)));
    }

    #[tokio::test]
    async fn test_empty_block_is_cached_and_not_refetched() {
        let reader = Arc::new(FakeReader::new("neo"));
        reader.add_block(10, vec![]);
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::one()));

        let first = oracle.read_block("neo", "main", None, Some(10)).await.unwrap();
        assert!(first.hash.is_none());
        let second = oracle.read_block("neo", "main", None, Some(10)).await.unwrap();
        assert_eq!(first, second);
        let by_hash = oracle
            .read_block("neo", "main", Some(FakeReader::block_hash(10)), None)
            .await
            .unwrap();
        assert_eq!(by_hash, first);

        assert_eq!(reader.block_fetches(), 1);
    }

    #[tokio::test]
    async fn test_missing_block_is_not_cached() {
        let reader = Arc::new(FakeReader::new("neo"));
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::one()));

        let err = oracle.read_block("neo", "main", None, Some(5)).await.unwrap_err();
        assert!(err.is_block_not_found());

        reader.add_block(5, vec![]);
        assert!(oracle.read_block("neo", "main", None, Some(5)).await.is_ok());
        assert_eq!(reader.block_fetches(), 2);
    }

    #[tokio::test]
    async fn test_block_transactions_are_persisted() {
        let reader = Arc::new(FakeReader::new("neo"));
        let tx_hash = H256::repeat_byte(0x42);
        reader.add_block(11, vec![(tx_hash, vec![transfer("AFrom", "ASwap", 50)])]);
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::one()));

        let block = oracle.read_block("neo", "main", None, Some(11)).await.unwrap();
        assert_eq!(block.transactions, vec![tx_hash]);

        let tx = oracle.read_transaction("neo", "main", tx_hash).await.unwrap();
        assert_eq!(tx.transfers.len(), 1);
        assert_eq!(reader.transaction_fetches(), 0);
    }

    #[tokio::test]
    async fn test_negative_transaction_result_is_a_hit() {
        let reader = Arc::new(FakeReader::new("neo"));
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::one()));
        let hash = H256::repeat_byte(9);

        let tx = oracle.read_transaction("neo", "main", hash).await.unwrap();
        assert_eq!(tx, InteropTransaction::empty());
        let tx = oracle.read_transaction("neo", "main", hash).await.unwrap();
        assert_eq!(tx, InteropTransaction::empty());

        assert_eq!(reader.transaction_fetches(), 1);
    }

    #[tokio::test]
    async fn test_persist_is_first_write_wins() {
        let oracle = oracle_with(Arc::new(FakeReader::new("neo")), FeePolicy::Fixed(U256::one()));
        assert!(oracle.persist("neo.transaction", "main:k", &1u64).await.unwrap());
        assert!(!oracle.persist("neo.transaction", "main:k", &2u64).await.unwrap());

        let stored: Option<u64> = get_json(oracle.store().as_ref(), "neo.transaction", "main:k")
            .await
            .unwrap();
        assert_eq!(stored, Some(1));
    }

    #[tokio::test]
    async fn test_read_all_blocks_and_heights() {
        let reader = Arc::new(FakeReader::new("neo"));
        reader.add_block(1, vec![(H256::repeat_byte(1), vec![transfer("A", "B", 1)])]);
        reader.add_block(2, vec![]);
        let oracle = oracle_with(reader, FeePolicy::Fixed(U256::one()));

        oracle.read_block("neo", "main", None, Some(1)).await.unwrap();
        oracle.read_block("neo", "main", None, Some(2)).await.unwrap();
        assert_eq!(oracle.read_all_blocks("neo", "main").await.unwrap().len(), 2);
        assert!(oracle.read_all_blocks("neo", "test").await.unwrap().is_empty());

        assert_eq!(oracle.get_current_height("neo", "main").await.unwrap(), None);
        oracle.set_current_height("neo", "main", 7).await.unwrap();
        oracle.set_current_height("neo", "main", 3).await.unwrap();
        assert_eq!(oracle.get_current_height("neo", "main").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_refresh_repoints_height_index() {
        let reader = Arc::new(FakeReader::new("neo"));
        reader.add_block(4, vec![]);
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::one()));
        oracle.read_block("neo", "main", None, Some(4)).await.unwrap();

        let tx_hash = H256::repeat_byte(0x44);
        reader.add_block(4, vec![(tx_hash, vec![transfer("A", "B", 3)])]);
        let fetched = oracle.refresh_block("neo", "main", 4).await.unwrap();
        assert_eq!(fetched.block.transactions, vec![tx_hash]);

        let block = oracle.read_block("neo", "main", None, Some(4)).await.unwrap();
        assert_eq!(block.transactions, vec![tx_hash]);
    }

    #[tokio::test]
    async fn test_fixed_fee() {
        let reader = Arc::new(FakeReader::new("neo"));
        let oracle = oracle_with(reader.clone(), FeePolicy::Fixed(U256::from(10_000_000u64)));
        assert_eq!(oracle.pull_fee(t0(), "neo").await.unwrap(), U256::from(10_000_000u64));
        assert_eq!(reader.gas_price_fetches(), 0);
    }

    #[tokio::test]
    async fn test_metered_fee_refreshes_once_per_ttl() {
        let reader = Arc::new(FakeReader::new("ethereum"));
        reader.set_gas_price(U256::from(30u64));
        let oracle = oracle_with(reader.clone(), FeePolicy::Metered { gas_limit: 21_000 });

        let first = oracle.pull_fee(t0(), "ethereum").await.unwrap();
        reader.set_gas_price(U256::from(45u64));
        let second = oracle.pull_fee(t0() + Duration::seconds(30), "ethereum").await.unwrap();
        assert_eq!(first, U256::from(30u64 * 21_000));
        assert_eq!(first, second);
        assert_eq!(reader.gas_price_fetches(), 1);

        let third = oracle.pull_fee(t0() + Duration::seconds(61), "ethereum").await.unwrap();
        assert_eq!(third, U256::from(45u64 * 21_000));
        assert_eq!(reader.gas_price_fetches(), 2);
    }

    #[tokio::test]
    async fn test_price_requires_credential() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_price().never();
        let oracle = OracleCache::new(
            Arc::new(MemoryStore::new()),
            OracleConfig::default(),
            Some(Arc::new(source)),
        );

        let err = oracle.pull_price(t0(), "SOUL").await.unwrap_err();
        assert!(matches!(err, SwapError::Oracle(_)));
    }

    #[tokio::test]
    async fn test_fuel_price_is_fraction_of_staking_price() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_price()
            .with(eq("SOUL"), eq("USD"))
            .times(1)
            .returning(|_, _| Ok(Decimal::new(250, 2)));
        let config = OracleConfig {
            price_api_key: Some("key".to_string()),
            ..OracleConfig::default()
        };
        let oracle = OracleCache::new(Arc::new(MemoryStore::new()), config, Some(Arc::new(source)));

        let fuel = oracle.pull_price(t0(), "KCAL").await.unwrap();
        assert_eq!(fuel, Decimal::new(50, 2));
        // cached within the TTL
        let again = oracle.pull_price(t0() + Duration::seconds(5), "KCAL").await.unwrap();
        assert_eq!(again, fuel);
    }
}
