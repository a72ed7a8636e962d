//! Checkpointed block scanner shared by every platform
//!
//! The checkpoint is the next height to fetch: every height below it has been
//! interpreted. A batch covers `[checkpoint, checkpoint + n)` and the
//! checkpoint only moves once the whole batch is fetched and interpreted.

use crate::chain::ChainClient;
use crate::config::SwapperConfig;
use crate::error::{SwapError, SwapResult};
use crate::interop::{InteropBlock, InteropTransaction, InteropTransfer, PendingSwap};
use crate::metrics;
use crate::oracle::OracleCache;

use async_trait::async_trait;
use ethers::types::H256;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// External index of blocks known to hold swap transactions
#[async_trait]
pub trait SwapBlockIndex: Send + Sync {
    /// Ascending ids of swap blocks at or above `height`
    async fn swap_block_ids(&self, height: u64) -> SwapResult<Vec<u64>>;
}

#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub batch_size: u64,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl From<&SwapperConfig> for ScanPolicy {
    fn from(config: &SwapperConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            retry_initial: Duration::from_millis(config.retry_initial_ms),
            retry_max: Duration::from_millis(config.retry_max_ms),
        }
    }
}

struct ScanState {
    initial_start: bool,
}

pub struct BlockScanner {
    platform: String,
    chain: String,
    /// Checkpoint used before one was ever persisted
    start_height: u64,
    oracle: Arc<OracleCache>,
    client: Arc<dyn ChainClient>,
    swap_index: Option<Arc<dyn SwapBlockIndex>>,
    policy: ScanPolicy,
    /// Platform lock: serializes updates and checkpoint writes
    state: Mutex<ScanState>,
    resync: Mutex<VecDeque<u64>>,
}

impl BlockScanner {
    pub fn new(
        platform: &str,
        chain: &str,
        start_height: u64,
        oracle: Arc<OracleCache>,
        client: Arc<dyn ChainClient>,
        policy: ScanPolicy,
    ) -> Self {
        Self {
            platform: platform.to_string(),
            chain: chain.to_string(),
            start_height,
            oracle,
            client,
            swap_index: None,
            policy,
            state: Mutex::new(ScanState {
                initial_start: true,
            }),
            resync: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_swap_index(mut self, index: Arc<dyn SwapBlockIndex>) -> Self {
        self.swap_index = Some(index);
        self
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub async fn checkpoint(&self) -> SwapResult<u64> {
        Ok(self
            .oracle
            .get_current_height(&self.platform, &self.chain)
            .await?
            .unwrap_or(self.start_height))
    }

    /// Operator override of the checkpoint, taken under the platform lock
    pub async fn set_checkpoint(&self, height: u64) -> SwapResult<()> {
        let _state = self.state.lock().await;
        info!("Setting {} checkpoint to {}", self.platform, height);
        self.oracle
            .set_current_height(&self.platform, &self.chain, height)
            .await
    }

    /// Queue a height for forced reprocessing on the next update
    pub async fn request_resync(&self, height: u64) {
        self.resync.lock().await.push_back(height);
        info!("Queued resync of {} block {}", self.platform, height);
    }

    /// Detect swaps since the last checkpoint
    ///
    /// Errors are logged; swaps from batches committed before the error are
    /// still returned.
    pub async fn update(&self) -> Vec<PendingSwap> {
        let mut state = self.state.lock().await;
        let mut swaps = Vec::new();

        if state.initial_start {
            match self.initial_sync(&mut swaps).await {
                Ok(()) => state.initial_start = false,
                Err(e) => error!("Initial {} sync failed: {}", self.platform, e),
            }
            // swaps that arrived while we were down are settled first
            return swaps;
        }

        if let Err(e) = self.scan(&mut swaps).await {
            error!("{} block sync failed: {}", self.platform, e);
        }
        swaps
    }

    async fn initial_sync(&self, swaps: &mut Vec<PendingSwap>) -> SwapResult<()> {
        let blocks = self.oracle.read_all_blocks(&self.platform, &self.chain).await?;
        debug!("Replaying {} cached {} blocks", blocks.len(), self.platform);

        for block in &blocks {
            if let Err(e) = self.process_block(block, None, swaps).await {
                warn!(
                    "Cached {} block {:?} was not processed correctly: {}",
                    self.platform, block.hash, e
                );
            }
        }

        if let Some(index) = &self.swap_index {
            if let Err(e) = self.quick_sync(index.as_ref(), swaps).await {
                error!("Quick sync of {} failed, continuing with linear scan: {}", self.platform, e);
            }
        }
        Ok(())
    }

    async fn quick_sync(&self, index: &dyn SwapBlockIndex, swaps: &mut Vec<PendingSwap>) -> SwapResult<()> {
        let mut checkpoint = self.checkpoint().await?;
        let mut ids = index.swap_block_ids(checkpoint).await?;
        ids.sort_unstable();
        ids.dedup();
        info!("Quick sync found {} {} blocks to process", ids.len(), self.platform);

        for id in ids {
            let block = self
                .oracle
                .read_block(&self.platform, &self.chain, None, Some(id))
                .await?;
            self.process_block(&block, None, swaps).await?;

            if id + 1 > checkpoint {
                checkpoint = id + 1;
                self.oracle
                    .set_current_height(&self.platform, &self.chain, checkpoint)
                    .await?;
            }
        }
        Ok(())
    }

    async fn scan(&self, swaps: &mut Vec<PendingSwap>) -> SwapResult<()> {
        let mut checkpoint = self.checkpoint().await?;
        self.drain_resync(checkpoint, swaps).await;

        let chain_height = self.client.get_height().await?;
        while chain_height > checkpoint {
            let batch = (chain_height - checkpoint).min(self.policy.batch_size);
            debug!(
                "Swaps: {} chain height {}, checkpoint {}, delta {}",
                self.platform,
                chain_height,
                checkpoint,
                chain_height - checkpoint
            );

            let blocks = join_all((checkpoint..checkpoint + batch).map(|h| self.fetch_with_backoff(h))).await;

            let mut found = Vec::new();
            for (block, height) in blocks.iter().zip(checkpoint..) {
                self.process_block(block, None, &mut found)
                    .await
                    .map_err(|e| {
                        error!("{} block {} rejected: {}", self.platform, height, e);
                        e
                    })?;
            }

            checkpoint += batch;
            self.oracle
                .set_current_height(&self.platform, &self.chain, checkpoint)
                .await?;
            swaps.extend(found);
        }
        Ok(())
    }

    async fn drain_resync(&self, checkpoint: u64, swaps: &mut Vec<PendingSwap>) {
        let requested: Vec<u64> = self.resync.lock().await.drain(..).collect();

        for height in requested {
            if height >= checkpoint {
                warn!(
                    "Resync of {} block {} is not below checkpoint {}, dropping",
                    self.platform, height, checkpoint
                );
                continue;
            }

            info!("Resyncing {} block {}", self.platform, height);
            let fetched = match self.oracle.refresh_block(&self.platform, &self.chain, height).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("Resync of {} block {} failed: {}", self.platform, height, e);
                    continue;
                }
            };
            let fresh: HashMap<H256, InteropTransaction> = fetched.transactions.into_iter().collect();
            if let Err(e) = self.process_block(&fetched.block, Some(&fresh), swaps).await {
                error!("Resync of {} block {} failed: {}", self.platform, height, e);
            }
        }
    }

    /// Read a block through the oracle, retrying until it succeeds
    async fn fetch_with_backoff(&self, height: u64) -> InteropBlock {
        let mut delay = self.policy.retry_initial;

        loop {
            match self
                .oracle
                .read_block(&self.platform, &self.chain, None, Some(height))
                .await
            {
                Ok(block) => return block,
                Err(e) if e.is_block_not_found() => {
                    warn!("{} block {} is null, possible connection failure", self.platform, height);
                }
                Err(e) => {
                    error!("Reading {} block {} failed: {:?}", self.platform, height, e);
                }
            }

            metrics::record_fetch_retry(&self.platform);
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.policy.retry_max);
        }
    }

    /// Turn one block into pending swaps; all or nothing
    async fn process_block(
        &self,
        block: &InteropBlock,
        fresh: Option<&HashMap<H256, InteropTransaction>>,
        swaps: &mut Vec<PendingSwap>,
    ) -> SwapResult<()> {
        let mut found = Vec::new();

        for tx_hash in &block.transactions {
            let tx = match fresh.and_then(|txs| txs.get(tx_hash)) {
                Some(tx) => tx.clone(),
                None => {
                    self.oracle
                        .read_transaction(&self.platform, &self.chain, *tx_hash)
                        .await?
                }
            };

            let transfer = match aggregate_transfers(&tx.transfers)? {
                Some(transfer) => transfer,
                None => continue,
            };

            if transfer.is_self_transfer() {
                debug!("Ignoring consolidation transfer in {:#x}", tx_hash);
                continue;
            }

            found.push(PendingSwap::from_transfer(&self.platform, *tx_hash, &transfer));
        }

        for swap in &found {
            info!(
                "Detected {} swap {:#x}: {} {} from {} to {}",
                self.platform, swap.source_hash, swap.value, swap.symbol, swap.source_address, swap.destination_address
            );
            metrics::record_swap_detected(&self.platform);
        }
        swaps.extend(found);
        Ok(())
    }
}

/// Collapse a transaction's transfers into the single transfer it represents
///
/// Several transfers must agree on every party and the symbol, carry no
/// payload, and are summed.
pub fn aggregate_transfers(transfers: &[InteropTransfer]) -> SwapResult<Option<InteropTransfer>> {
    let first = match transfers {
        [] => return Ok(None),
        [only] => return Ok(Some(only.clone())),
        [first, ..] => first,
    };

    let mut total = first.value;
    for (i, transfer) in transfers.iter().enumerate() {
        if transfer.source_address != first.source_address {
            return Err(SwapError::Oracle("Transfers with multiple source addresses are not supported".to_string()));
        }
        if transfer.destination_address != first.destination_address {
            return Err(SwapError::Oracle(
                "Transfers with multiple destination addresses are not supported".to_string(),
            ));
        }
        if transfer.interop_address != first.interop_address {
            return Err(SwapError::Oracle("Transfers with multiple interop addresses are not supported".to_string()));
        }
        if transfer.symbol != first.symbol {
            return Err(SwapError::Oracle("Transfers with multiple tokens are not supported".to_string()));
        }
        if !transfer.data.is_empty() {
            return Err(SwapError::Oracle("Aggregated transfers with custom data are not supported".to_string()));
        }
        if i > 0 {
            total = total
                .checked_add(transfer.value)
                .ok_or_else(|| SwapError::Oracle("Transfer sum overflows".to_string()))?;
        }
    }

    Ok(Some(InteropTransfer {
        value: total,
        ..first.clone()
    }))
}
