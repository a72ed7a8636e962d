//! Swap orchestrator: one worker per platform driving detection and settlement

use super::ledger::{PossibleFailure, SwapLedger};
use super::registry::{AddressRegistry, SwapAddress};
use crate::error::{SwapError, SwapResult};
use crate::interop::{InteropTransaction, OutboundSwap, PendingSwap};
use crate::metrics;
use crate::oracle::OracleCache;
use crate::signer::{MempoolSubmitter, NativeSigner};
use crate::swapper::{PlatformSwapper, SettlementStatus};

use dashmap::DashSet;
use ethers::types::H256;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// What one platform cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub detected: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub possibly_failed: usize,
}

pub struct SwapOrchestrator {
    swappers: HashMap<String, Arc<PlatformSwapper>>,
    oracle: Arc<OracleCache>,
    ledger: Arc<SwapLedger>,
    registry: Arc<AddressRegistry>,
    native_signer: Arc<dyn NativeSigner>,
    mempool: Arc<dyn MempoolSubmitter>,
    /// Outbound requests waiting for settlement, per platform
    outbound: Mutex<HashMap<String, VecDeque<OutboundSwap>>>,
    /// Inbound swaps whose native settlement failed, retried every cycle
    retry: Mutex<HashMap<H256, PendingSwap>>,
    /// Source hashes currently being settled
    in_flight: DashSet<H256>,
    poll_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl SwapOrchestrator {
    pub fn new(
        swappers: Vec<PlatformSwapper>,
        oracle: Arc<OracleCache>,
        ledger: Arc<SwapLedger>,
        registry: Arc<AddressRegistry>,
        native_signer: Arc<dyn NativeSigner>,
        mempool: Arc<dyn MempoolSubmitter>,
        poll_interval: Duration,
    ) -> Self {
        let swappers = swappers
            .into_iter()
            .map(|swapper| (swapper.name().to_string(), Arc::new(swapper)))
            .collect();

        Self {
            swappers,
            oracle,
            ledger,
            registry,
            native_signer,
            mempool,
            outbound: Mutex::new(HashMap::new()),
            retry: Mutex::new(HashMap::new()),
            in_flight: DashSet::new(),
            poll_interval,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Reload outbound requests persisted before a restart
    pub async fn restore_outbound(&self) -> SwapResult<usize> {
        let mut restored = 0;
        let mut outbound = self.outbound.lock().await;
        for request in self.ledger.queued_outbound().await? {
            if !self.swappers.contains_key(&request.platform) {
                warn!(
                    "Outbound request {:#x} targets unconfigured platform {}, leaving it stored",
                    request.source_hash, request.platform
                );
                continue;
            }
            let queue = outbound.entry(request.platform.clone()).or_default();
            if queue.iter().all(|r| r.source_hash != request.source_hash) {
                queue.push_back(request);
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Run one worker per platform until shutdown
    pub async fn run(self: Arc<Self>) -> SwapResult<()> {
        info!("Swap orchestrator started with {} platforms", self.swappers.len());
        let restored = self.restore_outbound().await?;
        if restored > 0 {
            info!("Restored {} outbound requests", restored);
        }

        let workers: Vec<_> = self
            .swappers
            .values()
            .cloned()
            .map(|swapper| {
                let this = self.clone();
                tokio::spawn(async move { this.run_platform(swapper).await })
            })
            .collect();

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Platform worker terminated abnormally: {}", e);
            }
        }

        info!("Swap orchestrator stopped");
        Ok(())
    }

    async fn run_platform(&self, swapper: Arc<PlatformSwapper>) {
        let mut ticker = interval(self.poll_interval);
        info!("Worker for {} started", swapper.name());

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            let report = self.run_cycle(&swapper).await;
            if report != CycleReport::default() {
                info!("{} cycle: {:?}", swapper.name(), report);
            }
        }
    }

    /// Stop every worker after its current cycle
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Swap orchestrator stopping");
    }

    /// Detect new swaps, settle inbound swaps, then drain the outbound queue
    pub async fn run_cycle(&self, swapper: &PlatformSwapper) -> CycleReport {
        let mut report = CycleReport::default();
        let platform = swapper.name();

        let detected = swapper.update().await;
        report.detected = detected.len();

        let mut inbound: Vec<PendingSwap> = {
            let retry = self.retry.lock().await;
            retry.values().filter(|s| s.platform == platform).cloned().collect()
        };
        for swap in detected {
            if !inbound.iter().any(|s| s.source_hash == swap.source_hash) {
                inbound.push(swap);
            }
        }

        for swap in inbound {
            match self.settle_inbound(&swap).await {
                Ok(submitted) => {
                    if submitted {
                        report.submitted += 1;
                    }
                    self.retry.lock().await.remove(&swap.source_hash);
                }
                Err(e) => {
                    if e.should_alert() {
                        error!("Settling {} swap {:#x} failed: {}", platform, swap.source_hash, e);
                    } else {
                        warn!("Settling {} swap {:#x} failed, will retry: {}", platform, swap.source_hash, e);
                    }
                    metrics::record_settlement_failure(platform, "inbound");
                    self.retry.lock().await.insert(swap.source_hash, swap);
                }
            }
        }

        self.drain_outbound(swapper, &mut report).await;
        report
    }

    /// Sign and submit the native settlement of an inbound swap, once
    async fn settle_inbound(&self, swap: &PendingSwap) -> SwapResult<bool> {
        if let Some(tx_id) = self.ledger.in_progress(&swap.source_hash).await? {
            debug!("Swap {:#x} already settled by {}", swap.source_hash, tx_id);
            return Ok(false);
        }
        if !self.in_flight.insert(swap.source_hash) {
            return Ok(false);
        }

        let result = async {
            let signed = self.native_signer.sign_settlement(swap).await?;
            self.mempool.submit(&signed).await?;
            self.ledger.record_submitted(swap.source_hash, &signed.tx_id).await?;
            Ok::<_, SwapError>(signed.tx_id)
        }
        .await;
        self.in_flight.remove(&swap.source_hash);

        let tx_id = result?;
        info!(
            "Submitted settlement {} for {} swap {:#x} ({} {} to {})",
            tx_id, swap.platform, swap.source_hash, swap.value, swap.symbol, swap.destination_address
        );
        metrics::record_inbound_submitted(&swap.platform);
        Ok(true)
    }

    async fn drain_outbound(&self, swapper: &PlatformSwapper, report: &mut CycleReport) {
        let platform = swapper.name();
        let queued: Vec<OutboundSwap> = {
            let mut outbound = self.outbound.lock().await;
            match outbound.get_mut(platform) {
                Some(queue) => queue.drain(..).collect(),
                None => return,
            }
        };

        let mut still_pending = Vec::new();
        for request in queued {
            match self.ledger.is_settled(&request.source_hash).await {
                Ok(true) => {
                    self.forget_outbound(&request.source_hash).await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Cannot read settlement state of {:#x}: {}", request.source_hash, e);
                    still_pending.push(request);
                    continue;
                }
            }
            if !self.in_flight.insert(request.source_hash) {
                still_pending.push(request);
                continue;
            }

            let status = swapper.settle(&request).await;
            self.in_flight.remove(&request.source_hash);

            match status {
                Ok(SettlementStatus::Confirmed(tx_id)) => {
                    info!("{} settlement {} for {:#x} confirmed", platform, tx_id, request.source_hash);
                    if let Err(e) = self.ledger.mark_settled(request.source_hash, &tx_id).await {
                        error!("Recording settlement of {:#x} failed: {}", request.source_hash, e);
                    }
                    self.forget_outbound(&request.source_hash).await;
                    metrics::record_outbound_confirmed(platform);
                    report.confirmed += 1;
                }
                Ok(SettlementStatus::Pending) => {
                    report.pending += 1;
                    still_pending.push(request);
                }
                Ok(SettlementStatus::PossiblyFailed { tx_id }) => {
                    if let Err(e) = self.ledger.record_possible_failure(request.source_hash, &tx_id).await {
                        error!("Recording possible failure of {:#x} failed: {}", request.source_hash, e);
                    }
                    self.forget_outbound(&request.source_hash).await;
                    metrics::record_possible_failure(platform);
                    report.possibly_failed += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} settlement for {:#x} failed, will retry: {}", platform, request.source_hash, e);
                    } else {
                        error!("{} settlement for {:#x} failed: {}", platform, request.source_hash, e);
                    }
                    metrics::record_settlement_failure(platform, "outbound");
                    report.pending += 1;
                    still_pending.push(request);
                }
            }
        }

        if !still_pending.is_empty() {
            let mut outbound = self.outbound.lock().await;
            let queue = outbound.entry(platform.to_string()).or_default();
            for request in still_pending.into_iter().rev() {
                queue.push_front(request);
            }
        }
    }

    async fn forget_outbound(&self, source_hash: &H256) {
        if let Err(e) = self.ledger.dequeue_outbound(source_hash).await {
            error!("Removing queued request {:#x} failed: {}", source_hash, e);
        }
    }

    fn swapper(&self, platform: &str) -> SwapResult<&Arc<PlatformSwapper>> {
        self.swappers
            .get(platform)
            .ok_or_else(|| SwapError::UnknownPlatform(platform.to_string()))
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.swappers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queue an outbound settlement; `false` if it is already queued or settled
    pub async fn submit_outbound(&self, request: OutboundSwap) -> SwapResult<bool> {
        self.swapper(&request.platform)?;
        if self.ledger.is_settled(&request.source_hash).await? {
            return Ok(false);
        }

        let mut outbound = self.outbound.lock().await;
        let queue = outbound.entry(request.platform.clone()).or_default();
        if queue.iter().any(|r| r.source_hash == request.source_hash) || self.in_flight.contains(&request.source_hash) {
            return Ok(false);
        }
        self.ledger.queue_outbound(&request).await?;
        info!(
            "Queued {} settlement for {:#x}: {} {} to {}",
            request.platform, request.source_hash, request.amount, request.symbol, request.destination_address
        );
        queue.push_back(request);
        Ok(true)
    }

    pub async fn resync_block(&self, platform: &str, height: u64) -> SwapResult<()> {
        self.swapper(platform)?.resync_block(height).await;
        Ok(())
    }

    pub async fn current_height(&self, platform: &str) -> SwapResult<u64> {
        self.swapper(platform)?.current_height().await
    }

    pub async fn set_current_height(&self, platform: &str, height: u64) -> SwapResult<()> {
        self.swapper(platform)?.set_current_height(height).await
    }

    pub async fn remove_in_progress(&self, source_hash: &H256) -> SwapResult<bool> {
        self.ledger.remove_in_progress(source_hash).await
    }

    pub async fn possible_failures(&self) -> SwapResult<Vec<PossibleFailure>> {
        self.ledger.possible_failures().await
    }

    pub fn list_addresses(&self, platform: &str) -> SwapResult<Vec<SwapAddress>> {
        self.swapper(platform)?;
        Ok(self.registry.list(platform))
    }

    pub fn add_address(&self, platform: &str, local: &str, external: &str) -> SwapResult<bool> {
        let swapper = self.swapper(platform)?;
        if !swapper.kind().is_valid_address(external) {
            return Err(SwapError::InvalidAddress(format!("{} on {}", external, platform)));
        }
        Ok(self.registry.register(platform, local, external))
    }

    /// Oracle view of an external transaction
    pub async fn read_transaction(&self, platform: &str, hash: H256) -> SwapResult<InteropTransaction> {
        let swapper = self.swapper(platform)?;
        self.oracle.read_transaction(platform, swapper.chain(), hash).await
    }

    /// Reachability of every platform node
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for name in self.platforms() {
            if let Some(swapper) = self.swappers.get(&name) {
                let healthy = swapper.health_check().await;
                metrics::record_platform_health(&name, healthy);
                results.push((name, healthy));
            }
        }
        results
    }
}
