//! Outbound settlement: sign, broadcast once, then verify
//!
//! A broadcast is recorded in the swap ledger before verification starts, so a
//! request that comes back after a restart is verified instead of signed again.

use crate::chain::ChainClient;
use crate::config::SwapperConfig;
use crate::coordination::SwapLedger;
use crate::error::SwapResult;
use crate::interop::OutboundSwap;
use crate::signer::TransferSigner;

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    /// Included on the target chain under this transaction id
    Confirmed(String),
    /// Not settled yet; ask again on a later cycle
    Pending,
    /// Broadcast but neither included nor in the mempool of the node that took it
    PossiblyFailed { tx_id: String },
}

#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    pub delay: Duration,
    pub attempts: u32,
}

impl From<&SwapperConfig> for VerifyPolicy {
    fn from(config: &SwapperConfig) -> Self {
        Self {
            delay: Duration::from_secs(config.verify_delay_secs),
            attempts: config.verify_attempts,
        }
    }
}

pub struct Settlement {
    platform: String,
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn TransferSigner>,
    ledger: Arc<SwapLedger>,
    policy: VerifyPolicy,
}

impl Settlement {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TransferSigner>,
        ledger: Arc<SwapLedger>,
        policy: VerifyPolicy,
    ) -> Self {
        Self {
            platform: client.platform().to_string(),
            client,
            signer,
            ledger,
            policy,
        }
    }

    /// Pay out `request` on this platform unless a broadcast is already on record
    pub async fn settle(&self, request: &OutboundSwap) -> SwapResult<SettlementStatus> {
        if let Some(tx_id) = self.ledger.in_progress(&request.source_hash).await? {
            debug!(
                "Swap {:#x} already broadcast as {}, verifying",
                request.source_hash, tx_id
            );
            return self.verify(request.source_hash, &tx_id).await;
        }

        let signed = match self.signer.sign_transfer(request).await {
            Ok(signed) => signed,
            Err(e) => {
                error!("Signing {} settlement for {:#x} failed: {}", self.platform, request.source_hash, e);
                return Ok(SettlementStatus::Pending);
            }
        };

        let broadcast = match self.client.broadcast(&signed).await {
            Ok(broadcast) => broadcast,
            Err(e) => {
                error!("Broadcast of {} settlement for {:#x} failed: {}", self.platform, request.source_hash, e);
                return Ok(SettlementStatus::Pending);
            }
        };

        info!(
            "Broadcast {} settlement {} for {:#x} via {}",
            self.platform, broadcast.tx_id, request.source_hash, broadcast.endpoint
        );
        self.ledger.record_in_progress(request.source_hash, &broadcast).await?;

        self.verify(request.source_hash, &broadcast.tx_id).await
    }

    /// Poll for inclusion, then fall back to the broadcasting node's mempool
    pub async fn verify(&self, source_hash: H256, tx_id: &str) -> SwapResult<SettlementStatus> {
        for attempt in 1..=self.policy.attempts {
            tokio::time::sleep(self.policy.delay).await;
            match self.client.is_included(tx_id).await {
                Ok(true) => return Ok(SettlementStatus::Confirmed(tx_id.to_string())),
                Ok(false) => debug!("{} not included yet (attempt {})", tx_id, attempt),
                Err(e) => warn!("Inclusion check of {} failed: {}", tx_id, e),
            }
        }

        let endpoint = match self.ledger.broadcast_endpoint(&source_hash).await? {
            Some(endpoint) => endpoint,
            None => {
                warn!("No broadcast endpoint recorded for {}, will verify later", tx_id);
                return Ok(SettlementStatus::Pending);
            }
        };

        match self.client.is_in_mempool(&endpoint, tx_id).await {
            Ok(true) => {
                debug!("{} still in the mempool of {}", tx_id, endpoint);
                return Ok(SettlementStatus::Pending);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Mempool check of {} at {} failed: {}", tx_id, endpoint, e);
                return Ok(SettlementStatus::Pending);
            }
        }

        // it may have been mined between the two checks
        if let Ok(true) = self.client.is_included(tx_id).await {
            return Ok(SettlementStatus::Confirmed(tx_id.to_string()));
        }

        error!(
            "Possible failed swap: {} settlement {} for {:#x} is neither included nor in the mempool of {}",
            self.platform, tx_id, source_hash, endpoint
        );
        Ok(SettlementStatus::PossiblyFailed {
            tx_id: tx_id.to_string(),
        })
    }
}
