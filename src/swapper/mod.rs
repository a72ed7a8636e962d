//! Per-platform swappers
//!
//! A swapper pairs the block scanner that detects inbound swaps on one
//! external platform with the settlement path that pays outbound swaps on it.
//! Platform differences live in the reader, client and signer plugged in by
//! [`build_swapper`]; the swapper itself is the same for every platform.

pub mod ethereum;
pub mod neo;
pub mod scanner;
pub mod settlement;

pub use ethereum::EthereumReader;
pub use neo::{NeoReader, NeoSwapIndex};
pub use scanner::{BlockScanner, ScanPolicy};
pub use settlement::{Settlement, SettlementStatus, VerifyPolicy};

use crate::chain::{ChainClient, EthApi, EthClient, NeoApi, NeoClient};
use crate::config::{PlatformConfig, PlatformKind, SwapperConfig};
use crate::coordination::{AddressRegistry, SwapLedger};
use crate::error::{SwapError, SwapResult};
use crate::interop::{OutboundSwap, PendingSwap};
use crate::oracle::{FeePolicy, OracleCache};
use crate::signer::{EthereumWallet, TransferSigner};

use ethers::types::U256;
use std::sync::Arc;
use tracing::info;

pub struct PlatformSwapper {
    name: String,
    kind: PlatformKind,
    client: Arc<dyn ChainClient>,
    scanner: BlockScanner,
    settlement: Settlement,
}

impl PlatformSwapper {
    pub fn new(
        name: &str,
        kind: PlatformKind,
        client: Arc<dyn ChainClient>,
        scanner: BlockScanner,
        settlement: Settlement,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            client,
            scanner,
            settlement,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    pub fn chain(&self) -> &str {
        self.scanner.chain()
    }

    /// Swaps detected since the last update
    pub async fn update(&self) -> Vec<PendingSwap> {
        self.scanner.update().await
    }

    pub async fn resync_block(&self, height: u64) {
        self.scanner.request_resync(height).await
    }

    pub async fn current_height(&self) -> SwapResult<u64> {
        self.scanner.checkpoint().await
    }

    pub async fn set_current_height(&self, height: u64) -> SwapResult<()> {
        self.scanner.set_checkpoint(height).await
    }

    pub async fn settle(&self, request: &OutboundSwap) -> SwapResult<SettlementStatus> {
        self.settlement.settle(request).await
    }

    pub async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}

/// Everything a swapper shares with the rest of the process
pub struct SwapperContext {
    pub oracle: Arc<OracleCache>,
    pub registry: Arc<AddressRegistry>,
    pub ledger: Arc<SwapLedger>,
    /// Remote signer used where no local wallet signs
    pub remote_signer: Arc<dyn TransferSigner>,
    pub config: SwapperConfig,
}

/// Build the swapper of one configured platform and register its reader with the oracle
pub fn build_swapper(name: &str, config: &PlatformConfig, ctx: &SwapperContext) -> SwapResult<PlatformSwapper> {
    let policy = ScanPolicy::from(&ctx.config);
    let verify = VerifyPolicy::from(&ctx.config);

    let swapper = match config.kind {
        PlatformKind::Neo => {
            let api = Arc::new(NeoClient::new(name, &config.rpc_urls)?);
            let reader = NeoReader::new(name, api.clone(), ctx.registry.clone(), config.clone());
            ctx.oracle
                .register_platform(Arc::new(reader), FeePolicy::Fixed(U256::from(config.fixed_fee)));

            let mut scanner = BlockScanner::new(
                name,
                &config.chain,
                config.interop_height,
                ctx.oracle.clone(),
                api.clone(),
                policy,
            );
            if let (true, Some(contract)) = (config.quick_sync, &config.quick_sync_contract) {
                let index = NeoSwapIndex::new(name, api.clone() as Arc<dyn NeoApi>, contract, ctx.registry.clone());
                scanner = scanner.with_swap_index(Arc::new(index));
            }

            let settlement = Settlement::new(api.clone(), ctx.remote_signer.clone(), ctx.ledger.clone(), verify);
            PlatformSwapper::new(name, config.kind, api, scanner, settlement)
        }
        PlatformKind::Ethereum => {
            let chain_id = config
                .chain_id
                .ok_or_else(|| SwapError::Config(format!("Platform {} needs a chain_id", name)))?;
            let api = Arc::new(EthClient::new(name, &config.rpc_urls, chain_id, config.confirmations)?);
            let reader = EthereumReader::new(name, api.clone(), ctx.registry.clone(), config.clone());
            ctx.oracle.register_platform(
                Arc::new(reader),
                FeePolicy::Metered {
                    gas_limit: config.gas_limit,
                },
            );

            let scanner = BlockScanner::new(
                name,
                &config.chain,
                config.interop_height,
                ctx.oracle.clone(),
                api.clone(),
                policy,
            );
            let wallet = EthereumWallet::new(name, api.clone() as Arc<dyn EthApi>, ctx.oracle.clone(), config.clone())?;
            let settlement = Settlement::new(api.clone(), Arc::new(wallet), ctx.ledger.clone(), verify);
            PlatformSwapper::new(name, config.kind, api, scanner, settlement)
        }
    };

    info!("Swapper for {} ({:?}) initialized", name, config.kind);
    Ok(swapper)
}
