//! Transaction signing and native submission
//!
//! Key material for the native chain and for Neo lives in an external signing
//! service reached over JSON-RPC. Ethereum settlements are signed locally with
//! a wallet loaded from the environment.

use crate::chain::{EthApi, RpcEndpoints};
use crate::config::PlatformConfig;
use crate::error::{SwapError, SwapResult};
use crate::interop::{OutboundSwap, PendingSwap, SignedTransfer};
use crate::oracle::OracleCache;

use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// `transfer(address,uint256)`
const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Signs outbound settlements on an external platform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransferSigner: Send + Sync {
    async fn sign_transfer(&self, request: &OutboundSwap) -> SwapResult<SignedTransfer>;
}

/// Signs the native-chain settlement of a detected inbound swap
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NativeSigner: Send + Sync {
    async fn sign_settlement(&self, swap: &PendingSwap) -> SwapResult<SignedTransfer>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MempoolSubmitter: Send + Sync {
    async fn submit(&self, tx: &SignedTransfer) -> SwapResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SignerResponse {
    tx_id: String,
    /// Signed transaction, hex
    raw: String,
}

impl SignerResponse {
    fn into_signed(self) -> SwapResult<SignedTransfer> {
        let raw = hex::decode(self.raw.trim_start_matches("0x"))
            .map_err(|e| SwapError::Signer(format!("Signer returned invalid transaction hex: {}", e)))?;
        Ok(SignedTransfer { tx_id: self.tx_id, raw })
    }
}

/// Client of the external signing service
///
/// The source transaction hash is passed as the nonce of every request, so
/// the service derives the same transaction for the same swap.
pub struct RpcSigner {
    endpoints: RpcEndpoints,
}

impl RpcSigner {
    pub fn new(url: &str) -> SwapResult<Self> {
        Ok(Self {
            endpoints: RpcEndpoints::new("signer", &[url.to_string()])?,
        })
    }

    async fn sign(&self, method: &str, params: serde_json::Value) -> SwapResult<SignedTransfer> {
        let response: SignerResponse = self
            .endpoints
            .request(method, params)
            .await
            .map_err(|e| SwapError::Signer(e.to_string()))?;
        response.into_signed()
    }
}

#[async_trait]
impl TransferSigner for RpcSigner {
    async fn sign_transfer(&self, request: &OutboundSwap) -> SwapResult<SignedTransfer> {
        debug!("Requesting {} settlement signature for {:#x}", request.platform, request.source_hash);
        self.sign(
            "signtransfer",
            json!([
                request.platform,
                request.destination_address,
                request.symbol,
                request.amount.to_string(),
                format!("{:#x}", request.source_hash),
            ]),
        )
        .await
    }
}

#[async_trait]
impl NativeSigner for RpcSigner {
    async fn sign_settlement(&self, swap: &PendingSwap) -> SwapResult<SignedTransfer> {
        debug!("Requesting native settlement signature for {:#x}", swap.source_hash);
        self.sign(
            "signsettlement",
            json!([
                swap.platform,
                format!("{:#x}", swap.source_hash),
                swap.destination_address,
                swap.symbol,
                swap.value.to_string(),
            ]),
        )
        .await
    }
}

/// Submits signed native transactions to the native node's mempool
pub struct NodeMempool {
    endpoints: RpcEndpoints,
}

impl NodeMempool {
    pub fn new(urls: &[String]) -> SwapResult<Self> {
        Ok(Self {
            endpoints: RpcEndpoints::new("native", urls)?,
        })
    }
}

#[async_trait]
impl MempoolSubmitter for NodeMempool {
    async fn submit(&self, tx: &SignedTransfer) -> SwapResult<()> {
        let _: serde_json::Value = self
            .endpoints
            .request("sendRawTransaction", json!([hex::encode(&tx.raw)]))
            .await
            .map_err(|e| SwapError::Transaction(format!("Mempool rejected {}: {}", tx.tx_id, e)))?;
        info!("Submitted native transaction {}", tx.tx_id);
        Ok(())
    }
}

/// Load the settlement wallet from the environment variable named in the config
pub fn load_wallet(env_name: Option<&str>) -> SwapResult<LocalWallet> {
    let name = env_name.ok_or_else(|| SwapError::Config("No private key variable configured".to_string()))?;
    let key = std::env::var(name)
        .map_err(|_| SwapError::Signer(format!("No wallet configured. Set {}", name)))?;
    key.trim()
        .parse::<LocalWallet>()
        .map_err(|e| SwapError::Signer(format!("Invalid private key: {}", e)))
}

/// ERC20 `transfer(to, amount)` calldata
pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
    let mut data = ERC20_TRANSFER_SELECTOR.to_vec();
    data.extend(encode(&[Token::Address(to), Token::Uint(amount)]));
    Bytes::from(data)
}

async fn sign_typed(wallet: &LocalWallet, tx: &TypedTransaction) -> SwapResult<SignedTransfer> {
    let signature = wallet
        .sign_transaction(tx)
        .await
        .map_err(|e| SwapError::Signer(e.to_string()))?;
    let raw = tx.rlp_signed(&signature).to_vec();
    let tx_id = format!("{:#x}", H256::from(keccak256(&raw)));
    Ok(SignedTransfer { tx_id, raw })
}

/// Local signer for Ethereum settlements
pub struct EthereumWallet {
    platform: String,
    wallet: LocalWallet,
    api: Arc<dyn EthApi>,
    oracle: Arc<OracleCache>,
    config: PlatformConfig,
}

impl EthereumWallet {
    pub fn new(
        platform: &str,
        api: Arc<dyn EthApi>,
        oracle: Arc<OracleCache>,
        config: PlatformConfig,
    ) -> SwapResult<Self> {
        let wallet = load_wallet(config.private_key_env.as_deref())?.with_chain_id(api.chain_id());
        info!("{} settlement wallet: {:?}", platform, wallet.address());

        Ok(Self {
            platform: platform.to_string(),
            wallet,
            api,
            oracle,
            config,
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn token_contract(&self, symbol: &str) -> Option<Address> {
        self.config
            .assets
            .iter()
            .find(|(_, asset)| asset.symbol == symbol)
            .and_then(|(id, _)| format!("0x{}", id).parse().ok())
    }
}

#[async_trait]
impl TransferSigner for EthereumWallet {
    async fn sign_transfer(&self, request: &OutboundSwap) -> SwapResult<SignedTransfer> {
        let destination: Address = request
            .destination_address
            .parse()
            .map_err(|e| SwapError::Signer(format!("Invalid destination {}: {}", request.destination_address, e)))?;

        let is_native = self
            .config
            .native_asset
            .as_ref()
            .map(|asset| asset.symbol == request.symbol)
            .unwrap_or(false);

        let fee = self.oracle.pull_fee(Utc::now(), &self.platform).await?;
        let gas_price = fee / U256::from(self.config.gas_limit.max(1));
        let nonce = self.api.transaction_count(self.wallet.address()).await?;

        let base = TransactionRequest::new()
            .from(self.wallet.address())
            .nonce(nonce)
            .gas_price(gas_price)
            .chain_id(self.api.chain_id());

        let tx = if is_native {
            base.to(destination).value(request.amount).gas(self.config.gas_limit)
        } else {
            let token = self
                .token_contract(&request.symbol)
                .ok_or_else(|| SwapError::Signer(format!("No {} token for {}", self.platform, request.symbol)))?;
            base.to(token)
                .data(transfer_calldata(destination, request.amount))
                .gas(self.config.token_gas_limit)
        };

        let signed = sign_typed(&self.wallet, &TypedTransaction::Legacy(tx)).await?;
        debug!("Signed {} settlement {} with nonce {}", self.platform, signed.tx_id, nonce);
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_transfer_calldata_layout() {
        let to = Address::repeat_byte(0x42);
        let data = transfer_calldata(to, U256::from(1_000u64));

        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[..4], &ERC20_TRANSFER_SELECTOR);
        assert_eq!(&data[16..36], to.as_bytes());
        assert_eq!(U256::from_big_endian(&data[36..]), U256::from(1_000u64));
    }

    #[test]
    fn test_wallet_needs_environment() {
        assert!(matches!(load_wallet(None), Err(SwapError::Config(_))));
        assert!(matches!(
            load_wallet(Some("INTEROP_SWAPPER_TEST_UNSET_KEY")),
            Err(SwapError::Signer(_))
        ));

        std::env::set_var("INTEROP_SWAPPER_TEST_KEY", KEY);
        assert!(load_wallet(Some("INTEROP_SWAPPER_TEST_KEY")).is_ok());
    }

    #[tokio::test]
    async fn test_tx_id_is_hash_of_signed_bytes() {
        let wallet: LocalWallet = KEY.parse::<LocalWallet>().unwrap().with_chain_id(1u64);
        let tx = TransactionRequest::new()
            .to(Address::repeat_byte(0x42))
            .value(5u64)
            .nonce(0u64)
            .gas(21_000u64)
            .gas_price(1u64)
            .chain_id(1u64);

        let signed = sign_typed(&wallet, &TypedTransaction::Legacy(tx)).await.unwrap();

        assert!(!signed.raw.is_empty());
        assert_eq!(signed.tx_id, format!("{:#x}", H256::from(keccak256(&signed.raw))));
    }

    #[test]
    fn test_signer_response_decoding() {
        let response = SignerResponse {
            tx_id: "abc".to_string(),
            raw: "0x0a0b".to_string(),
        };
        assert_eq!(response.into_signed().unwrap().raw, vec![0x0a, 0x0b]);

        let broken = SignerResponse {
            tx_id: "abc".to_string(),
            raw: "zz".to_string(),
        };
        assert!(matches!(broken.into_signed(), Err(SwapError::Signer(_))));
    }
}
