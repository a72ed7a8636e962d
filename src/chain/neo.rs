//! Neo JSON-RPC client

use super::{normalize_tx_id, Broadcast, ChainClient, RpcEndpoints};
use crate::error::{SwapError, SwapResult};
use crate::interop::{BlockId, SignedTransfer};

use async_trait::async_trait;
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoBlock {
    pub hash: String,
    pub index: u64,
    #[serde(rename = "tx", default)]
    pub transactions: Vec<NeoTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoTransaction {
    pub txid: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<NeoAttribute>,
    #[serde(default)]
    pub vout: Vec<NeoOutput>,
    #[serde(default)]
    pub scripts: Vec<NeoWitness>,
    /// Invocation script, hex
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoAttribute {
    pub usage: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoOutput {
    pub n: u32,
    pub asset: String,
    pub value: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoWitness {
    pub invocation: String,
    pub verification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationLog {
    pub txid: String,
    #[serde(default)]
    pub executions: Vec<Execution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub trigger: String,
    #[serde(default)]
    pub contract: String,
    pub vmstate: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl Execution {
    pub fn halted(&self) -> bool {
        self.vmstate.contains("HALT") && !self.vmstate.contains("FAULT")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub contract: String,
    pub state: StackItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

impl StackItem {
    pub fn items(&self) -> Option<Vec<StackItem>> {
        serde_json::from_value(self.value.clone()).ok()
    }

    /// Raw bytes of a ByteArray item
    pub fn bytes(&self) -> Option<Vec<u8>> {
        hex::decode(self.value.as_str()?).ok()
    }
}

/// Chain-native view of Neo used by the interpreter and quick sync
#[async_trait]
pub trait NeoApi: ChainClient {
    async fn get_block(&self, id: BlockId) -> SwapResult<Option<NeoBlock>>;

    async fn get_transaction(&self, hash: H256) -> SwapResult<Option<NeoTransaction>>;

    async fn get_application_log(&self, hash: H256) -> SwapResult<Option<ApplicationLog>>;

    /// Ids of blocks at or above `height` that the node's swap index
    /// recorded for `address`, ascending
    async fn get_swap_blocks(&self, contract: &str, address: &str, height: u64) -> SwapResult<Vec<u64>>;
}

/// Neo client over a set of JSON-RPC endpoints
pub struct NeoClient {
    endpoints: RpcEndpoints,
}

impl NeoClient {
    pub fn new(platform: &str, urls: &[String]) -> SwapResult<Self> {
        Ok(Self {
            endpoints: RpcEndpoints::new(platform, urls)?,
        })
    }

    /// Neo reports lookups of unknown items as RPC errors
    fn absent<T>(result: SwapResult<T>) -> SwapResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SwapError::ChainConnection { message, .. }) if message.contains("Unknown") => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn json_to_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[async_trait]
impl ChainClient for NeoClient {
    fn platform(&self) -> &str {
        self.endpoints.platform()
    }

    async fn get_height(&self) -> SwapResult<u64> {
        self.endpoints.request("getblockcount", json!([])).await
    }

    async fn is_included(&self, tx_id: &str) -> SwapResult<bool> {
        let height: Option<u64> = Self::absent(
            self.endpoints
                .request("gettransactionheight", [tx_id.to_string()])
                .await,
        )?;
        Ok(height.map(|h| h > 0).unwrap_or(false))
    }

    async fn is_in_mempool(&self, endpoint: &str, tx_id: &str) -> SwapResult<bool> {
        let pool: Vec<String> = self.endpoints.request_at(endpoint, "getrawmempool", json!([])).await?;
        let wanted = normalize_tx_id(tx_id);
        Ok(pool.iter().any(|candidate| normalize_tx_id(candidate) == wanted))
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> SwapResult<Broadcast> {
        let (accepted, endpoint): (bool, String) = self
            .endpoints
            .request_with_endpoint("sendrawtransaction", [hex::encode(&tx.raw)])
            .await?;
        if !accepted {
            return Err(SwapError::Transaction(format!(
                "{} rejected transaction {}",
                endpoint, tx.tx_id
            )));
        }
        debug!("Broadcast {} via {}", tx.tx_id, endpoint);
        Ok(Broadcast {
            tx_id: tx.tx_id.clone(),
            endpoint,
        })
    }
}

#[async_trait]
impl NeoApi for NeoClient {
    async fn get_block(&self, id: BlockId) -> SwapResult<Option<NeoBlock>> {
        let params = match id {
            BlockId::Hash(hash) => json!([format!("{:#x}", hash), 1]),
            BlockId::Height(height) => json!([height, 1]),
        };
        Self::absent(self.endpoints.request("getblock", params).await)
    }

    async fn get_transaction(&self, hash: H256) -> SwapResult<Option<NeoTransaction>> {
        Self::absent(
            self.endpoints
                .request("getrawtransaction", json!([format!("{:#x}", hash), 1]))
                .await,
        )
    }

    async fn get_application_log(&self, hash: H256) -> SwapResult<Option<ApplicationLog>> {
        Self::absent(
            self.endpoints
                .request("getapplicationlog", [format!("{:#x}", hash)])
                .await,
        )
    }

    async fn get_swap_blocks(&self, contract: &str, address: &str, height: u64) -> SwapResult<Vec<u64>> {
        let index: HashMap<String, Value> = self
            .endpoints
            .request("getswapblocks", json!([contract, address, height.to_string()]))
            .await?;
        let mut ids: Vec<u64> = index.values().filter_map(json_to_u64).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}
