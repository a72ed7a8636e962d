//! Neo interpreter: UTXO outputs and NEP5 invocations sent to swap addresses

use super::scanner::SwapBlockIndex;
use crate::chain::neo::{NeoApi, NeoTransaction, StackItem};
use crate::config::PlatformConfig;
use crate::coordination::AddressRegistry;
use crate::error::{SwapError, SwapResult};
use crate::interop::address::{
    is_valid_native, native_from_public_key, neo_address_from_public_key, neo_address_from_script_hash,
    neo_public_key_from_script,
};
use crate::interop::{parse_hash, BlockId, InteropBlock, InteropTransaction, InteropTransfer};
use crate::oracle::{FetchedBlock, PlatformReader};

use async_trait::async_trait;
use ethers::types::{H256, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transaction types that can carry a swap
const SWAP_TX_KINDS: [&str; 2] = ["InvocationTransaction", "ContractTransaction"];

const DESCRIPTION_USAGE: &str = "Description";

const PUSH0: u8 = 0x00;
const PUSHDATA1: u8 = 0x4c;
const PUSHDATA2: u8 = 0x4d;
const PUSHDATA4: u8 = 0x4e;
const PUSH1: u8 = 0x51;
const PUSH16: u8 = 0x60;
const JMP: u8 = 0x62;
const CALL: u8 = 0x65;
const APPCALL: u8 = 0x67;
const SYSCALL: u8 = 0x68;
const TAILCALL: u8 = 0x69;

/// Index of the APPCALL in a standard `transfer(from, to, amount)` invocation
const TRANSFER_CALL_LINE: usize = 6;
const TRANSFER_TO_LINE: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Instruction {
    opcode: u8,
    data: Vec<u8>,
}

/// Split an AVM script into instructions; `None` when it is truncated
fn disassemble(script: &[u8]) -> Option<Vec<Instruction>> {
    let mut lines = Vec::new();
    let mut i = 0;

    while i < script.len() {
        let opcode = script[i];
        i += 1;

        let len = match opcode {
            PUSH0 => 0,
            0x01..=0x4b => opcode as usize,
            PUSHDATA1 | SYSCALL => {
                let n = *script.get(i)? as usize;
                i += 1;
                n
            }
            PUSHDATA2 => {
                let b = script.get(i..i + 2)?;
                i += 2;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            PUSHDATA4 => {
                let b = script.get(i..i + 4)?;
                i += 4;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            PUSH1..=PUSH16 => {
                lines.push(Instruction {
                    opcode,
                    data: vec![opcode - PUSH1 + 1],
                });
                continue;
            }
            JMP..=CALL => 2,
            APPCALL | TAILCALL => 20,
            _ => 0,
        };

        let data = script.get(i..i + len)?.to_vec();
        i += len;
        lines.push(Instruction { opcode, data });
    }

    Some(lines)
}

fn script_hash(bytes: &[u8]) -> Option<[u8; 20]> {
    bytes.try_into().ok()
}

/// Display form of a contract script hash (byte-reversed hex)
fn contract_id(script_hash: &[u8]) -> String {
    let mut reversed = script_hash.to_vec();
    reversed.reverse();
    hex::encode(reversed)
}

/// Decimal amount text scaled to the asset's smallest unit
fn scale_units(text: &str, decimals: u8) -> Option<U256> {
    let amount = Decimal::from_str(text.trim()).ok()?;
    let factor = Decimal::from(10u64.checked_pow(u32::from(decimals))?);
    let scaled = amount.checked_mul(factor)?;
    if scaled.is_sign_negative() || !scaled.fract().is_zero() {
        return None;
    }
    U256::from_dec_str(&scaled.trunc().to_string()).ok()
}

fn stack_amount(item: &StackItem) -> Option<U256> {
    match item.kind.as_str() {
        "Integer" => match &item.value {
            serde_json::Value::String(text) => U256::from_dec_str(text).ok(),
            serde_json::Value::Number(n) => n.as_u64().map(U256::from),
            _ => None,
        },
        "ByteArray" => {
            let bytes = item.bytes()?;
            if bytes.len() > 32 {
                return None;
            }
            Some(U256::from_little_endian(&bytes))
        }
        _ => None,
    }
}

pub struct NeoReader {
    platform: String,
    api: Arc<dyn NeoApi>,
    registry: Arc<AddressRegistry>,
    config: PlatformConfig,
}

impl NeoReader {
    pub fn new(platform: &str, api: Arc<dyn NeoApi>, registry: Arc<AddressRegistry>, config: PlatformConfig) -> Self {
        Self {
            platform: platform.to_string(),
            api,
            registry,
            config,
        }
    }

    fn memo_address(tx: &NeoTransaction) -> Option<String> {
        tx.attributes
            .iter()
            .filter(|attr| attr.usage == DESCRIPTION_USAGE)
            .filter_map(|attr| hex::decode(&attr.data).ok())
            .filter_map(|bytes| String::from_utf8(bytes).ok())
            .map(|text| text.trim().to_string())
            .find(|text| is_valid_native(text))
    }

    fn transfer(&self, chain: &str, source: &str, destination: &str, interop: &str, symbol: &str, value: U256) -> InteropTransfer {
        InteropTransfer {
            source_chain: self.platform.clone(),
            source_address: source.to_string(),
            destination_chain: chain.to_string(),
            destination_address: destination.to_string(),
            interop_address: interop.to_string(),
            symbol: symbol.to_string(),
            value,
            data: Vec::new(),
        }
    }

    async fn interpret(&self, chain: &str, tx: &NeoTransaction) -> SwapResult<InteropTransaction> {
        let hash = parse_hash(&tx.txid)?;
        if !SWAP_TX_KINDS.contains(&tx.kind.as_str()) {
            return Ok(InteropTransaction::empty());
        }

        let witness = match tx.scripts.as_slice() {
            [only] => only,
            _ => return Ok(InteropTransaction::empty()),
        };
        let public_key = match hex::decode(&witness.verification)
            .ok()
            .and_then(|script| neo_public_key_from_script(&script))
        {
            Some(key) => key,
            None => return Ok(InteropTransaction::empty()),
        };

        let source = neo_address_from_public_key(&public_key);
        if self.registry.is_controlled(&self.platform, &source) {
            debug!("Ignoring {} tx {:#x} sent from a controlled address", self.platform, hash);
            return Ok(InteropTransaction::empty());
        }

        let interop = match Self::memo_address(tx) {
            Some(address) => address,
            None => native_from_public_key(&public_key)
                .ok_or_else(|| SwapError::Internal("Neo public key does not fit a native address".to_string()))?,
        };

        let mut transfers = Vec::new();
        for output in &tx.vout {
            if !self.registry.is_swap_address(&self.platform, &output.address) {
                continue;
            }
            let asset = match self.config.asset(&output.asset) {
                Some(asset) => asset,
                None => {
                    warn!("Ignoring output of unknown asset {} in {:#x}", output.asset, hash);
                    continue;
                }
            };
            match scale_units(&output.value, asset.decimals) {
                Some(value) => transfers.push(self.transfer(chain, &source, &output.address, &interop, &asset.symbol, value)),
                None => warn!("Ignoring output with invalid value {} in {:#x}", output.value, hash),
            }
        }

        if let Some(script) = tx.script.as_deref().filter(|s| !s.is_empty()) {
            transfers.extend(self.token_transfers(chain, hash, script, &source, &interop).await?);
        }

        if !transfers.is_empty() {
            info!("Found {} swaps in {} tx {:#x}", transfers.len(), self.platform, hash);
        }
        Ok(InteropTransaction::new(hash, transfers))
    }

    /// NEP5 `transfer` invocations to a swap address, as executed
    async fn token_transfers(
        &self,
        chain: &str,
        hash: H256,
        script: &str,
        source: &str,
        interop: &str,
    ) -> SwapResult<Vec<InteropTransfer>> {
        let lines = match hex::decode(script).ok().and_then(|bytes| disassemble(&bytes)) {
            Some(lines) if lines.len() > TRANSFER_CALL_LINE => lines,
            _ => return Ok(Vec::new()),
        };

        let call = &lines[TRANSFER_CALL_LINE];
        if call.opcode != APPCALL || self.config.asset(&contract_id(&call.data)).is_none() {
            return Ok(Vec::new());
        }

        let target = match script_hash(&lines[TRANSFER_TO_LINE].data) {
            Some(target) => neo_address_from_script_hash(&target),
            None => {
                debug!("Invalid transfer target in {:#x}, ignoring", hash);
                return Ok(Vec::new());
            }
        };
        if !self.registry.is_swap_address(&self.platform, &target) {
            return Ok(Vec::new());
        }

        // the script only shows intent; the application log shows what ran
        let log = match self.api.get_application_log(hash).await? {
            Some(log) => log,
            None => {
                warn!("Neo swap found but application log is not available for {:#x}", hash);
                return Ok(Vec::new());
            }
        };

        let mut transfers = Vec::new();
        for execution in log.executions.iter().filter(|e| e.halted()) {
            for notification in &execution.notifications {
                let asset = match self.config.asset(&notification.contract) {
                    Some(asset) => asset,
                    None => continue,
                };
                let items = match notification.state.items() {
                    Some(items) if items.len() >= 4 => items,
                    _ => continue,
                };
                if items[0].bytes().as_deref() != Some(b"transfer".as_slice()) {
                    continue;
                }
                let to = match items[2].bytes().as_deref().and_then(script_hash) {
                    Some(to) => neo_address_from_script_hash(&to),
                    None => continue,
                };
                if to != target {
                    continue;
                }
                if let Some(amount) = stack_amount(&items[3]) {
                    transfers.push(self.transfer(chain, source, &target, interop, &asset.symbol, amount));
                }
            }
        }
        Ok(transfers)
    }
}

#[async_trait]
impl PlatformReader for NeoReader {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_block(&self, chain: &str, id: BlockId) -> SwapResult<FetchedBlock> {
        let block = self
            .api
            .get_block(id)
            .await?
            .ok_or_else(|| SwapError::BlockNotFound {
                platform: self.platform.clone(),
                block: id.to_string(),
            })?;
        let hash = parse_hash(&block.hash)?;

        let mut transactions = Vec::new();
        for tx in &block.transactions {
            let interop = self.interpret(chain, tx).await?;
            if let Some(tx_hash) = interop.hash {
                transactions.push((tx_hash, interop));
            }
        }
        let relevant = transactions.iter().map(|(tx_hash, _)| *tx_hash).collect();

        Ok(FetchedBlock {
            hash,
            height: block.index,
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
}

/// Quick sync source: the node's per-address index of swap blocks
pub struct NeoSwapIndex {
    api: Arc<dyn NeoApi>,
    contract: String,
    platform: String,
    registry: Arc<AddressRegistry>,
}

impl NeoSwapIndex {
    pub fn new(platform: &str, api: Arc<dyn NeoApi>, contract: &str, registry: Arc<AddressRegistry>) -> Self {
        Self {
            api,
            contract: contract.to_string(),
            platform: platform.to_string(),
            registry,
        }
    }
}

#[async_trait]
impl SwapBlockIndex for NeoSwapIndex {
    async fn swap_block_ids(&self, height: u64) -> SwapResult<Vec<u64>> {
        let mut ids = Vec::new();
        for address in self.registry.externals(&self.platform) {
            ids.extend(self.api.get_swap_blocks(&self.contract, &address, height).await?);
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}
