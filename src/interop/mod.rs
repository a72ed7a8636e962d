//! Canonical cross-chain data model
//!
//! Every platform interpreter turns its chain-native blocks and transactions
//! into these types; the oracle cache persists them and the scanners and the
//! orchestrator only ever reason about them.

pub mod address;

use crate::error::{SwapError, SwapResult};

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One external block, reduced to its swap-relevant transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteropBlock {
    pub platform: String,
    pub chain: String,
    /// `None` when the block was observed but carries nothing swap-relevant
    pub hash: Option<H256>,
    pub transactions: Vec<H256>,
}

impl InteropBlock {
    pub fn new(platform: &str, chain: &str, hash: H256, transactions: Vec<H256>) -> Self {
        let hash = if transactions.is_empty() { None } else { Some(hash) };
        Self {
            platform: platform.to_string(),
            chain: chain.to_string(),
            hash,
            transactions,
        }
    }
}

/// An external transaction interpreted into canonical transfers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteropTransaction {
    pub hash: Option<H256>,
    pub transfers: Vec<InteropTransfer>,
}

impl InteropTransaction {
    /// The cacheable "no swap found" result
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(hash: H256, transfers: Vec<InteropTransfer>) -> Self {
        if transfers.is_empty() {
            return Self::empty();
        }
        Self {
            hash: Some(hash),
            transfers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteropTransfer {
    pub source_chain: String,
    pub source_address: String,
    pub destination_chain: String,
    pub destination_address: String,
    /// Native address finally credited by the swap
    pub interop_address: String,
    pub symbol: String,
    pub value: U256,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl InteropTransfer {
    pub fn is_self_transfer(&self) -> bool {
        self.source_address == self.destination_address
    }
}

/// A detected inbound transfer awaiting settlement on the native chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSwap {
    pub platform: String,
    pub source_hash: H256,
    pub source_address: String,
    pub destination_address: String,
    pub symbol: String,
    pub value: U256,
}

impl PendingSwap {
    pub fn from_transfer(platform: &str, source_hash: H256, transfer: &InteropTransfer) -> Self {
        Self {
            platform: platform.to_string(),
            source_hash,
            source_address: transfer.source_address.clone(),
            destination_address: transfer.interop_address.clone(),
            symbol: transfer.symbol.clone(),
            value: transfer.value,
        }
    }
}

/// Block selector used by every fetch path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Hash(H256),
    Height(u64),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Hash(hash) => write!(f, "{:#x}", hash),
            BlockId::Height(height) => write!(f, "{}", height),
        }
    }
}

/// Outbound settlement request from the native chain to an external platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSwap {
    pub platform: String,
    pub source_hash: H256,
    pub destination_address: String,
    pub symbol: String,
    pub amount: U256,
}

/// A transaction signed for broadcast, together with its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub tx_id: String,
    pub raw: Vec<u8>,
}

/// Parse a 32-byte hash from hex, with or without the `0x` prefix
pub fn parse_hash(text: &str) -> SwapResult<H256> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits)
        .map_err(|e| SwapError::Oracle(format!("Invalid hash {}: {}", text, e)))?;
    if bytes.len() != 32 {
        return Err(SwapError::Oracle(format!(
            "Invalid hash {}: expected 32 bytes, got {}",
            text,
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(source: &str, destination: &str) -> InteropTransfer {
        InteropTransfer {
            source_chain: "main".to_string(),
            source_address: source.to_string(),
            destination_chain: "main".to_string(),
            destination_address: destination.to_string(),
            interop_address: "P2Kcredit".to_string(),
            symbol: "GAS".to_string(),
            value: U256::from(50u64),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_block_without_transactions_has_null_hash() {
        let block = InteropBlock::new("neo", "main", H256::repeat_byte(1), vec![]);
        assert!(block.hash.is_none());

        let block = InteropBlock::new("neo", "main", H256::repeat_byte(1), vec![H256::zero()]);
        assert_eq!(block.hash, Some(H256::repeat_byte(1)));
    }

    #[test]
    fn test_empty_transaction_is_canonical() {
        let tx = InteropTransaction::new(H256::repeat_byte(7), vec![]);
        assert_eq!(tx, InteropTransaction::empty());
        assert!(tx.hash.is_none());
    }

    #[test]
    fn test_pending_swap_credits_interop_address() {
        let swap = PendingSwap::from_transfer("neo", H256::repeat_byte(3), &transfer("A", "B"));
        assert_eq!(swap.destination_address, "P2Kcredit");
        assert_eq!(swap.value, U256::from(50u64));
        assert!(transfer("A", "A").is_self_transfer());
    }

    #[test]
    fn test_parse_hash() {
        let text = format!("{:#x}", H256::repeat_byte(0xab));
        assert_eq!(parse_hash(&text).unwrap(), H256::repeat_byte(0xab));
        assert_eq!(parse_hash(&text[2..]).unwrap(), H256::repeat_byte(0xab));
        assert!(parse_hash("0x1234").is_err());
    }
}
