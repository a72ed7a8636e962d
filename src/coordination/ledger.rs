//! Durable record of settlements, keyed by the hash of the source transaction

use crate::chain::Broadcast;
use crate::error::SwapResult;
use crate::interop::OutboundSwap;
use crate::state::{get_json, insert_json_if_absent, KeyValueStore};

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const IN_PROGRESS_TABLE: &str = "swaps.inprogress";
const USED_RPC_TABLE: &str = "swaps.usedrpc";
const SETTLED_TABLE: &str = "swaps.settled";
const SUSPECT_TABLE: &str = "swaps.possiblyfailed";
const OUTBOUND_TABLE: &str = "swaps.outbound";

/// Settlement broadcast that was neither mined nor pending when last checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PossibleFailure {
    pub source_hash: String,
    pub tx_id: String,
}

pub struct SwapLedger {
    store: Arc<dyn KeyValueStore>,
}

fn key(source_hash: &H256) -> String {
    format!("{:#x}", source_hash)
}

impl SwapLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Transaction id of the settlement already broadcast for `source_hash`
    pub async fn in_progress(&self, source_hash: &H256) -> SwapResult<Option<String>> {
        get_json(self.store.as_ref(), IN_PROGRESS_TABLE, &key(source_hash)).await
    }

    pub async fn broadcast_endpoint(&self, source_hash: &H256) -> SwapResult<Option<String>> {
        get_json(self.store.as_ref(), USED_RPC_TABLE, &key(source_hash)).await
    }

    /// Record an outbound broadcast and the endpoint that accepted it
    ///
    /// Returns `false` when a settlement was already recorded; the earlier
    /// record is kept.
    pub async fn record_in_progress(&self, source_hash: H256, broadcast: &Broadcast) -> SwapResult<bool> {
        let k = key(&source_hash);
        let recorded = insert_json_if_absent(self.store.as_ref(), IN_PROGRESS_TABLE, &k, &broadcast.tx_id).await?;
        if !recorded {
            warn!("Settlement for {} was already recorded, keeping the first one", k);
            return Ok(false);
        }
        insert_json_if_absent(self.store.as_ref(), USED_RPC_TABLE, &k, &broadcast.endpoint).await?;
        Ok(true)
    }

    /// Record an inbound settlement handed to the native mempool
    pub async fn record_submitted(&self, source_hash: H256, tx_id: &str) -> SwapResult<bool> {
        insert_json_if_absent(self.store.as_ref(), IN_PROGRESS_TABLE, &key(&source_hash), &tx_id).await
    }

    pub async fn is_settled(&self, source_hash: &H256) -> SwapResult<bool> {
        Ok(self.store.get(SETTLED_TABLE, &key(source_hash)).await?.is_some())
    }

    pub async fn mark_settled(&self, source_hash: H256, tx_id: &str) -> SwapResult<bool> {
        insert_json_if_absent(self.store.as_ref(), SETTLED_TABLE, &key(&source_hash), &tx_id).await
    }

    pub async fn record_possible_failure(&self, source_hash: H256, tx_id: &str) -> SwapResult<()> {
        insert_json_if_absent(self.store.as_ref(), SUSPECT_TABLE, &key(&source_hash), &tx_id).await?;
        Ok(())
    }

    pub async fn possible_failures(&self) -> SwapResult<Vec<PossibleFailure>> {
        let mut failures = Vec::new();
        for (source_hash, value) in self.store.scan(SUSPECT_TABLE).await? {
            failures.push(PossibleFailure {
                source_hash,
                tx_id: serde_json::from_slice(&value)?,
            });
        }
        failures.sort_by(|a, b| a.source_hash.cmp(&b.source_hash));
        Ok(failures)
    }

    /// Persist an accepted outbound request until it is settled or suspect
    pub async fn queue_outbound(&self, request: &OutboundSwap) -> SwapResult<bool> {
        insert_json_if_absent(self.store.as_ref(), OUTBOUND_TABLE, &key(&request.source_hash), request).await
    }

    pub async fn dequeue_outbound(&self, source_hash: &H256) -> SwapResult<bool> {
        self.store.remove(OUTBOUND_TABLE, &key(source_hash)).await
    }

    /// Outbound requests still waiting, oldest key first
    pub async fn queued_outbound(&self) -> SwapResult<Vec<OutboundSwap>> {
        let mut rows = self.store.scan(OUTBOUND_TABLE).await?;
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect()
    }

    /// Operator escape hatch: forget a recorded settlement so it can be retried
    pub async fn remove_in_progress(&self, source_hash: &H256) -> SwapResult<bool> {
        let k = key(source_hash);
        let removed = self.store.remove(IN_PROGRESS_TABLE, &k).await?;
        self.store.remove(USED_RPC_TABLE, &k).await?;
        self.store.remove(SUSPECT_TABLE, &k).await?;
        if removed {
            info!("Removed in-progress settlement record for {}", k);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;

    fn broadcast(tx_id: &str) -> Broadcast {
        Broadcast {
            tx_id: tx_id.to_string(),
            endpoint: "http://node-a.example".to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_progress_is_append_once() {
        let ledger = SwapLedger::new(Arc::new(MemoryStore::new()));
        let hash = H256::repeat_byte(1);

        assert!(ledger.record_in_progress(hash, &broadcast("0x01")).await.unwrap());
        assert!(!ledger.record_in_progress(hash, &broadcast("0x02")).await.unwrap());

        assert_eq!(ledger.in_progress(&hash).await.unwrap(), Some("0x01".to_string()));
        assert_eq!(
            ledger.broadcast_endpoint(&hash).await.unwrap(),
            Some("http://node-a.example".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_clears_every_record() {
        let ledger = SwapLedger::new(Arc::new(MemoryStore::new()));
        let hash = H256::repeat_byte(2);
        ledger.record_in_progress(hash, &broadcast("0x03")).await.unwrap();
        ledger.record_possible_failure(hash, "0x03").await.unwrap();
        assert_eq!(ledger.possible_failures().await.unwrap().len(), 1);

        assert!(ledger.remove_in_progress(&hash).await.unwrap());
        assert!(!ledger.remove_in_progress(&hash).await.unwrap());
        assert_eq!(ledger.in_progress(&hash).await.unwrap(), None);
        assert_eq!(ledger.broadcast_endpoint(&hash).await.unwrap(), None);
        assert!(ledger.possible_failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outbound_requests_are_kept_until_dequeued() {
        let ledger = SwapLedger::new(Arc::new(MemoryStore::new()));
        let request = OutboundSwap {
            platform: "neo".to_string(),
            source_hash: H256::repeat_byte(5),
            destination_address: "AUser".to_string(),
            symbol: "GAS".to_string(),
            amount: ethers::types::U256::from(9u64),
        };

        assert!(ledger.queue_outbound(&request).await.unwrap());
        assert!(!ledger.queue_outbound(&request).await.unwrap());
        assert_eq!(ledger.queued_outbound().await.unwrap(), vec![request.clone()]);

        assert!(ledger.dequeue_outbound(&request.source_hash).await.unwrap());
        assert!(ledger.queued_outbound().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settled_marker() {
        let ledger = SwapLedger::new(Arc::new(MemoryStore::new()));
        let hash = H256::repeat_byte(3);
        assert!(!ledger.is_settled(&hash).await.unwrap());
        assert!(ledger.mark_settled(hash, "0x04").await.unwrap());
        assert!(ledger.is_settled(&hash).await.unwrap());
    }
}
