//! Scans newly-seen blocks for our own transactions and fires mined
//! callbacks with the observed nonce, in block-number order.
//!
//! Holds only an id -> closure map rather than a back-reference into
//! `MultiResponder`, inverting what would otherwise be a cyclic dependency
//! between the two components.

use std::collections::HashMap;
use std::sync::Mutex;

use ethers::types::H256;
use futures::future::BoxFuture;

use crate::appointment::TxId;
use crate::chain::block_cache::BlockCache;
use crate::chain::types::Block;

pub type MinedCallback = Box<dyn FnOnce(u64) -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub struct TransactionTracker {
    last_block_number: Mutex<Option<u64>>,
    callbacks: Mutex<HashMap<TxId, MinedCallback>>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, id: TxId, callback: MinedCallback) {
        self.callbacks.lock().unwrap().insert(id, callback);
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Walks blocks in ancestry from `new_head` back to (and including) the
    /// first block after the last-processed block number, oldest first, and
    /// fires any matching registered callback.
    pub async fn on_new_head(&self, cache: &BlockCache, new_head: H256) {
        let head_number = match cache.get_block_stub(new_head) {
            Some(b) => b.number,
            None => return,
        };

        let from = {
            let mut last = self.last_block_number.lock().unwrap();
            let from = last.map(|n| n + 1).unwrap_or(head_number);
            *last = Some(head_number);
            from
        };

        let mut blocks: Vec<&Block> =
            cache.ancestry(new_head).take_while(|b| b.number >= from).collect();
        blocks.reverse();

        for block in blocks {
            for tx in &block.transactions {
                let Some(to) = tx.to else { continue };
                let id = TxId::new(tx.chain_id, tx.data.clone(), to, tx.gas_limit);
                let callback = self.callbacks.lock().unwrap().remove(&id);
                if let Some(callback) = callback {
                    callback(tx.nonce).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::block_cache::test_utils::block_with_tx;
    use crate::chain::types::Tx;
    use ethers::types::{Bytes, H160};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn h(n: u8) -> H256 {
        H256::from_low_u64_be(n as u64)
    }

    fn tx(nonce: u64, data: Vec<u8>, to: H160) -> Tx {
        Tx {
            hash: H256::random(),
            to: Some(to),
            from: H160::repeat_byte(9),
            data: Bytes::from(data),
            value: Default::default(),
            gas_limit: ethers::types::U256::from(21_000),
            nonce,
            chain_id: 1,
        }
    }

    fn callback(observed: Arc<AsyncMutex<Vec<u64>>>) -> MinedCallback {
        Box::new(move |nonce| {
            Box::pin(async move {
                observed.lock().await.push(nonce);
            })
        })
    }

    #[tokio::test]
    async fn fires_callback_exactly_once_when_tx_appears() {
        let tracker = TransactionTracker::new();
        let observed = Arc::new(AsyncMutex::new(Vec::new()));
        let to = H160::repeat_byte(5);
        let id = TxId::new(1, Bytes::from(vec![1, 2]), to, ethers::types::U256::from(21_000));
        tracker.add_tx(id, callback(observed.clone()));

        let mut cache = BlockCache::new(10);
        cache.add_block(block_with_tx(1, 1, 0, tx(7, vec![1, 2], to))).unwrap();
        tracker.on_new_head(&cache, h(1)).await;

        assert_eq!(*observed.lock().await, vec![7]);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn delivers_in_increasing_block_number_order() {
        let tracker = TransactionTracker::new();
        let observed = Arc::new(AsyncMutex::new(Vec::new()));
        let to = H160::repeat_byte(5);
        let id_a = TxId::new(1, Bytes::from(vec![1]), to, ethers::types::U256::from(21_000));
        let id_b = TxId::new(1, Bytes::from(vec![2]), to, ethers::types::U256::from(21_000));
        tracker.add_tx(id_b.clone(), callback(observed.clone()));
        tracker.add_tx(id_a.clone(), callback(observed.clone()));

        let mut cache = BlockCache::new(10);
        cache.add_block(block_with_tx(1, 1, 0, tx(10, vec![1], to))).unwrap();
        cache.add_block(block_with_tx(2, 2, 1, tx(11, vec![2], to))).unwrap();
        tracker.on_new_head(&cache, h(2)).await;

        assert_eq!(*observed.lock().await, vec![10, 11]);
    }

    #[tokio::test]
    async fn unregistered_transactions_are_ignored() {
        let tracker = TransactionTracker::new();
        let mut cache = BlockCache::new(10);
        cache.add_block(block_with_tx(1, 1, 0, tx(1, vec![9, 9], H160::repeat_byte(1)))).unwrap();
        tracker.on_new_head(&cache, h(1)).await; // must not panic
    }
}
