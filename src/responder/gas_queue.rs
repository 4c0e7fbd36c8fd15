//! Ordered queue of pending response transactions for a single signer.
//!
//! All operations are functional: they consume `self` and return the new
//! queue (or an error), the same way the teacher's `GasQueue` Option/Result
//! chains in `retrier.rs` never mutate in place across an `await`. This
//! keeps every mutation auditable at a single call site in `MultiResponder`.

use ethers::types::{Bytes, H160, U256};

use crate::appointment::{ResponseData, TxId};
use crate::errors::PisaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQueueItemRequest {
    pub identifier: TxId,
    pub ideal_gas: U256,
    pub response_data: ResponseData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQueueItem {
    pub request: GasQueueItemRequest,
    pub nonce: u64,
    pub current_gas: U256,
}

/// What `Signer::send_transaction` actually needs; decoupled from
/// `GasQueueItem` so the queue stays free of chain-submission concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTransaction {
    pub to: H160,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub chain_id: u64,
}

impl GasQueueItem {
    pub fn to_transaction_request(&self) -> OutgoingTransaction {
        OutgoingTransaction {
            to: self.request.identifier.to,
            data: self.request.identifier.data.clone(),
            value: self.request.identifier.value,
            nonce: self.nonce,
            gas_price: self.current_gas,
            gas_limit: self.request.identifier.gas_limit,
            chain_id: self.request.identifier.chain_id,
        }
    }
}

pub(crate) fn ceil_bumped(base: U256, replacement_rate_pct: u32) -> U256 {
    let numerator = base * U256::from(100u32 + replacement_rate_pct);
    let denominator = U256::from(100u32);
    (numerator + denominator - U256::one()) / denominator
}

#[derive(Debug, Clone)]
pub struct GasQueue {
    initial_nonce: u64,
    replacement_rate_pct: u32,
    max_queue_depth: u32,
    items: Vec<GasQueueItem>,
}

impl GasQueue {
    pub fn new(initial_nonce: u64, replacement_rate_pct: u32, max_queue_depth: u32) -> Self {
        Self { initial_nonce, replacement_rate_pct, max_queue_depth, items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[GasQueueItem] {
        &self.items
    }

    pub fn depth_reached(&self) -> bool {
        self.items.len() as u32 >= self.max_queue_depth
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.items.iter().any(|item| &item.request.identifier == id)
    }

    pub fn front(&self) -> Option<&GasQueueItem> {
        self.items.first()
    }

    /// Re-stamps nonces to match each item's current position.
    fn renumber_nonces(&mut self) {
        for (i, item) in self.items.iter_mut().enumerate() {
            item.nonce = self.initial_nonce + i as u64;
        }
    }

    /// Inserts `req` at the position its `ideal_gas` dictates (descending
    /// gas order). Every item displaced to a later position is bumped by
    /// the replacement rate over its *own* prior gas — it's being
    /// re-submitted under a new nonce, and the node's minimum-bump rule
    /// applies to that re-submission regardless of what now precedes it.
    /// The newly-inserted item keeps its requested `ideal_gas` untouched.
    pub fn add(mut self, req: GasQueueItemRequest) -> Self {
        let idx = self.items.iter().take_while(|item| item.current_gas >= req.ideal_gas).count();
        for item in self.items.iter_mut().skip(idx) {
            item.current_gas = ceil_bumped(item.current_gas, self.replacement_rate_pct);
        }
        let ideal_gas = req.ideal_gas;
        self.items.insert(idx, GasQueueItem { request: req, nonce: 0, current_gas: ideal_gas });
        self.renumber_nonces();
        self
    }

    /// Removes the front (lowest-nonce) item. Nothing else moves gas-wise:
    /// every remaining item keeps its nonce slot, just shifted down by one.
    pub fn dequeue(mut self) -> Self {
        if !self.items.is_empty() {
            self.items.remove(0);
        }
        self.renumber_nonces();
        self
    }

    /// Removes the item identified by `id`. Only valid when `id` is the
    /// front item: removing anything else would require decreasing the
    /// nonce of every item ahead of it, which is impossible once the front
    /// item already sits at the queue's nonce floor.
    pub fn consume(mut self, id: &TxId) -> Result<Self, PisaError> {
        let position = self
            .items
            .iter()
            .position(|item| &item.request.identifier == id)
            .ok_or_else(|| PisaError::QueueConsistency(format!("{id:?} not present in queue")))?;
        if position != 0 {
            return Err(PisaError::QueueConsistency(format!(
                "cannot consume {id:?} at position {position}: not at the front of the queue"
            )));
        }
        self.items.remove(0);
        self.renumber_nonces();
        Ok(self)
    }

    /// Items in `self` whose `(nonce, currentGas)` differ from `prev` —
    /// i.e. those that must be (re-)broadcast.
    pub fn difference(&self, prev: &GasQueue) -> Vec<GasQueueItem> {
        self.items
            .iter()
            .filter(|item| {
                match prev.items.iter().find(|p| p.request.identifier == item.request.identifier) {
                    None => true,
                    Some(p) => p.nonce != item.nonce || p.current_gas != item.current_gas,
                }
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn abi() -> ethers::abi::Abi {
        ethers::abi::Abi::default()
    }

    fn response_data() -> ResponseData {
        ResponseData {
            contract_address: H160::repeat_byte(1),
            contract_abi: abi(),
            function_name: "respond".to_string(),
            function_args: vec![],
        }
    }

    fn request(tag: u8, ideal_gas: u64) -> GasQueueItemRequest {
        GasQueueItemRequest {
            identifier: TxId::new(1, Bytes::from(vec![tag]), H160::repeat_byte(tag), U256::from(21_000)),
            ideal_gas: U256::from(ideal_gas),
            response_data: response_data(),
        }
    }

    fn gases(queue: &GasQueue) -> Vec<(u64, u64)> {
        queue.items().iter().map(|i| (i.nonce, i.current_gas.as_u64())).collect()
    }

    #[test]
    fn queue_promotion_inserts_at_gas_rank_and_bumps_displaced_items() {
        let mut queue = GasQueue::new(0, 13, 10);
        queue = queue.add(request(1, 10));
        queue = queue.add(request(2, 5));
        assert_eq!(gases(&queue), vec![(0, 10), (1, 5)]);

        queue = queue.add(request(3, 8));
        // ceil(5 * 1.13) = 6
        assert_eq!(gases(&queue), vec![(0, 10), (1, 8), (2, 6)]);
    }

    #[test]
    fn invariants_hold_after_arbitrary_add_sequence() {
        let mut queue = GasQueue::new(100, 10, 20);
        for (tag, gas) in [(1, 50), (2, 80), (3, 20), (4, 65), (5, 10)] {
            queue = queue.add(request(tag, gas));
            let mut last_gas: Option<U256> = None;
            let mut last_nonce: Option<u64> = None;
            let mut ids = std::collections::HashSet::new();
            for item in queue.items() {
                if let Some(prev) = last_gas {
                    assert!(item.current_gas <= prev);
                }
                if let Some(prev_nonce) = last_nonce {
                    assert_eq!(item.nonce, prev_nonce + 1);
                }
                assert!(item.current_gas >= item.request.ideal_gas);
                assert!(ids.insert(item.request.identifier.clone()));
                last_gas = Some(item.current_gas);
                last_nonce = Some(item.nonce);
            }
        }
    }

    #[test]
    fn front_mine_dequeues_without_renumbering_gas() {
        let mut queue = GasQueue::new(0, 13, 10);
        queue = queue.add(request(1, 10));
        queue = queue.add(request(2, 5));
        let dequeued = queue.dequeue();
        assert_eq!(gases(&dequeued), vec![(0, 5)]);
    }

    #[test]
    fn out_of_order_mine_is_a_queue_consistency_error() {
        let mut queue = GasQueue::new(0, 13, 10);
        queue = queue.add(request(1, 10)); // nonce 0
        queue = queue.add(request(2, 5)); // nonce 1
        queue = queue.add(request(3, 1)); // nonce 2
        let b_id = request(2, 5).identifier;
        let result = queue.consume(&b_id);
        assert!(matches!(result, Err(PisaError::QueueConsistency(_))));
    }

    #[test]
    fn difference_reports_only_items_whose_nonce_or_gas_changed() {
        let mut before = GasQueue::new(0, 13, 10);
        before = before.add(request(1, 10));
        before = before.add(request(2, 5));

        let after = before.clone().add(request(3, 8));
        let changed = after.difference(&before);
        let changed_ids: std::collections::HashSet<_> =
            changed.iter().map(|i| i.request.identifier.clone()).collect();
        assert_eq!(changed_ids.len(), 2);
        assert!(changed_ids.contains(&request(2, 5).identifier));
        assert!(changed_ids.contains(&request(3, 8).identifier));
        assert!(!changed_ids.contains(&request(1, 10).identifier));
    }

    #[test]
    fn depth_reached_once_at_max() {
        let mut queue = GasQueue::new(0, 0, 2);
        assert!(!queue.depth_reached());
        queue = queue.add(request(1, 10));
        assert!(!queue.depth_reached());
        queue = queue.add(request(2, 5));
        assert!(queue.depth_reached());
    }
}
