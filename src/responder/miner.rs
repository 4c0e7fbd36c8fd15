//! `EthereumTransactionMiner`: a single-shot "submit one transaction and
//! watch it land" helper, for callers that don't need `MultiResponder`'s
//! shared nonce queue.
//!
//! Grounded on the teacher's `RetrierClient` timeout-and-retry shape
//! (`retrier.rs`) and `EthBroadcaster::send`'s gas-bump-and-resend loop
//! (`broadcaster.rs`), collapsed into a single polling loop since this
//! component owns no shared state and can poll the chain directly rather
//! than reacting to a `BlockProcessor`-driven event.

use ethers::types::H256;
use tracing::warn;

use crate::chain::rpc::BlockSource;
use crate::clock::Clock;
use crate::constants::BLOCK_POLL_INTERVAL;
use crate::errors::PisaError;
use crate::responder::gas_queue::{ceil_bumped, OutgoingTransaction};
use crate::responder::signer::Signer;

pub struct EthereumTransactionMiner<C, S> {
    clock: C,
    signer: S,
    new_block_timeout: std::time::Duration,
    wait_blocks_before_retrying: u32,
    max_attempts: u32,
    replacement_rate_pct: u32,
}

impl<C: Clock, S: Signer> EthereumTransactionMiner<C, S> {
    pub fn new(
        clock: C,
        signer: S,
        new_block_timeout: std::time::Duration,
        wait_blocks_before_retrying: u32,
        max_attempts: u32,
        replacement_rate_pct: u32,
    ) -> Self {
        Self { clock, signer, new_block_timeout, wait_blocks_before_retrying, max_attempts, replacement_rate_pct }
    }

    pub async fn mine<B: BlockSource>(
        &self,
        mut request: OutgoingTransaction,
        source: &B,
    ) -> Result<H256, PisaError> {
        for attempt in 1..=self.max_attempts {
            let tx_hash = match self.signer.send_transaction(request.clone()).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(attempt, error = %e, "broadcast failed, bumping gas and retrying");
                    request.gas_price = ceil_bumped(request.gas_price, self.replacement_rate_pct);
                    continue;
                }
            };

            match self.wait_for_inclusion(tx_hash, &request, source).await {
                Ok(()) => return Ok(tx_hash),
                Err(e) => {
                    warn!(attempt, error = %e, "response transaction did not land in time, bumping gas and retrying");
                    request.gas_price = ceil_bumped(request.gas_price, self.replacement_rate_pct);
                }
            }
        }
        Err(PisaError::Application(format!("gave up after {} attempts", self.max_attempts)))
    }

    async fn wait_for_inclusion<B: BlockSource>(
        &self,
        tx_hash: H256,
        request: &OutgoingTransaction,
        source: &B,
    ) -> Result<(), PisaError> {
        let mut seen_head =
            source.head_hash().await.map_err(|e| PisaError::Application(e.to_string()))?;
        let mut blocks_without_inclusion = 0u32;
        let poll_budget =
            (self.new_block_timeout.as_millis() / BLOCK_POLL_INTERVAL.as_millis().max(1)).max(1) as u32;

        for _ in 0..poll_budget {
            self.clock.sleep(BLOCK_POLL_INTERVAL).await;
            let head = match source.head_hash().await {
                Ok(h) => h,
                Err(_) => continue,
            };
            if head == seen_head {
                continue;
            }
            seen_head = head;

            let block = source.get_block(head).await.map_err(|e| PisaError::Application(e.to_string()))?;
            if block.transactions.iter().any(|tx| tx.hash == tx_hash && tx.to == Some(request.to)) {
                return Ok(());
            }

            blocks_without_inclusion += 1;
            if blocks_without_inclusion >= self.wait_blocks_before_retrying {
                return Err(PisaError::BlockThresholdReached);
            }
        }
        Err(PisaError::NoNewBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::rpc::MockBlockSource;
    use crate::chain::types::{Block, Tx};
    use crate::clock::MockClock;
    use crate::responder::signer::MockSigner;
    use ethers::types::{Bytes, H160, U256};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn request() -> OutgoingTransaction {
        OutgoingTransaction {
            to: H160::repeat_byte(1),
            data: Bytes::from(vec![1, 2, 3]),
            value: U256::zero(),
            nonce: 0,
            gas_price: U256::from(10),
            gas_limit: U256::from(100_000),
            chain_id: 1,
        }
    }

    fn idle_clock() -> MockClock {
        let mut clock = MockClock::new();
        clock.expect_sleep().returning(|_| ());
        clock
    }

    #[tokio::test]
    async fn mines_when_tx_appears_in_the_next_block() {
        let tx_hash = H256::repeat_byte(9);
        let mut signer = MockSigner::new();
        signer.expect_send_transaction().returning(move |_| Ok(tx_hash));

        let mut source = MockBlockSource::new();
        let call_count = Arc::new(AtomicU64::new(0));
        let count_for_closure = call_count.clone();
        source.expect_head_hash().returning(move || {
            let n = count_for_closure.fetch_add(1, Ordering::SeqCst);
            let hash = if n == 0 { H256::from_low_u64_be(1) } else { H256::from_low_u64_be(2) };
            Ok(hash)
        });
        source.expect_get_block().returning(move |hash| {
            let tx = Tx {
                hash: tx_hash,
                to: Some(H160::repeat_byte(1)),
                from: H160::repeat_byte(2),
                data: Bytes::from(vec![1, 2, 3]),
                value: U256::zero(),
                gas_limit: U256::from(100_000),
                nonce: 0,
                chain_id: 1,
            };
            Ok(Block { number: 2, hash, parent_hash: H256::from_low_u64_be(1), transactions: vec![tx], logs: vec![] })
        });

        let miner = EthereumTransactionMiner::new(
            idle_clock(),
            signer,
            std::time::Duration::from_secs(120),
            20,
            5,
            13,
        );
        let result = miner.mine(request(), &source).await.unwrap();
        assert_eq!(result, tx_hash);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_when_never_included() {
        let mut signer = MockSigner::new();
        signer.expect_send_transaction().returning(|_| Ok(H256::repeat_byte(1)));

        let mut source = MockBlockSource::new();
        let call_count = Arc::new(AtomicU64::new(0));
        let count_for_closure = call_count.clone();
        source.expect_head_hash().returning(move || {
            let n = count_for_closure.fetch_add(1, Ordering::SeqCst);
            Ok(H256::from_low_u64_be(n))
        });
        source.expect_get_block().returning(|hash| {
            Ok(Block { number: 1, hash, parent_hash: H256::zero(), transactions: vec![], logs: vec![] })
        });

        let miner = EthereumTransactionMiner::new(idle_clock(), signer, std::time::Duration::from_secs(40), 1, 2, 13);
        let result = miner.mine(request(), &source).await;
        assert!(matches!(result, Err(PisaError::Application(_))));
    }
}
