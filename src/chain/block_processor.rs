//! Subscribes to the chain head, linearises new heads, and emits
//! `NewHead(prevHead, newHead)` events after the cache has been populated
//! with their common ancestor chain.

use ethers::types::H256;
use tracing::{error, trace};

use super::{
    block_cache::{BlockCache, BlockCacheError},
    rpc::BlockSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHead {
    pub prev_head: H256,
    pub new_head: H256,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockProcessorError {
    #[error("fatal: exhausted cache depth walking back from {head:?} without reaching a known parent")]
    DepthExhausted { head: H256 },
    #[error(transparent)]
    Cache(#[from] BlockCacheError),
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

pub struct BlockProcessor {
    current_head: Option<H256>,
    /// Hard ceiling on how many blocks we'll walk back in one go, matching
    /// the cache's own depth budget: if the parent isn't found within this
    /// many fetches, the gap is bigger than anything the cache could anchor
    /// a reorg against, which `spec.md` §4.2 calls fatal.
    max_walk_back: u64,
}

impl BlockProcessor {
    pub fn new(max_walk_back: u64) -> Self {
        Self { current_head: None, max_walk_back }
    }

    /// Walks from `new_head_hash` backwards fetching blocks and inserting
    /// them into `cache` until the parent is already present or the depth
    /// budget is exhausted. Returns the `NewHead` event to emit, or `None`
    /// if `new_head_hash` is the same head we already processed.
    pub async fn process_head<S: BlockSource>(
        &mut self,
        source: &S,
        cache: &mut BlockCache,
        new_head_hash: H256,
    ) -> Result<Option<NewHead>, BlockProcessorError> {
        if self.current_head == Some(new_head_hash) {
            return Ok(None);
        }

        let mut to_insert = Vec::new();
        let mut cursor = new_head_hash;
        let mut steps = 0u64;

        loop {
            if cache.contains(cursor) {
                break;
            }
            if steps > self.max_walk_back {
                return Err(BlockProcessorError::DepthExhausted { head: new_head_hash });
            }
            let block = source.get_block(cursor).await?;
            let parent = block.parent_hash;
            to_insert.push(block);
            cursor = parent;
            steps += 1;
        }

        // Insert oldest-first so every `add_block` call sees its parent
        // already present (or within the accepted root range).
        for block in to_insert.into_iter().rev() {
            cache.add_block(block)?;
        }

        let prev_head = self.current_head.unwrap_or(new_head_hash);
        self.current_head = Some(new_head_hash);

        trace!(?prev_head, new_head = ?new_head_hash, "processed new head");

        Ok(Some(NewHead { prev_head, new_head: new_head_hash }))
    }

    /// Polls `source.head_hash()` on `poll_interval` and calls
    /// `process_head`, forwarding every `NewHead` it produces to `on_new_head`
    /// in strict order. Runs until `source.head_hash()`/`process_head`
    /// returns a fatal error.
    pub async fn run<S, F, Fut>(
        &mut self,
        source: &S,
        cache: &mut BlockCache,
        poll_interval: std::time::Duration,
        mut on_new_head: F,
    ) -> Result<(), BlockProcessorError>
    where
        S: BlockSource,
        F: FnMut(NewHead) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            match source.head_hash().await {
                Ok(head) => match self.process_head(source, cache, head).await? {
                    Some(event) => on_new_head(event).await,
                    None => {}
                },
                Err(e) => error!(error = %e, "failed to fetch chain head, retrying"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{block_cache::test_utils::block, rpc::MockBlockSource};

    fn h(n: u8) -> H256 {
        H256::from_low_u64_be(n as u64)
    }

    #[tokio::test]
    async fn first_head_has_prev_equal_to_new() {
        let mut source = MockBlockSource::new();
        source.expect_get_block().returning(|hash| {
            if hash == h(1) {
                Ok(block(1, 1, 0))
            } else {
                panic!("unexpected fetch for {hash:?}")
            }
        });

        let mut cache = BlockCache::new(10);
        let mut processor = BlockProcessor::new(10);

        let event = processor.process_head(&source, &mut cache, h(1)).await.unwrap().unwrap();
        assert_eq!(event.prev_head, h(1));
        assert_eq!(event.new_head, h(1));
        assert!(cache.contains(h(1)));
    }

    #[tokio::test]
    async fn walks_back_until_known_parent_then_emits_once() {
        let mut source = MockBlockSource::new();
        source.expect_get_block().returning(|hash| {
            if hash == h(3) {
                Ok(block(3, 3, 2))
            } else if hash == h(2) {
                Ok(block(2, 2, 1))
            } else {
                panic!("unexpected fetch for {hash:?}")
            }
        });

        let mut cache = BlockCache::new(10);
        cache.add_block(block(1, 1, 0)).unwrap();

        let mut processor = BlockProcessor::new(10);
        processor.process_head(&source, &mut cache, h(1)).await.unwrap();

        let event = processor.process_head(&source, &mut cache, h(3)).await.unwrap().unwrap();
        assert_eq!(event.prev_head, h(1));
        assert_eq!(event.new_head, h(3));
        assert!(cache.contains(h(2)));
        assert!(cache.contains(h(3)));
    }

    #[tokio::test]
    async fn same_head_twice_emits_nothing() {
        let mut source = MockBlockSource::new();
        source.expect_get_block().returning(|_| Ok(block(1, 1, 0)));

        let mut cache = BlockCache::new(10);
        let mut processor = BlockProcessor::new(10);
        processor.process_head(&source, &mut cache, h(1)).await.unwrap();
        let second = processor.process_head(&source, &mut cache, h(1)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn exhausting_walk_back_budget_is_fatal() {
        let mut source = MockBlockSource::new();
        source.expect_get_block().returning(|hash| {
            let n = hash.as_bytes()[31];
            Ok(block(n as u64, n, n.saturating_sub(1)))
        });

        let mut cache = BlockCache::new(10);
        let mut processor = BlockProcessor::new(2);

        let result = processor.process_head(&source, &mut cache, h(10)).await;
        assert!(matches!(result, Err(BlockProcessorError::DepthExhausted { .. })));
    }
}
