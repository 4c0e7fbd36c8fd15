//! Bounded-depth, fork-aware store of recent blocks.
//!
//! Every appointment's anchor state is computed against this cache's view of
//! ancestry, so it has to tolerate concurrently-inserted forks rather than
//! assuming a single chain.

use std::collections::HashMap;

use ethers::types::H256;

use super::types::Block;

#[derive(Debug, thiserror::Error)]
pub enum BlockCacheError {
    #[error("block {0:?} cannot be added: parent not present and not within root range")]
    CannotAdd(H256),
}

pub struct BlockCache {
    max_depth: u64,
    blocks: HashMap<H256, Block>,
    initial_height: Option<u64>,
}

impl BlockCache {
    pub fn new(max_depth: u64) -> Self {
        Self { max_depth, blocks: HashMap::new(), initial_height: None }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Max `number` among contained blocks; supports multiple fork tips.
    pub fn max_height(&self) -> Option<u64> {
        self.blocks.values().map(|b| b.number).max()
    }

    /// `min(initialHeight, maxHeight - maxDepth)`.
    pub fn min_height(&self) -> Option<u64> {
        match (self.initial_height, self.max_height()) {
            (Some(initial), Some(max)) => {
                Some(initial.min(max.saturating_sub(self.max_depth)))
            }
            (Some(initial), None) => Some(initial),
            (None, _) => None,
        }
    }

    /// True iff (a) the cache is empty, or (b) `b.number <= minHeight`, or
    /// (c) `b.parentHash` is already present.
    pub fn can_add_block(&self, block: &Block) -> bool {
        if self.is_empty() {
            return true;
        }
        if let Some(min_height) = self.min_height() {
            if block.number <= min_height {
                return true;
            }
        }
        self.blocks.contains_key(&block.parent_hash)
    }

    pub fn add_block(&mut self, block: Block) -> Result<(), BlockCacheError> {
        if !self.can_add_block(&block) {
            return Err(BlockCacheError::CannotAdd(block.hash));
        }
        if self.initial_height.is_none() {
            self.initial_height = Some(block.number);
        }
        self.blocks.insert(block.hash, block);
        self.evict();
        Ok(())
    }

    fn evict(&mut self) {
        if let Some(max_height) = self.max_height() {
            let floor = max_height.saturating_sub(self.max_depth);
            self.blocks.retain(|_, b| b.number >= floor);
        }
    }

    pub fn get_block_stub(&self, hash: H256) -> Option<&Block> {
        self.blocks.get(&hash)
    }

    pub fn contains(&self, hash: H256) -> bool {
        self.blocks.contains_key(&hash)
    }

    /// Iterator from `hash` toward older blocks along `parentHash`. Stops
    /// when a parent is not present in the cache.
    pub fn ancestry(&self, hash: H256) -> Ancestry<'_> {
        Ancestry { cache: self, next: Some(hash) }
    }

    pub fn find_ancestor<P>(&self, hash: H256, mut pred: P) -> Option<&Block>
    where
        P: FnMut(&Block) -> bool,
    {
        self.ancestry(hash).find(|b| pred(b))
    }

    /// Common ancestor of two hashes: walk both ancestries and find the
    /// first hash shared by both, preferring the one closest to both tips.
    pub fn common_ancestor(&self, a: H256, b: H256) -> Option<&Block> {
        let a_chain: Vec<H256> = self.ancestry(a).map(|blk| blk.hash).collect();
        let b_ancestors: std::collections::HashSet<H256> =
            self.ancestry(b).map(|blk| blk.hash).collect();
        a_chain.into_iter().find(|h| b_ancestors.contains(h)).and_then(|h| self.blocks.get(&h))
    }

    /// Number of blocks from `headHash` (inclusive) back along ancestry that
    /// contain `txHash`; 0 if unseen.
    pub fn get_confirmations(&self, head_hash: H256, tx_hash: H256) -> u64 {
        self.ancestry(head_hash)
            .enumerate()
            .find(|(_, block)| block.contains_tx_hash(tx_hash))
            .map(|(i, _)| i as u64 + 1)
            .unwrap_or(0)
    }
}

pub struct Ancestry<'a> {
    cache: &'a BlockCache,
    next: Option<H256>,
}

impl<'a> Iterator for Ancestry<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        let block = self.cache.blocks.get(&hash)?;
        self.next = Some(block.parent_hash);
        Some(block)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils {
    use super::*;
    use crate::chain::types::Tx;

    pub fn block(number: u64, hash: u8, parent: u8) -> Block {
        Block {
            number,
            hash: H256::from_low_u64_be(hash as u64),
            parent_hash: H256::from_low_u64_be(parent as u64),
            transactions: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn block_with_tx(number: u64, hash: u8, parent: u8, tx: Tx) -> Block {
        let mut b = block(number, hash, parent);
        b.transactions.push(tx);
        b
    }
}
