//! Generic reducer-driven anchor-state for components.
//!
//! Every component's state is a pure function of the current chain tip:
//! on each `NewHead` the framework finds the common ancestor of the old and
//! new heads, seeds state there, and folds forward. Reorgs are therefore
//! handled for free — there is no "undo" path, state is simply recomputed.

use ethers::types::H256;

use crate::chain::{block_cache::BlockCache, block_processor::NewHead, types::Block};

/// A pure reducer over a single logical state `S`.
pub trait StateReducer<S>: Send + Sync {
    fn get_initial_state(&self, cache: &BlockCache, anchor: &Block) -> S;
    fn reduce(&self, cache: &BlockCache, prev: &S, block: &Block) -> S;
}

/// A pure reducer over a per-key state `S`, keyed by `K` (e.g. an
/// appointment id). Used by [`MappedStateReducer`].
pub trait KeyedReducer<K, S>: Send + Sync {
    fn get_initial_state(&self, key: &K, cache: &BlockCache, anchor: &Block) -> S;
    fn reduce(&self, key: &K, cache: &BlockCache, prev: &S, block: &Block) -> S;
}

/// Every block strictly between `anchor_hash` and `head_hash` (exclusive of
/// the anchor, inclusive of the head), oldest first.
pub fn chain_between<'a>(
    cache: &'a BlockCache,
    anchor_hash: H256,
    head_hash: H256,
) -> Vec<&'a Block> {
    let mut chain: Vec<&Block> =
        cache.ancestry(head_hash).take_while(|b| b.hash != anchor_hash).collect();
    chain.reverse();
    chain
}

/// Seeds at `anchor` and folds `reducer.reduce` across `chain` in order.
pub fn fold_from_anchor<S, R: StateReducer<S>>(
    reducer: &R,
    cache: &BlockCache,
    anchor: &Block,
    chain: &[&Block],
) -> S {
    let seed = reducer.get_initial_state(cache, anchor);
    chain.iter().fold(seed, |acc, block| reducer.reduce(cache, &acc, block))
}

/// Same as [`fold_from_anchor`] but for a [`KeyedReducer`].
pub fn fold_from_anchor_keyed<K, S, R: KeyedReducer<K, S>>(
    reducer: &R,
    key: &K,
    cache: &BlockCache,
    anchor: &Block,
    chain: &[&Block],
) -> S {
    let seed = reducer.get_initial_state(key, cache, anchor);
    chain.iter().fold(seed, |acc, block| reducer.reduce(key, cache, &acc, block))
}

/// Finds the ancestor shared by `prev_head` and `new_head`, panicking if the
/// cache doesn't contain it — the `BlockProcessor` contract guarantees it
/// always does at the time a `NewHead` event is emitted.
pub fn require_common_ancestor<'a>(
    cache: &'a BlockCache,
    event: NewHead,
) -> &'a Block {
    cache
        .common_ancestor(event.prev_head, event.new_head)
        .expect("BlockProcessor contract: common ancestor of prev/new head is always cached")
}

/// A single-state component: owns the reducer and the last-computed state,
/// and recomputes + diffs it on every new head.
pub struct Component<S, R> {
    reducer: R,
    state: Option<S>,
}

impl<S: Clone, R: StateReducer<S>> Component<S, R> {
    pub fn new(reducer: R) -> Self {
        Self { reducer, state: None }
    }

    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// Recomputes anchor state for `event`; returns `(prev_state, new_state)`.
    pub fn advance(&mut self, cache: &BlockCache, event: NewHead) -> (Option<S>, S) {
        let anchor = require_common_ancestor(cache, event);
        let chain = chain_between(cache, anchor.hash, event.new_head);
        let new_state = fold_from_anchor(&self.reducer, cache, anchor, &chain);
        let prev_state = self.state.replace(new_state.clone());
        (prev_state, new_state)
    }
}

/// Supplies the set of keys a [`MappedStateReducer`] should track, e.g.
/// `AppointmentStore::get_all_ids`.
pub trait KeySource<K>: Send + Sync {
    fn keys(&self) -> Vec<K>;
}

impl<K, F: Fn() -> Vec<K> + Send + Sync> KeySource<K> for F {
    fn keys(&self) -> Vec<K> {
        self()
    }
}

/// Lifts a per-key reducer over a collection of keys supplied by a
/// [`KeySource`]. New keys discovered after the anchor are re-seeded from
/// the anchor by replaying blocks from the anchor to the head, exactly like
/// every other key — there is no incremental/partial fold.
pub struct MappedStateReducer<K, S, R, KS> {
    reducer: R,
    key_source: KS,
    _marker: std::marker::PhantomData<(K, S)>,
}

impl<K, S, R, KS> MappedStateReducer<K, S, R, KS>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    S: Clone,
    R: KeyedReducer<K, S>,
    KS: KeySource<K>,
{
    pub fn new(reducer: R, key_source: KS) -> Self {
        Self { reducer, key_source, _marker: std::marker::PhantomData }
    }

    /// Returns, for every key currently known, `(key, prev_state, new_state)`.
    /// `prev_state` is `None` for keys discovered for the first time.
    pub fn advance(
        &self,
        cache: &BlockCache,
        event: NewHead,
        prev_states: &std::collections::HashMap<K, S>,
    ) -> Vec<(K, Option<S>, S)> {
        let anchor = require_common_ancestor(cache, event);
        let chain = chain_between(cache, anchor.hash, event.new_head);
        self.key_source
            .keys()
            .into_iter()
            .map(|key| {
                let new_state =
                    fold_from_anchor_keyed(&self.reducer, &key, cache, anchor, &chain);
                let prev_state = prev_states.get(&key).cloned();
                (key, prev_state, new_state)
            })
            .collect()
    }
}
