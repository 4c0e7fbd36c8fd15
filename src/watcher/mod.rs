//! Per-appointment reducer: `WATCHING` -> `OBSERVED`, triggering a response
//! and, later, eviction at configured confirmation depths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::appointment::{Appointment, AppointmentStore};
use crate::chain::block_cache::BlockCache;
use crate::chain::block_processor::NewHead;
use crate::chain::types::Block;
use crate::component::{KeyedReducer, MappedStateReducer};
use crate::errors::{PisaError, PisaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherAppointmentState {
    Watching,
    Observed { block_observed: u64 },
}

impl WatcherAppointmentState {
    fn confirmations_at(&self, head_number: u64) -> u64 {
        match self {
            WatcherAppointmentState::Watching => 0,
            WatcherAppointmentState::Observed { block_observed } => {
                head_number.saturating_sub(*block_observed) + 1
            }
        }
    }
}

/// The pure per-appointment reducer. Looks the appointment up in the store
/// by id on every call — appointment data itself never changes once stored,
/// so this is safe to call repeatedly during a fold.
struct WatcherReducer {
    store: Arc<AppointmentStore>,
}

impl KeyedReducer<String, WatcherAppointmentState> for WatcherReducer {
    fn get_initial_state(
        &self,
        key: &String,
        cache: &BlockCache,
        anchor: &Block,
    ) -> WatcherAppointmentState {
        let Some(appointment) = self.store.get_by_id(key) else {
            return WatcherAppointmentState::Watching;
        };
        match cache.find_ancestor(anchor.hash, |b| {
            b.logs.iter().any(|log| appointment.event_filter.matches(log))
        }) {
            Some(ancestor) => WatcherAppointmentState::Observed { block_observed: ancestor.number },
            None => WatcherAppointmentState::Watching,
        }
    }

    fn reduce(
        &self,
        key: &String,
        _cache: &BlockCache,
        prev: &WatcherAppointmentState,
        block: &Block,
    ) -> WatcherAppointmentState {
        if let WatcherAppointmentState::Observed { .. } = prev {
            return *prev; // once OBSERVED, identity
        }
        let Some(appointment) = self.store.get_by_id(key) else {
            return *prev;
        };
        if block.logs.iter().any(|log| appointment.event_filter.matches(log)) {
            WatcherAppointmentState::Observed { block_observed: block.number }
        } else {
            WatcherAppointmentState::Watching
        }
    }
}

/// Dispatches a response for an observed-and-confirmed appointment.
/// Implemented by `MultiResponder`; kept as a trait so `Watcher` doesn't
/// need to know about the gas queue.
#[async_trait::async_trait]
pub trait ResponseDispatcher: Send + Sync {
    async fn respond(&self, appointment: &Appointment) -> anyhow::Result<()>;
}

pub struct Watcher<D> {
    store: Arc<AppointmentStore>,
    responder: D,
    confirmations_before_response: u32,
    confirmations_before_removal: u32,
    states: Mutex<HashMap<String, WatcherAppointmentState>>,
}

impl<D: ResponseDispatcher> Watcher<D> {
    pub fn new(
        store: Arc<AppointmentStore>,
        responder: D,
        confirmations_before_response: u32,
        confirmations_before_removal: u32,
    ) -> PisaResult<Self> {
        if confirmations_before_response > confirmations_before_removal {
            return Err(PisaError::Argument(
                "confirmationsBeforeResponse must be <= confirmationsBeforeRemoval".into(),
            ));
        }
        Ok(Self {
            store,
            responder,
            confirmations_before_response,
            confirmations_before_removal,
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Recomputes every tracked appointment's state for `event` and fires
    /// Respond/Evict edge actions. Exceptions from `respond` are logged,
    /// never propagated: one misbehaving appointment must not stall the
    /// block-event loop.
    pub async fn on_new_head(&self, cache: &BlockCache, event: NewHead) {
        let head_number = match cache.get_block_stub(event.new_head) {
            Some(b) => b.number,
            None => return, // contract violated; BlockProcessor guarantees this is always present
        };
        let prev_head_number = cache.get_block_stub(event.prev_head).map(|b| b.number);

        let reducer = WatcherReducer { store: self.store.clone() };
        let key_store = self.store.clone();
        let mapped = MappedStateReducer::new(reducer, move || key_store.get_all_ids());
        let prev_states = self.states.lock().unwrap().clone();
        let transitions = mapped.advance(cache, event, &prev_states);

        let mut new_states = HashMap::new();
        for (id, prev_state, new_state) in transitions {
            self.handle_transition(&id, prev_state, new_state, head_number, prev_head_number)
                .await;
            new_states.insert(id, new_state);
        }
        *self.states.lock().unwrap() = new_states;
    }

    async fn handle_transition(
        &self,
        id: &str,
        prev_state: Option<WatcherAppointmentState>,
        new_state: WatcherAppointmentState,
        head_number: u64,
        prev_head_number: Option<u64>,
    ) {
        let WatcherAppointmentState::Observed { .. } = new_state else { return };

        let confirmations = new_state.confirmations_at(head_number);
        let prev_confirmations = match (prev_state, prev_head_number) {
            (Some(prev), Some(prev_head_number)) => prev.confirmations_at(prev_head_number),
            _ => 0,
        };

        let respond_fires = confirmations >= self.confirmations_before_response as u64
            && prev_confirmations < self.confirmations_before_response as u64;

        if respond_fires {
            if let Some(appointment) = self.store.get_by_id(id) {
                info!(appointment_id = id, "observed event confirmed, dispatching response");
                if let Err(e) = self.responder.respond(&appointment).await {
                    error!(appointment_id = id, error = %e, "failed to dispatch response");
                }
            }
        }

        let evict_fires = confirmations >= self.confirmations_before_removal as u64
            && prev_confirmations < self.confirmations_before_removal as u64;

        if evict_fires {
            info!(appointment_id = id, "appointment fully confirmed, evicting");
            self.store.remove_by_id(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::store::test_utils::appointment;
    use crate::chain::block_cache::test_utils::block;
    use crate::chain::types::Log;
    use ethers::types::H256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn h(n: u8) -> H256 {
        H256::from_low_u64_be(n as u64)
    }

    fn log_for(appointment: &Appointment) -> Log {
        Log { address: appointment.event_filter.address, topics: vec![] }
    }

    #[derive(Default)]
    struct CountingResponder {
        count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ResponseDispatcher for Arc<CountingResponder> {
        async fn respond(&self, _appointment: &Appointment) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn block_with_matching_log(number: u64, hash: u8, parent: u8, appointment: &Appointment) -> Block {
        let mut b = block(number, hash, parent);
        b.logs.push(log_for(appointment));
        b
    }

    #[tokio::test]
    async fn happy_watch_responds_exactly_once_at_confirmation_depth() {
        let store = Arc::new(AppointmentStore::new());
        let app = appointment("A", "loc", 1);
        store.add_or_update_by_state_locator(app.clone());

        let responder = Arc::new(CountingResponder::default());
        let watcher = Watcher::new(store, responder.clone(), 2, 5).unwrap();

        let mut cache = BlockCache::new(100);
        cache.add_block(block(100, 100, 99)).unwrap();
        cache.add_block(block(101, 101, 100)).unwrap();
        cache.add_block(block(102, 102, 101)).unwrap();
        cache.add_block(block_with_matching_log(103, 103, 102, &app)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(100), new_head: h(103) }).await;
        assert_eq!(responder.count.load(Ordering::SeqCst), 0);

        cache.add_block(block(104, 104, 103)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(103), new_head: h(104) }).await;
        // confirmations = 104 - 103 + 1 = 2 >= 2
        assert_eq!(responder.count.load(Ordering::SeqCst), 1);

        cache.add_block(block(105, 105, 104)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(104), new_head: h(105) }).await;
        assert_eq!(responder.count.load(Ordering::SeqCst), 1, "must not respond twice");
    }

    #[tokio::test]
    async fn confirmed_eviction_removes_from_store() {
        let store = Arc::new(AppointmentStore::new());
        let app = appointment("A", "loc", 1);
        store.add_or_update_by_state_locator(app.clone());

        let responder = Arc::new(CountingResponder::default());
        let watcher = Watcher::new(store.clone(), responder, 2, 5).unwrap();

        let mut cache = BlockCache::new(100);
        cache.add_block(block(100, 100, 99)).unwrap();
        cache.add_block(block_with_matching_log(101, 101, 100, &app)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(100), new_head: h(101) }).await;
        assert!(store.get_by_id("A").is_some());

        for i in 102..=105u8 {
            cache.add_block(block(i as u64, i, i - 1)).unwrap();
        }
        watcher.on_new_head(&cache, NewHead { prev_head: h(101), new_head: h(105) }).await;
        // confirmations = 105 - 101 + 1 = 5 >= 5
        assert!(store.get_by_id("A").is_none());
    }

    #[tokio::test]
    async fn reorg_before_response_reverts_to_watching_and_never_responds() {
        let store = Arc::new(AppointmentStore::new());
        let app = appointment("A", "loc", 1);
        store.add_or_update_by_state_locator(app.clone());

        let responder = Arc::new(CountingResponder::default());
        let watcher = Watcher::new(store.clone(), responder.clone(), 2, 5).unwrap();

        let mut cache = BlockCache::new(100);
        cache.add_block(block(100, 100, 99)).unwrap();
        cache.add_block(block(101, 101, 100)).unwrap();
        cache.add_block(block_with_matching_log(102, 102, 101, &app)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(100), new_head: h(102) }).await;
        assert_eq!(responder.count.load(Ordering::SeqCst), 0);

        // Reorg: block 102 replaced by one with no matching log.
        cache.add_block(block(102, 202, 101)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(102), new_head: h(202) }).await;
        assert_eq!(responder.count.load(Ordering::SeqCst), 0);
        assert!(store.get_by_id("A").is_some());

        cache.add_block(block(103, 203, 202)).unwrap();
        watcher.on_new_head(&cache, NewHead { prev_head: h(202), new_head: h(203) }).await;
        assert_eq!(responder.count.load(Ordering::SeqCst), 0, "event did not recur on new chain");
    }

    #[test]
    fn constructor_rejects_inverted_confirmation_thresholds() {
        let store = Arc::new(AppointmentStore::new());
        let responder = Arc::new(CountingResponder::default());
        let result = Watcher::new(store, responder, 5, 2);
        assert!(matches!(result, Err(PisaError::Argument(_))));
    }
}
