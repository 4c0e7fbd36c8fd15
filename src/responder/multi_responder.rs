//! Owns the signing key and the [`GasQueue`], accepts response requests,
//! drives broadcasts, and reacts to mined/reorged transactions.
//!
//! Grounded on the teacher's `EthBroadcaster`/`retrier.rs` gas-bump-and-retry
//! loop, but collapsed to the message-style `startResponse`/`txMined` pair
//! the specification calls for: the signing key and the queue are never
//! exposed, only mutated from behind these two entry points, so no task
//! outside `MultiResponder` ever touches them directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use ethers::types::H256;
use tokio::sync::Mutex as AsyncMutex;
use tracing::error;

use crate::appointment::{Appointment, TxId};
use crate::chain::block_cache::BlockCache;
use crate::chain::block_processor::NewHead;
use crate::errors::PisaError;
use crate::responder::gas_queue::{GasQueue, GasQueueItem, GasQueueItemRequest};
use crate::responder::signer::{GasEstimator, Signer};
use crate::responder::tracker::TransactionTracker;
use crate::watcher::ResponseDispatcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderAppointmentState {
    Pending { identifier: TxId },
    Mined { identifier: TxId, block_number: u64, nonce: u64 },
}

enum TxMinedOutcome {
    FrontDequeued(GasQueueItemRequest),
    Consumed(Vec<GasQueueItem>),
}

pub struct MultiResponder<S, G> {
    signer: S,
    gas_estimator: G,
    tracker: Arc<TransactionTracker>,
    replacement_rate_pct: u32,
    max_queue_depth: u32,
    response_gas_limit: ethers::types::U256,
    queue: AsyncMutex<Option<GasQueue>>,
    states: StdMutex<HashMap<TxId, ResponderAppointmentState>>,
    /// Requests dequeued because they were observed mined, kept around so a
    /// later reorg that un-mines them can be re-submitted without asking the
    /// caller to supply the appointment again.
    mined_requests: StdMutex<HashMap<TxId, GasQueueItemRequest>>,
}

impl<S: Signer, G: GasEstimator> MultiResponder<S, G> {
    pub fn new(
        signer: S,
        gas_estimator: G,
        tracker: Arc<TransactionTracker>,
        replacement_rate_pct: u32,
        max_queue_depth: u32,
        response_gas_limit: ethers::types::U256,
    ) -> Self {
        Self {
            signer,
            gas_estimator,
            tracker,
            replacement_rate_pct,
            max_queue_depth,
            response_gas_limit,
            queue: AsyncMutex::new(None),
            states: StdMutex::new(HashMap::new()),
            mined_requests: StdMutex::new(HashMap::new()),
        }
    }

    async fn ensure_queue(&self) -> anyhow::Result<()> {
        let mut guard = self.queue.lock().await;
        if guard.is_none() {
            let nonce = self.signer.get_transaction_count().await?;
            *guard = Some(GasQueue::new(nonce, self.replacement_rate_pct, self.max_queue_depth));
        }
        Ok(())
    }

    pub async fn start_response(self: &Arc<Self>, appointment: &Appointment) -> anyhow::Result<()> {
        self.ensure_queue().await?;
        let data = appointment.response_data.encode_calldata()?;
        let chain_id = self.signer.chain_id().await?;
        let to = appointment.response_data.contract_address;
        let identifier = TxId::new(chain_id, data.clone(), to, self.response_gas_limit);
        let ideal_gas = self.gas_estimator.estimate(to, data).await?;
        let request = GasQueueItemRequest {
            identifier,
            ideal_gas,
            response_data: appointment.response_data.clone(),
        };

        let mut guard = self.queue.lock().await;
        let prev = guard.take().expect("ensure_queue just populated this");
        if prev.depth_reached() {
            *guard = Some(prev);
            anyhow::bail!(
                "gas queue at max depth, dropping response for appointment {}",
                appointment.id
            );
        }
        let new_queue = prev.clone().add(request);
        let replaced = new_queue.difference(&prev);
        *guard = Some(new_queue);
        drop(guard);

        for item in replaced {
            self.register_and_broadcast(item).await;
        }
        Ok(())
    }

    async fn register_and_broadcast(self: &Arc<Self>, item: GasQueueItem) {
        let id = item.request.identifier.clone();
        let weak = Arc::downgrade(self);
        let callback_id = id.clone();
        self.tracker.add_tx(
            id,
            Box::new(move |observed_nonce| {
                Box::pin(async move {
                    if let Some(responder) = weak.upgrade() {
                        responder.tx_mined(&callback_id, observed_nonce).await;
                    }
                })
            }),
        );
        if let Err(e) = self.signer.send_transaction(item.to_transaction_request()).await {
            error!(error = %e, "broadcast failed, will retry at the next block tick");
        }
    }

    async fn try_tx_mined(&self, id: &TxId, observed_nonce: u64) -> Result<TxMinedOutcome, PisaError> {
        let mut guard = self.queue.lock().await;
        let queue = guard
            .as_ref()
            .ok_or_else(|| PisaError::QueueConsistency("txMined before queue initialised".into()))?;
        if queue.is_empty() {
            return Err(PisaError::QueueConsistency("txMined with an empty queue".into()));
        }
        if !queue.contains(id) {
            return Err(PisaError::QueueConsistency(format!("{id:?} mined but not present in queue")));
        }
        let front = queue.front().unwrap();
        if front.nonce != observed_nonce {
            return Err(PisaError::QueueConsistency(format!(
                "observed nonce {observed_nonce} does not match front nonce {}",
                front.nonce
            )));
        }

        if &front.request.identifier == id {
            let request = front.request.clone();
            let current = guard.take().unwrap();
            *guard = Some(current.dequeue());
            Ok(TxMinedOutcome::FrontDequeued(request))
        } else {
            let current = guard.take().unwrap();
            let prev = current.clone();
            match current.consume(id) {
                Ok(new_queue) => {
                    let replaced = new_queue.difference(&prev);
                    *guard = Some(new_queue);
                    Ok(TxMinedOutcome::Consumed(replaced))
                }
                Err(e) => {
                    *guard = Some(prev);
                    Err(e)
                }
            }
        }
    }

    /// Invoked by the [`TransactionTracker`] callback when a transaction
    /// with TxId `id` appears on chain at `observed_nonce`.
    pub async fn tx_mined(self: &Arc<Self>, id: &TxId, observed_nonce: u64) {
        match self.try_tx_mined(id, observed_nonce).await {
            Ok(TxMinedOutcome::FrontDequeued(request)) => {
                self.mined_requests.lock().unwrap().insert(request.identifier.clone(), request);
            }
            Ok(TxMinedOutcome::Consumed(replaced)) => {
                for item in replaced {
                    self.register_and_broadcast(item).await;
                }
            }
            Err(e) => error!(error = %e, "queue consistency violated; queue left untouched"),
        }
    }

    fn find_mined_block(&self, cache: &BlockCache, head: H256, id: &TxId) -> Option<(u64, u64)> {
        cache.ancestry(head).find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| {
                    tx.to == Some(id.to)
                        && tx.data == id.data
                        && tx.chain_id == id.chain_id
                        && tx.gas_limit == id.gas_limit
                })
                .map(|tx| (block.number, tx.nonce))
        })
    }

    /// Reorg reaction: re-derive `PENDING`/`MINED` for every tracked TxId
    /// against the new head. A TxId that was `MINED` and is now `PENDING`
    /// was reorged out from under us and must be resubmitted.
    pub async fn on_new_head(self: &Arc<Self>, cache: &BlockCache, event: NewHead) {
        let tracked: Vec<TxId> = {
            let guard = self.queue.lock().await;
            guard.as_ref().map(|q| q.items().iter().map(|i| i.request.identifier.clone()).collect()).unwrap_or_default()
        };
        let mined_ids: Vec<TxId> = self.mined_requests.lock().unwrap().keys().cloned().collect();

        for id in tracked.iter().chain(mined_ids.iter()) {
            let mined_at = self.find_mined_block(cache, event.new_head, id);
            let new_state = match mined_at {
                Some((block_number, nonce)) => {
                    ResponderAppointmentState::Mined { identifier: id.clone(), block_number, nonce }
                }
                None => ResponderAppointmentState::Pending { identifier: id.clone() },
            };
            let prev_state = {
                let mut states = self.states.lock().unwrap();
                states.insert(id.clone(), new_state.clone())
            };

            let was_mined = matches!(prev_state, Some(ResponderAppointmentState::Mined { .. }));
            let now_pending = matches!(new_state, ResponderAppointmentState::Pending { .. });
            if was_mined && now_pending {
                if let Some(request) = self.mined_requests.lock().unwrap().remove(id) {
                    self.resubmit(request).await;
                }
            }
        }
    }

    async fn resubmit(self: &Arc<Self>, request: GasQueueItemRequest) {
        if self.ensure_queue().await.is_err() {
            return;
        }
        let mut guard = self.queue.lock().await;
        let Some(prev) = guard.take() else { return };
        let new_queue = prev.clone().add(request);
        let replaced = new_queue.difference(&prev);
        *guard = Some(new_queue);
        drop(guard);
        for item in replaced {
            self.register_and_broadcast(item).await;
        }
    }
}

#[async_trait::async_trait]
impl<S: Signer, G: GasEstimator> ResponseDispatcher for Arc<MultiResponder<S, G>> {
    async fn respond(&self, appointment: &Appointment) -> anyhow::Result<()> {
        self.start_response(appointment).await
    }
}
