pub mod gas_queue;
pub mod miner;
pub mod multi_responder;
pub mod signer;
pub mod tracker;

pub use gas_queue::{GasQueue, GasQueueItem, GasQueueItemRequest, OutgoingTransaction};
pub use miner::EthereumTransactionMiner;
pub use multi_responder::{MultiResponder, ResponderAppointmentState};
pub use signer::{GasEstimator, Signer};
pub use tracker::TransactionTracker;
