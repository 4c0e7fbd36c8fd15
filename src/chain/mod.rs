pub mod block_cache;
pub mod block_processor;
pub mod rpc;
pub mod types;

pub use block_cache::BlockCache;
pub use block_processor::{BlockProcessor, NewHead};
pub use rpc::BlockSource;
pub use types::{Block, EventFilter, Log, Tx};
