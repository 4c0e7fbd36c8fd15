use std::time::Duration;

// ======= Defaults for Settings =======

pub const DEFAULT_MAX_QUEUE_DEPTH: u32 = 12;
pub const DEFAULT_REPLACEMENT_RATE_PCT: u32 = 13;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ======= EthereumTransactionMiner =======

/// How long `EthereumTransactionMiner` waits for a new block before giving
/// up with `NoNewBlockError`.
pub const WAIT_TIME_FOR_NEW_BLOCK: Duration = Duration::from_secs(120);

/// How many blocks `EthereumTransactionMiner` waits for its transaction to
/// appear before giving up with `BlockThresholdReachedError`.
pub const WAIT_BLOCKS_BEFORE_RETRYING: u32 = 20;

// ======= Rpc client =======

pub const RPC_RETRY_CONNECTION_INTERVAL: Duration = Duration::from_secs(10);
pub const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(4);

// ======= Settings environment variables =======

pub const CONFIG_ROOT: &str = "PISA_CONFIG_ROOT";
pub const DEFAULT_CONFIG_ROOT: &str = "/etc/pisa";
