//! Local error kinds shared across the watchtower core.
//!
//! Matches the error-kind taxonomy the core specifies: configuration and
//! argument errors are fatal to a narrower scope (an appointment, or the
//! process at start-up), queue-consistency errors signal a bug and must
//! surface rather than be silently recovered, and the remaining variants are
//! transient conditions the caller retries against.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PisaError {
    /// An appointment failed inspection or was rejected by policy. Fatal to
    /// that appointment, never to the rest of the system.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A constructor invariant was violated. Callers should treat this as
    /// fatal at start-up.
    #[error("argument error: {0}")]
    Argument(String),

    /// A `MultiResponder` invariant was violated: an unknown TxId was
    /// reported mined, a mined nonce arrived out of order, or the queue was
    /// empty when a mined callback fired. Logged at error level; queue state
    /// is left untouched and the responder keeps operating.
    #[error("queue consistency error: {0}")]
    QueueConsistency(String),

    /// `EthereumTransactionMiner` gave up waiting for a confirmation within
    /// `waitBlocksBeforeRetrying` blocks.
    #[error("block threshold reached without inclusion")]
    BlockThresholdReached,

    /// No new block arrived within the configured timeout.
    #[error("no new block within timeout")]
    NoNewBlock,

    /// The chain reorganised out from under an in-flight operation.
    #[error("reorg invalidated in-flight state")]
    Reorg,

    /// Catch-all for unmet preconditions (e.g. missing topics in an event
    /// filter). The appointment this pertains to is dropped.
    #[error("application error: {0}")]
    Application(String),
}

pub type PisaResult<T> = Result<T, PisaError>;
