//! Error taxonomy for the depth engine
//!
//! Local, recoverable conditions (stale diffs, single malformed pairs) are
//! absorbed and counted by the engine; the variants here that reach a caller
//! are the systemic ones the orchestration layer must act on.

use rust_decimal::Decimal;
use types::side::Side;

/// Failure of the external depth snapshot source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotFetchError {
    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("snapshot request timed out after {0}ms")]
    Timeout(u64),
}

/// Errors surfaced by the order book engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepthError {
    /// Missing update range; fatal to the engine instance until recovered.
    #[error("sequence gap detected: expected first update id {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    #[error("stale update: final id {final_update_id} <= last applied {last_update_id}")]
    StaleUpdate {
        final_update_id: u64,
        last_update_id: u64,
    },

    #[error("cannot normalize {side} pair ({price}, {quantity}): {reason}")]
    Normalization {
        side: Side,
        price: String,
        quantity: String,
        reason: String,
    },

    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    #[error(transparent)]
    SnapshotFetch(#[from] SnapshotFetchError),

    #[error("crossed book: best bid {best_bid} >= best ask {best_ask}")]
    CrossedBook { best_bid: Decimal, best_ask: Decimal },

    #[error("checkpoint checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("recovery already in progress")]
    RecoveryInProgress,

    #[error("engine has been shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DepthError {
    /// Whether the error invalidates the engine state and requires recovery.
    pub fn requires_recovery(&self) -> bool {
        matches!(
            self,
            DepthError::SequenceGap { .. } | DepthError::CrossedBook { .. }
        )
    }
}
