//! Snapshot-based recovery
//!
//! Recovery resets the book, fetches a depth snapshot from an external
//! source, seeds the tree from it and then replays the diffs buffered while
//! the engine was uninitialized. The synchronous halves live on
//! `OrderBookEngine` (`begin_recovery` / `complete_recovery`); this module
//! holds the source contract and the fetch wrapper used by the async
//! service between them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::ids::MarketId;

use crate::error::SnapshotFetchError;
use crate::events::DepthSnapshot;

/// External provider of full depth snapshots (typically a REST endpoint).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch up to `depth_limit` levels per side for `symbol`.
    async fn fetch_snapshot(
        &self,
        symbol: &MarketId,
        depth_limit: u32,
    ) -> Result<DepthSnapshot, SnapshotFetchError>;
}

/// Outcome of a completed recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Sequence cursor after seeding and replay.
    pub last_update_id: u64,
    /// Levels seeded from the snapshot.
    pub levels_seeded: usize,
    /// Snapshot pairs skipped because they failed normalization.
    pub levels_rejected: usize,
    /// Buffered diffs applied on top of the snapshot.
    pub replayed: usize,
    /// Buffered diffs already covered by the snapshot.
    pub dropped_stale: usize,
    pub book_size: usize,
}

/// Fetch a snapshot, failing with `SnapshotFetchError::Timeout` if the source
/// does not answer within `timeout`.
pub async fn fetch_with_timeout(
    source: &dyn SnapshotSource,
    symbol: &MarketId,
    depth_limit: u32,
    timeout: Duration,
) -> Result<DepthSnapshot, SnapshotFetchError> {
    debug!(symbol = %symbol, depth_limit, "Fetching depth snapshot");
    match tokio::time::timeout(timeout, source.fetch_snapshot(symbol, depth_limit)).await {
        Ok(result) => result,
        Err(_) => {
            let millis = timeout.as_millis() as u64;
            warn!(symbol = %symbol, timeout_ms = millis, "Snapshot fetch timed out");
            Err(SnapshotFetchError::Timeout(millis))
        }
    }
}
