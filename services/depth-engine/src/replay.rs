//! Offline replay
//!
//! Feeds a recorded diff sequence (optionally on top of a snapshot) through
//! a fresh `OrderBookEngine` and reports the resulting state. Deterministic:
//! the same snapshot and diffs always produce the same state checksum.
//!
//! Each diff is applied at its exchange event time when present, otherwise
//! at the previous diff's time, starting from the configured clock start.
//! Maintenance runs at most once per diff, when the replay clock has reached
//! the next prune deadline; the deadline then restarts from that diff's time.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use types::ids::MarketId;

use crate::config::EngineConfig;
use crate::engine::{DepthMetrics, OrderBookEngine, UpdateOutcome};
use crate::error::DepthError;
use crate::events::{DepthSnapshot, DepthUpdate};
use crate::snapshot::compute_checksum;

/// Summary of a replay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub symbol: MarketId,
    pub updates_applied: u64,
    /// Stale, circuit-rejected and malformed diffs.
    pub updates_dropped: u64,
    pub duration_ms: u128,
    pub updates_per_second: f64,
    /// SHA-256 of the final book (see `snapshot::compute_checksum`).
    pub state_checksum: String,
    pub last_update_id: Option<u64>,
    pub depth: DepthMetrics,
}

/// Result of a replay: the rebuilt engine plus its report.
pub struct ReplayResult {
    pub book: OrderBookEngine,
    pub report: ReplayReport,
}

/// Errors during replay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("sequence gap at diff {index}: expected {expected}, got {actual}")]
    SequenceGap { index: usize, expected: u64, actual: u64 },

    #[error("state checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("engine error: {0}")]
    Engine(#[from] DepthError),
}

/// Replays recorded diffs into a fresh engine.
pub struct ReplayEngine {
    symbol: MarketId,
    config: EngineConfig,
    /// Expected state checksum for validation (if known).
    expected_checksum: Option<String>,
    clock_start_ms: i64,
    reject_stale: bool,
}

impl ReplayEngine {
    /// Strict replay: sequence gaps abort the run.
    pub fn new(symbol: MarketId, config: EngineConfig) -> Self {
        Self {
            symbol,
            config,
            expected_checksum: None,
            clock_start_ms: 0,
            reject_stale: false,
        }
    }

    /// Set the expected state checksum for post-replay validation.
    pub fn with_expected_checksum(mut self, checksum: String) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    /// Skip sequence validation (recordings with known holes, backtests).
    pub fn with_relaxed_ordering(mut self) -> Self {
        self.config.disable_sequence_validation = true;
        self
    }

    /// Abort on the first stale or duplicate diff instead of dropping it.
    pub fn with_stale_rejection(mut self) -> Self {
        self.reject_stale = true;
        self
    }

    /// Replay clock start for recordings whose diffs carry no event time.
    pub fn with_clock_start(mut self, start_ms: i64) -> Self {
        self.clock_start_ms = start_ms;
        self
    }

    pub fn replay(
        &self,
        snapshot: Option<&DepthSnapshot>,
        updates: &[DepthUpdate],
    ) -> Result<ReplayResult, ReplayError> {
        let started = Instant::now();
        info!(
            symbol = %self.symbol,
            update_count = updates.len(),
            from_snapshot = snapshot.is_some(),
            strict = !self.config.disable_sequence_validation,
            reject_stale = self.reject_stale,
            "Starting depth replay"
        );

        let mut book = OrderBookEngine::new(self.symbol.clone(), self.config.clone())?;
        let mut now = first_event_time(updates).unwrap_or(self.clock_start_ms);
        match snapshot {
            Some(s) => {
                book.complete_recovery(s, now)?;
            }
            None => {
                book.initialize_empty(now)?;
            }
        }

        let prune_interval = self.config.prune_interval_ms as i64;
        let mut next_maintenance = now.saturating_add(prune_interval);
        let mut applied: u64 = 0;
        let mut dropped: u64 = 0;

        for (index, update) in updates.iter().enumerate() {
            now = update.event_time.unwrap_or(now).max(now);
            if now >= next_maintenance {
                book.run_maintenance(now);
                next_maintenance = now.saturating_add(prune_interval);
            }

            let last_update_id = book.last_update_id();
            match book.update_depth(update.clone(), now) {
                Ok(UpdateOutcome::Applied { .. }) => applied += 1,
                Ok(UpdateOutcome::DroppedStale) if self.reject_stale => {
                    return Err(DepthError::StaleUpdate {
                        final_update_id: update.final_update_id,
                        last_update_id: last_update_id.unwrap_or_default(),
                    }
                    .into());
                }
                Ok(_) => dropped += 1,
                Err(DepthError::SequenceGap { expected, actual }) => {
                    return Err(ReplayError::SequenceGap { index, expected, actual });
                }
                Err(DepthError::MalformedUpdate(reason)) => {
                    warn!(index, reason = %reason, "Skipping malformed diff");
                    dropped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let state_checksum =
            compute_checksum(book.symbol(), book.last_update_id(), book.snapshot().values());

        if let Some(ref expected) = self.expected_checksum {
            if &state_checksum != expected {
                error!(
                    expected = %expected,
                    actual = %state_checksum,
                    "State checksum mismatch after replay"
                );
                return Err(ReplayError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: state_checksum,
                });
            }
        }

        let duration_ms = started.elapsed().as_millis();
        let updates_per_second = if duration_ms > 0 {
            (applied as f64 / duration_ms as f64) * 1000.0
        } else {
            applied as f64
        };

        let report = ReplayReport {
            symbol: self.symbol.clone(),
            updates_applied: applied,
            updates_dropped: dropped,
            duration_ms,
            updates_per_second,
            state_checksum,
            last_update_id: book.last_update_id(),
            depth: book.depth_metrics(),
        };

        info!(
            updates_applied = report.updates_applied,
            updates_dropped = report.updates_dropped,
            duration_ms = report.duration_ms,
            ups = %format!("{:.0}", report.updates_per_second),
            "Replay completed successfully"
        );

        Ok(ReplayResult { book, report })
    }
}

/// Event time of the first diff that carries one.
fn first_event_time(updates: &[DepthUpdate]) -> Option<i64> {
    updates.iter().find_map(|u| u.event_time)
}
