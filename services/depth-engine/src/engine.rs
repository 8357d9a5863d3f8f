//! Order book engine
//!
//! The synchronous single-writer core for one symbol. Every mutation takes
//! `&mut self` and an explicit `now_ms`, so the same code runs under the
//! async service handle, in offline replay and in deterministic tests.
//!
//! Update protocol for each diff:
//! 1. circuit breaker gate (rejected diffs are dropped and counted)
//! 2. buffering while uninitialized (arrival order preserved)
//! 3. sequence validation (gap is an error, stale/duplicate is dropped)
//! 4. normalization and tree mutation, bids then asks
//! 5. best-quote refresh, only for a side whose cached best was touched or
//!    dominated
//! 6. cursor and timestamp advance, crossed-book check

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use types::ids::MarketId;
use types::numeric::{safe_add, safe_div, safe_mul, safe_sub, Price, Quantity};
use types::side::Side;

use crate::circuit_breaker::{CircuitBreaker, CircuitState, ErrorVerdict};
use crate::config::EngineConfig;
use crate::error::DepthError;
use crate::events::{DepthSnapshot, DepthUpdate, RawLevel};
use crate::health::{classify, HealthInputs, HealthReport};
use crate::maintenance::{evict_excess, prune_distance, prune_stale, MaintenanceReport};
use crate::metrics::EngineMetrics;
use crate::normalizer::PriceNormalizer;
use crate::recovery::RecoveryReport;
use crate::snapshot::BookCheckpoint;
use crate::tree::{LevelChange, PriceLevel, PriceLevelTree};

/// Best quotes observed while the book was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crossing {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl From<Crossing> for DepthError {
    fn from(c: Crossing) -> Self {
        DepthError::CrossedBook {
            best_bid: c.best_bid,
            best_ask: c.best_ask,
        }
    }
}

/// What `update_depth` did with a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Diff applied to the book.
    Applied {
        /// Pairs that changed a level.
        levels_touched: usize,
        /// Pairs skipped because they failed normalization.
        rejected_pairs: usize,
        /// Set when the diff left the book crossed.
        crossed: Option<Crossing>,
    },
    /// Engine not initialized; diff queued for replay after recovery.
    Buffered,
    /// Diff already covered by the sequence cursor.
    DroppedStale,
    /// Circuit breaker open; diff discarded.
    RejectedCircuitOpen,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

/// Aggregate volume inside a price band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandSum {
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub level_count: usize,
}

/// Whole-book summary statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthMetrics {
    pub total_levels: usize,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub total_bid_volume: Decimal,
    pub total_ask_volume: Decimal,
    /// `(bid - ask) / (bid + ask)`, zero when both volumes are zero.
    pub imbalance: Decimal,
}

/// Order book engine for one symbol.
pub struct OrderBookEngine {
    symbol: MarketId,
    config: EngineConfig,
    normalizer: PriceNormalizer,
    tree: PriceLevelTree,
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    last_update_id: Option<u64>,
    last_update_ms: Option<i64>,
    initialized: bool,
    stream_connected: bool,
    crossed: Option<Crossing>,
    shut_down: bool,
    buffer: VecDeque<DepthUpdate>,
    breaker: CircuitBreaker,
    metrics: Arc<EngineMetrics>,
}

impl OrderBookEngine {
    /// Create an uninitialized engine. Diffs are buffered until a snapshot
    /// is applied via `complete_recovery`, `initialize_empty` or
    /// `restore_checkpoint`.
    pub fn new(symbol: MarketId, config: EngineConfig) -> Result<Self, DepthError> {
        Self::with_metrics(symbol, config, Arc::new(EngineMetrics::new()))
    }

    /// Create an engine that records into a shared metrics instance.
    pub fn with_metrics(
        symbol: MarketId,
        config: EngineConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Result<Self, DepthError> {
        config.validate()?;
        info!(
            symbol = %symbol,
            price_precision = config.price_precision,
            max_levels = config.max_levels,
            sequence_validation = !config.disable_sequence_validation,
            "OrderBookEngine created"
        );
        Ok(Self {
            normalizer: PriceNormalizer::new(config.price_precision, config.quantity_precision),
            breaker: CircuitBreaker::new(
                config.max_error_rate,
                config.error_window_ms,
                config.circuit_cooldown_ms,
            ),
            symbol,
            config,
            tree: PriceLevelTree::new(),
            best_bid: None,
            best_ask: None,
            last_update_id: None,
            last_update_ms: None,
            initialized: false,
            stream_connected: true,
            crossed: None,
            shut_down: false,
            buffer: VecDeque::new(),
            metrics,
        })
    }

    // ── Update path ─────────────────────────────────────────────────────

    /// Apply one diff at `now_ms`.
    ///
    /// Stale diffs and diffs arriving while the breaker is open are absorbed
    /// and reported through the outcome. A sequence gap is returned as
    /// `Err(SequenceGap)` with the book untouched; the caller must recover.
    pub fn update_depth(
        &mut self,
        update: DepthUpdate,
        now_ms: i64,
    ) -> Result<UpdateOutcome, DepthError> {
        if self.shut_down {
            return Err(DepthError::ShutDown);
        }

        if self.breaker.poll(now_ms) {
            self.metrics.record_circuit_rejection();
            debug!(
                symbol = %self.symbol,
                final_update_id = update.final_update_id,
                "Circuit open, dropping diff"
            );
            return Ok(UpdateOutcome::RejectedCircuitOpen);
        }

        if !self.initialized {
            self.buffer_update(update);
            return Ok(UpdateOutcome::Buffered);
        }

        self.apply_validated(&update, now_ms)
    }

    /// Count an error detected outside the engine (e.g. an undecodable
    /// frame) toward the circuit breaker.
    pub fn report_error(&mut self, now_ms: i64) {
        self.count_error(now_ms);
    }

    fn buffer_update(&mut self, update: DepthUpdate) {
        if self.buffer.len() >= self.config.max_buffered_updates {
            if let Some(dropped) = self.buffer.pop_front() {
                self.metrics.record_buffer_overflow();
                warn!(
                    symbol = %self.symbol,
                    capacity = self.config.max_buffered_updates,
                    dropped_final_update_id = dropped.final_update_id,
                    "Pre-initialization buffer full, dropping oldest diff"
                );
            }
        }
        self.metrics.record_buffered();
        self.buffer.push_back(update);
    }

    fn apply_validated(
        &mut self,
        update: &DepthUpdate,
        now_ms: i64,
    ) -> Result<UpdateOutcome, DepthError> {
        if update.first_update_id > update.final_update_id {
            self.metrics.record_normalization_error();
            self.count_error(now_ms);
            warn!(
                symbol = %self.symbol,
                first_update_id = update.first_update_id,
                final_update_id = update.final_update_id,
                "Rejecting diff with inverted id range"
            );
            return Err(DepthError::MalformedUpdate(format!(
                "first update id {} > final update id {}",
                update.first_update_id, update.final_update_id
            )));
        }

        if !self.config.disable_sequence_validation {
            if let Some(last) = self.last_update_id {
                if update.final_update_id <= last {
                    self.metrics.record_stale_drop();
                    debug!(
                        symbol = %self.symbol,
                        final_update_id = update.final_update_id,
                        last_update_id = last,
                        "Dropping stale diff"
                    );
                    return Ok(UpdateOutcome::DroppedStale);
                }
                let expected = last.saturating_add(1);
                if update.first_update_id > expected {
                    self.metrics.record_sequence_gap();
                    self.count_error(now_ms);
                    warn!(
                        symbol = %self.symbol,
                        expected,
                        actual = update.first_update_id,
                        "Sequence gap detected, recovery required"
                    );
                    return Err(DepthError::SequenceGap {
                        expected,
                        actual: update.first_update_id,
                    });
                }
            }
        }

        let started = Instant::now();
        let mut touched = 0;
        let mut rejected = 0;
        let mut dirty_bid = false;
        let mut dirty_ask = false;

        let sides: [(Side, &[RawLevel]); 2] = [
            (Side::Bid, update.bids.as_slice()),
            (Side::Ask, update.asks.as_slice()),
        ];
        for (side, pairs) in sides {
            for raw in pairs {
                match self.normalizer.pair(side, raw) {
                    Ok((price, quantity)) => {
                        let change = self.tree.upsert(price, side, quantity, now_ms);
                        if change != LevelChange::Unchanged {
                            touched += 1;
                        }
                        if self.invalidates_best(side, price, quantity) {
                            match side {
                                Side::Bid => dirty_bid = true,
                                Side::Ask => dirty_ask = true,
                            }
                        }
                    }
                    Err(e) => {
                        rejected += 1;
                        self.metrics.record_normalization_error();
                        self.count_error(now_ms);
                        warn!(symbol = %self.symbol, error = %e, "Skipping malformed pair");
                    }
                }
            }
        }

        self.refresh_best(dirty_bid, dirty_ask);
        self.last_update_id = Some(match self.last_update_id {
            Some(last) => last.max(update.final_update_id),
            None => update.final_update_id,
        });
        self.last_update_ms = Some(now_ms);
        let crossed = self.check_crossed(now_ms);

        self.metrics
            .record_applied(started.elapsed().as_nanos().min(u64::MAX as u128) as u64);

        Ok(UpdateOutcome::Applied {
            levels_touched: touched,
            rejected_pairs: rejected,
            crossed,
        })
    }

    /// Whether writing `quantity` at `price` can move the cached best for
    /// `side`: the touched price is the cached best, or a non-zero quantity
    /// now dominates it.
    fn invalidates_best(&self, side: Side, price: Price, quantity: Quantity) -> bool {
        let cached = match side {
            Side::Bid => self.best_bid,
            Side::Ask => self.best_ask,
        };
        if cached == Some(price) {
            return true;
        }
        if quantity.is_zero() {
            return false;
        }
        match (side, cached) {
            (_, None) => true,
            (Side::Bid, Some(best)) => price > best,
            (Side::Ask, Some(best)) => price < best,
        }
    }

    fn refresh_best(&mut self, bid: bool, ask: bool) {
        if bid {
            self.best_bid = self.tree.best_bid();
        }
        if ask {
            self.best_ask = self.tree.best_ask();
        }
    }

    fn check_crossed(&mut self, now_ms: i64) -> Option<Crossing> {
        let crossing = match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) if bid >= ask => Some(Crossing {
                best_bid: bid.as_decimal(),
                best_ask: ask.as_decimal(),
            }),
            _ => None,
        };
        if let Some(c) = crossing {
            self.metrics.record_crossed_book();
            self.count_error(now_ms);
            error!(
                symbol = %self.symbol,
                best_bid = %c.best_bid,
                best_ask = %c.best_ask,
                last_update_id = ?self.last_update_id,
                "Crossed book detected"
            );
        } else if self.crossed.is_some() {
            info!(symbol = %self.symbol, "Book uncrossed");
        }
        self.crossed = crossing;
        crossing
    }

    fn count_error(&mut self, now_ms: i64) {
        if let ErrorVerdict::Tripped { until_ms } = self.breaker.record_error(now_ms) {
            self.metrics.record_circuit_open();
            debug!(symbol = %self.symbol, until_ms, "Updates rejected until cooldown elapses");
        }
    }

    // ── Recovery ────────────────────────────────────────────────────────

    /// Reset the book ahead of a snapshot fetch. Diffs arriving until
    /// `complete_recovery` are buffered.
    pub fn begin_recovery(&mut self) {
        self.reset_book();
        info!(
            symbol = %self.symbol,
            buffered = self.buffer.len(),
            "Recovery started"
        );
    }

    /// Seed the book from `snapshot`, replay buffered diffs and mark the
    /// engine initialized.
    ///
    /// A sequence gap among the buffered diffs fails the recovery: the
    /// offending diff and everything after it stay buffered and the engine
    /// stays uninitialized, so a later recovery can start from a fresher
    /// snapshot.
    pub fn complete_recovery(
        &mut self,
        snapshot: &DepthSnapshot,
        now_ms: i64,
    ) -> Result<RecoveryReport, DepthError> {
        if self.shut_down {
            return Err(DepthError::ShutDown);
        }

        self.reset_book();
        let mut rejected = 0;
        let sides: [(Side, &[RawLevel]); 2] = [
            (Side::Bid, snapshot.bids.as_slice()),
            (Side::Ask, snapshot.asks.as_slice()),
        ];
        for (side, pairs) in sides {
            for raw in pairs {
                match self.normalizer.pair(side, raw) {
                    Ok((price, quantity)) => {
                        self.tree.upsert(price, side, quantity, now_ms);
                    }
                    Err(e) => {
                        rejected += 1;
                        self.metrics.record_normalization_error();
                        warn!(
                            symbol = %self.symbol,
                            error = %e,
                            "Skipping malformed snapshot level"
                        );
                    }
                }
            }
        }
        let seeded = self.tree.len();
        self.refresh_best(true, true);
        self.last_update_id = Some(snapshot.last_update_id);
        self.last_update_ms = Some(now_ms);

        let (replayed, dropped_stale) = match self.replay_buffer(now_ms) {
            Ok(counts) => counts,
            Err(e) => {
                self.record_recovery_failure(&e);
                return Err(e);
            }
        };

        self.initialized = true;
        self.check_crossed(now_ms);
        self.metrics.record_recovery(true);

        let report = RecoveryReport {
            last_update_id: self.last_update_id.unwrap_or(snapshot.last_update_id),
            levels_seeded: seeded,
            levels_rejected: rejected,
            replayed,
            dropped_stale,
            book_size: self.tree.len(),
        };
        info!(
            symbol = %self.symbol,
            last_update_id = report.last_update_id,
            levels = report.book_size,
            replayed = report.replayed,
            dropped_stale = report.dropped_stale,
            "Order book initialized from snapshot"
        );
        Ok(report)
    }

    /// Record a recovery that failed before the book could be seeded.
    pub fn record_recovery_failure(&self, error: &DepthError) {
        self.metrics.record_recovery(false);
        warn!(
            symbol = %self.symbol,
            error = %error,
            buffered = self.buffer.len(),
            "Recovery failed, engine remains uninitialized"
        );
    }

    /// Mark the engine initialized with an empty book and no sequence
    /// cursor, then replay anything buffered. For feeds without snapshots
    /// and offline replay from the first recorded diff.
    pub fn initialize_empty(&mut self, now_ms: i64) -> Result<usize, DepthError> {
        if self.shut_down {
            return Err(DepthError::ShutDown);
        }
        self.reset_book();
        let (replayed, _) = self.replay_buffer(now_ms)?;
        self.initialized = true;
        info!(symbol = %self.symbol, replayed, "Order book initialized empty");
        Ok(replayed)
    }

    /// Apply buffered diffs in arrival order under the normal validation
    /// rules. Returns `(applied, dropped_stale)`.
    fn replay_buffer(&mut self, now_ms: i64) -> Result<(usize, usize), DepthError> {
        let mut applied = 0;
        let mut dropped = 0;
        while let Some(update) = self.buffer.pop_front() {
            match self.apply_validated(&update, now_ms) {
                Ok(UpdateOutcome::DroppedStale) => dropped += 1,
                Ok(_) => applied += 1,
                Err(e @ DepthError::SequenceGap { .. }) => {
                    self.buffer.push_front(update);
                    return Err(e);
                }
                // Malformed diffs were already counted; skip them.
                Err(_) => {}
            }
        }
        Ok((applied, dropped))
    }

    fn reset_book(&mut self) {
        self.tree.clear();
        self.best_bid = None;
        self.best_ask = None;
        self.last_update_id = None;
        self.crossed = None;
        self.initialized = false;
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Run the staleness, distance and eviction passes, then recompute the
    /// best quotes once.
    pub fn run_maintenance(&mut self, now_ms: i64) -> MaintenanceReport {
        if self.shut_down {
            return MaintenanceReport::default();
        }

        let mid = self.mid_price_opt();
        let reference = mid.or_else(|| self.best_bid.or(self.best_ask).map(|p| p.as_decimal()));

        let stale_pruned = prune_stale(&mut self.tree, now_ms, self.config.stale_threshold_ms);
        let distance_pruned = prune_distance(&mut self.tree, mid, self.config.max_price_distance);
        let evicted = evict_excess(&mut self.tree, reference, self.config.max_levels);

        let report = MaintenanceReport {
            stale_pruned,
            distance_pruned,
            evicted,
            levels_remaining: self.tree.len(),
        };
        if report.total_removed() > 0 {
            self.refresh_best(true, true);
            if self.crossed.is_some() {
                self.check_crossed(now_ms);
            }
        }
        self.metrics
            .record_maintenance(stale_pruned as u64, distance_pruned as u64, evicted as u64);
        debug!(
            symbol = %self.symbol,
            stale_pruned,
            distance_pruned,
            evicted,
            levels = report.levels_remaining,
            "Maintenance pass complete"
        );
        report
    }

    /// Close the breaker if its cooldown has elapsed. Returns whether it is
    /// still open.
    pub fn poll_circuit(&mut self, now_ms: i64) -> bool {
        self.breaker.poll(now_ms)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Best bid price, zero when there is no bid.
    pub fn best_bid(&self) -> Decimal {
        self.best_bid.map(|p| p.as_decimal()).unwrap_or(Decimal::ZERO)
    }

    /// Best ask price, zero when there is no ask.
    pub fn best_ask(&self) -> Decimal {
        self.best_ask.map(|p| p.as_decimal()).unwrap_or(Decimal::ZERO)
    }

    /// `best_ask - best_bid`, zero if either side is absent.
    pub fn spread(&self) -> Decimal {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => {
                safe_sub(ask.as_decimal(), bid.as_decimal()).unwrap_or(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        }
    }

    /// Midpoint of the best quotes, zero if either side is absent.
    pub fn mid_price(&self) -> Decimal {
        self.mid_price_opt().unwrap_or(Decimal::ZERO)
    }

    fn mid_price_opt(&self) -> Option<Decimal> {
        let (bid, ask) = (self.best_bid?, self.best_ask?);
        let sum = safe_add(bid.as_decimal(), ask.as_decimal()).ok()?;
        safe_div(sum, Decimal::from(2)).ok()
    }

    /// Sum volumes of every level within `center ± band_ticks * tick_size`,
    /// inclusive. `center` is normalized to the book's tick first.
    pub fn sum_band(&self, center: Decimal, band_ticks: u32, tick_size: Decimal) -> BandSum {
        let Some(center) = self.normalizer.price(center) else {
            return BandSum::default();
        };
        let center = center.as_decimal();
        let radius = safe_mul(Decimal::from(band_ticks), tick_size.abs()).unwrap_or(Decimal::MAX);
        let lower = safe_sub(center, radius).unwrap_or(Decimal::MIN);
        let upper = safe_add(center, radius).unwrap_or(Decimal::MAX);

        self.tree
            .range(lower, upper)
            .fold(BandSum::default(), |mut acc, level| {
                acc.bid_volume = acc.bid_volume.saturating_add(level.bid.as_decimal());
                acc.ask_volume = acc.ask_volume.saturating_add(level.ask.as_decimal());
                acc.level_count += 1;
                acc
            })
    }

    /// Copy of the level at `price` (normalized first).
    pub fn level(&self, price: Decimal) -> Option<PriceLevel> {
        let key = self.normalizer.price(price)?;
        self.tree.get(&key).cloned()
    }

    /// Deep copy of the whole book in ascending price order.
    pub fn snapshot(&self) -> BTreeMap<Price, PriceLevel> {
        self.tree.to_map()
    }

    pub fn depth_metrics(&self) -> DepthMetrics {
        let (bid_volume, ask_volume) =
            self.tree.iter().fold((Decimal::ZERO, Decimal::ZERO), |(b, a), level| {
                (
                    b.saturating_add(level.bid.as_decimal()),
                    a.saturating_add(level.ask.as_decimal()),
                )
            });
        let imbalance = safe_sub(bid_volume, ask_volume)
            .and_then(|diff| safe_div(diff, safe_add(bid_volume, ask_volume)?))
            .unwrap_or(Decimal::ZERO);

        DepthMetrics {
            total_levels: self.tree.len(),
            bid_levels: self.tree.bid_level_count(),
            ask_levels: self.tree.ask_level_count(),
            total_bid_volume: bid_volume,
            total_ask_volume: ask_volume,
            imbalance,
        }
    }

    pub fn health(&self, now_ms: i64) -> HealthReport {
        let inputs = HealthInputs {
            initialized: self.initialized,
            last_update_age_ms: self.last_update_ms.map(|t| now_ms.saturating_sub(t).max(0)),
            circuit_open: self.breaker.is_open_at(now_ms),
            error_count: self.breaker.error_count(now_ms),
            stream_connected: self.stream_connected,
            crossed: self.crossed.is_some(),
        };
        let (status, reasons) = classify(&inputs, &self.config);
        HealthReport {
            status,
            initialized: inputs.initialized,
            last_update_age_ms: inputs.last_update_age_ms,
            circuit_open: inputs.circuit_open,
            error_count: inputs.error_count,
            book_size: self.tree.len(),
            spread: self.spread(),
            mid_price: self.mid_price(),
            stream_connected: inputs.stream_connected,
            crossed: inputs.crossed,
            reasons,
        }
    }

    /// `Err(CrossedBook)` while the last check found the book crossed.
    pub fn ensure_uncrossed(&self) -> Result<(), DepthError> {
        match self.crossed {
            Some(c) => Err(c.into()),
            None => Ok(()),
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn last_update_ms(&self) -> Option<i64> {
        self.last_update_ms
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_stream_connected(&self) -> bool {
        self.stream_connected
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn crossing(&self) -> Option<Crossing> {
        self.crossed
    }

    pub fn circuit_state(&self, now_ms: i64) -> CircuitState {
        self.breaker.state(now_ms)
    }

    /// Diffs waiting for initialization.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of active levels.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn on_stream_connected(&mut self) {
        self.stream_connected = true;
        info!(symbol = %self.symbol, "Depth stream connected");
    }

    /// Continuity is lost on disconnect: the engine drops to uninitialized
    /// so later diffs buffer until the next recovery. The last known book
    /// stays readable.
    pub fn on_stream_disconnected(&mut self, reason: &str) {
        self.stream_connected = false;
        self.initialized = false;
        warn!(symbol = %self.symbol, reason, "Depth stream disconnected");
    }

    /// Clear all state. Every later mutation fails with `ShutDown`.
    pub fn shutdown(&mut self) {
        self.reset_book();
        self.buffer.clear();
        self.breaker.reset();
        self.last_update_ms = None;
        self.shut_down = true;
        info!(symbol = %self.symbol, "OrderBookEngine shut down");
    }

    // ── Checkpoints ─────────────────────────────────────────────────────

    pub fn save_checkpoint(&self, now_ms: i64) -> BookCheckpoint {
        BookCheckpoint::capture(
            self.symbol.clone(),
            self.last_update_id,
            self.tree.iter().cloned().collect(),
            now_ms,
        )
    }

    /// Rebuild the book from a verified checkpoint, then replay anything
    /// buffered. Prices are re-normalized to this engine's precision; levels
    /// that collapse onto the same tick keep the later level's volumes.
    pub fn restore_checkpoint(
        &mut self,
        checkpoint: &BookCheckpoint,
        now_ms: i64,
    ) -> Result<usize, DepthError> {
        if self.shut_down {
            return Err(DepthError::ShutDown);
        }
        checkpoint.verify()?;
        if checkpoint.symbol != self.symbol {
            return Err(DepthError::InvalidConfig(format!(
                "checkpoint for {} cannot restore {}",
                checkpoint.symbol, self.symbol
            )));
        }

        self.reset_book();
        for level in &checkpoint.levels {
            let Some(price) = self.normalizer.price(level.price.as_decimal()) else {
                warn!(symbol = %self.symbol, price = %level.price, "Skipping checkpoint level");
                continue;
            };
            for side in [Side::Bid, Side::Ask] {
                let volume = level.volume(side);
                if !volume.is_zero() {
                    self.tree.upsert(price, side, volume, level.last_update_ms);
                }
            }
        }
        self.refresh_best(true, true);
        self.last_update_id = checkpoint.last_update_id;
        self.last_update_ms = Some(now_ms);

        let (replayed, _) = self.replay_buffer(now_ms)?;
        self.initialized = true;
        self.check_crossed(now_ms);
        info!(
            symbol = %self.symbol,
            levels = self.tree.len(),
            last_update_id = ?self.last_update_id,
            replayed,
            "Order book restored from checkpoint"
        );
        Ok(self.tree.len())
    }

    #[cfg(test)]
    pub(crate) fn tree(&self) -> &PriceLevelTree {
        &self.tree
    }
}
