//! Async service handle
//!
//! `DepthEngine` wraps one `OrderBookEngine` for concurrent use:
//!
//! - the book sits behind a `RwLock`: readers share, every mutation
//!   (diffs, maintenance, recovery) serializes on the write side
//! - `recover()` calls serialize on an async mutex and never hold the book
//!   lock across the snapshot fetch, so diffs arriving meanwhile buffer
//! - a maintenance task and a health watchdog run on their own intervals
//!   and are aborted by `shutdown()` before the book is cleared
//!
//! Background tasks hold only a `Weak` reference; dropping the last handle
//! stops them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::ids::MarketId;
use types::numeric::Price;

use crate::config::EngineConfig;
use crate::engine::{BandSum, DepthMetrics, OrderBookEngine, UpdateOutcome};
use crate::error::DepthError;
use crate::events::DepthUpdate;
use crate::health::{HealthReport, HealthStatus};
use crate::maintenance::MaintenanceReport;
use crate::metrics::EngineMetrics;
use crate::recovery::{fetch_with_timeout, RecoveryReport, SnapshotSource};
use crate::snapshot::BookCheckpoint;
use crate::tree::PriceLevel;

/// Wall clock anchored to the runtime's monotonic clock, so paused-time
/// tests advance it deterministically.
struct Clock {
    origin: Instant,
    epoch_ms: i64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            epoch_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }
}

struct Inner {
    symbol: MarketId,
    config: EngineConfig,
    book: RwLock<OrderBookEngine>,
    source: Arc<dyn SnapshotSource>,
    recovery_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
    clock: Clock,
    metrics: Arc<EngineMetrics>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, OrderBookEngine> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, OrderBookEngine> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Caller must hold `recovery_lock`.
    async fn recover_locked(&self) -> Result<RecoveryReport, DepthError> {
        if self.is_shut_down() {
            return Err(DepthError::ShutDown);
        }

        self.write().begin_recovery();

        let fetched = fetch_with_timeout(
            self.source.as_ref(),
            &self.symbol,
            self.config.snapshot_depth_limit,
            self.config.snapshot_timeout(),
        )
        .await;

        let now = self.clock.now_ms();
        let mut book = self.write();
        match fetched {
            Ok(snapshot) => book.complete_recovery(&snapshot, now),
            Err(e) => {
                let err = DepthError::from(e);
                book.record_recovery_failure(&err);
                Err(err)
            }
        }
    }

    async fn try_recover(&self) -> Result<RecoveryReport, DepthError> {
        let Ok(_guard) = self.recovery_lock.try_lock() else {
            return Err(DepthError::RecoveryInProgress);
        };
        self.recover_locked().await
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = std::mem::take(&mut *tasks);
        drop(tasks);
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

/// Shared, cloneable handle to a running depth engine.
#[derive(Clone)]
pub struct DepthEngine {
    inner: Arc<Inner>,
}

impl DepthEngine {
    /// Create the engine and start its maintenance and health tasks.
    ///
    /// The book starts uninitialized; the watchdog (or an explicit
    /// `recover()` / `on_stream_connected()`) seeds it from `source`.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(
        symbol: MarketId,
        config: EngineConfig,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Self, DepthError> {
        let metrics = Arc::new(EngineMetrics::new());
        let book =
            OrderBookEngine::with_metrics(symbol.clone(), config.clone(), Arc::clone(&metrics))?;

        let inner = Arc::new(Inner {
            symbol,
            book: RwLock::new(book),
            source,
            recovery_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            clock: Clock::new(),
            metrics,
            config,
        });

        let maintenance = spawn_maintenance(Arc::downgrade(&inner), inner.config.prune_interval());
        let watchdog = spawn_watchdog(Arc::downgrade(&inner), inner.config.health_check_interval());
        inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([maintenance, watchdog]);

        info!(
            symbol = %inner.symbol,
            prune_interval_ms = inner.config.prune_interval_ms,
            health_check_interval_ms = inner.config.health_check_interval_ms,
            "Depth engine started"
        );
        Ok(Self { inner })
    }

    /// Apply one diff. Never blocks on I/O.
    pub fn update_depth(&self, update: DepthUpdate) -> Result<UpdateOutcome, DepthError> {
        if self.inner.is_shut_down() {
            return Err(DepthError::ShutDown);
        }
        let now = self.inner.clock.now_ms();
        self.inner.write().update_depth(update, now)
    }

    /// Reset and re-seed the book from a fresh snapshot. Concurrent calls
    /// queue behind each other.
    pub async fn recover(&self) -> Result<RecoveryReport, DepthError> {
        let _guard = self.inner.recovery_lock.lock().await;
        self.inner.recover_locked().await
    }

    /// Like `recover()`, but fails with `RecoveryInProgress` instead of
    /// queueing.
    pub async fn try_recover(&self) -> Result<RecoveryReport, DepthError> {
        self.inner.try_recover().await
    }

    /// Mark the stream connected and start a recovery in the background.
    pub fn on_stream_connected(&self) -> JoinHandle<Result<RecoveryReport, DepthError>> {
        self.inner.write().on_stream_connected();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = inner.recovery_lock.lock().await;
            inner.recover_locked().await
        })
    }

    pub fn on_stream_disconnected(&self, reason: &str) {
        self.inner.write().on_stream_disconnected(reason);
    }

    /// Stop background tasks, then clear all state. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.abort_tasks();
        self.inner.write().shutdown();
        info!(symbol = %self.inner.symbol, "Depth engine stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Run one maintenance pass immediately.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = self.inner.clock.now_ms();
        self.inner.write().run_maintenance(now)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Run `f` against a consistent view of the book.
    pub fn with_book<R>(&self, f: impl FnOnce(&OrderBookEngine) -> R) -> R {
        let book = self.inner.read();
        f(&*book)
    }

    pub fn best_bid(&self) -> Decimal {
        self.inner.read().best_bid()
    }

    pub fn best_ask(&self) -> Decimal {
        self.inner.read().best_ask()
    }

    pub fn spread(&self) -> Decimal {
        self.inner.read().spread()
    }

    pub fn mid_price(&self) -> Decimal {
        self.inner.read().mid_price()
    }

    pub fn sum_band(&self, center: Decimal, band_ticks: u32, tick_size: Decimal) -> BandSum {
        self.inner.read().sum_band(center, band_ticks, tick_size)
    }

    pub fn level(&self, price: Decimal) -> Option<PriceLevel> {
        self.inner.read().level(price)
    }

    pub fn snapshot(&self) -> BTreeMap<Price, PriceLevel> {
        self.inner.read().snapshot()
    }

    pub fn depth_metrics(&self) -> DepthMetrics {
        self.inner.read().depth_metrics()
    }

    pub fn health(&self) -> HealthReport {
        let now = self.inner.clock.now_ms();
        self.inner.read().health(now)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_initialized()
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.inner.read().last_update_id()
    }

    pub fn symbol(&self) -> &MarketId {
        &self.inner.symbol
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    // ── Checkpoints ─────────────────────────────────────────────────────

    pub fn save_checkpoint(&self) -> BookCheckpoint {
        let now = self.inner.clock.now_ms();
        self.inner.read().save_checkpoint(now)
    }

    pub fn restore_checkpoint(&self, checkpoint: &BookCheckpoint) -> Result<usize, DepthError> {
        if self.inner.is_shut_down() {
            return Err(DepthError::ShutDown);
        }
        let now = self.inner.clock.now_ms();
        self.inner.write().restore_checkpoint(checkpoint, now)
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // First tick fires one full period after start.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn spawn_maintenance(weak: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.is_shut_down() {
                break;
            }
            let now = inner.clock.now_ms();
            let report = inner.write().run_maintenance(now);
            if report.total_removed() > 0 {
                debug!(
                    symbol = %inner.symbol,
                    removed = report.total_removed(),
                    levels = report.levels_remaining,
                    "Scheduled maintenance pruned levels"
                );
            }
        }
    })
}

fn spawn_watchdog(weak: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        let mut last_status = HealthStatus::Healthy;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.is_shut_down() {
                break;
            }

            let now = inner.clock.now_ms();
            let silence_ms = inner.config.silence_recovery_ms as i64;
            let (report, needs_recovery) = {
                let mut book = inner.write();
                book.poll_circuit(now);
                let report = book.health(now);
                let silent = book.is_initialized()
                    && report.last_update_age_ms.is_some_and(|age| age >= silence_ms);
                let needs_recovery = book.is_stream_connected()
                    && (!book.is_initialized() || silent || book.ensure_uncrossed().is_err());
                (report, needs_recovery)
            };

            if report.status != last_status {
                match report.status {
                    HealthStatus::Healthy => info!(symbol = %inner.symbol, "Depth engine healthy"),
                    _ => warn!(
                        symbol = %inner.symbol,
                        status = report.status.as_str(),
                        reasons = ?report.reasons,
                        "Depth engine health changed"
                    ),
                }
                last_status = report.status;
            }

            if needs_recovery {
                match inner.try_recover().await {
                    Ok(r) => info!(
                        symbol = %inner.symbol,
                        last_update_id = r.last_update_id,
                        "Watchdog recovery complete"
                    ),
                    Err(DepthError::RecoveryInProgress) => {
                        debug!(symbol = %inner.symbol, "Recovery already running")
                    }
                    Err(e) => warn!(symbol = %inner.symbol, error = %e, "Watchdog recovery failed"),
                }
            }
        }
    })
}
