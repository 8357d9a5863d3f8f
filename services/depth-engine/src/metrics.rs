//! Observability counters for the depth engine
//!
//! Lock-free counters plus a bounded latency tracker, exported as a sorted
//! map for Prometheus-style exposition. Sinks are out of scope; callers
//! scrape `export()` or evaluate `check_thresholds()`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for one order book engine.
pub struct EngineMetrics {
    // Update path
    pub updates_applied: AtomicU64,
    pub updates_buffered: AtomicU64,
    pub updates_dropped_stale: AtomicU64,
    pub updates_rejected_circuit: AtomicU64,
    pub buffer_overflows: AtomicU64,
    pub update_apply_ns: Mutex<LatencyTracker>,

    // Errors
    pub sequence_gaps: AtomicU64,
    pub normalization_errors: AtomicU64,
    pub crossed_books: AtomicU64,
    pub circuit_opens: AtomicU64,

    // Recovery
    pub recoveries: AtomicU64,
    pub recovery_failures: AtomicU64,

    // Maintenance
    pub levels_pruned_stale: AtomicU64,
    pub levels_pruned_distance: AtomicU64,
    pub levels_evicted: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            updates_applied: AtomicU64::new(0),
            updates_buffered: AtomicU64::new(0),
            updates_dropped_stale: AtomicU64::new(0),
            updates_rejected_circuit: AtomicU64::new(0),
            buffer_overflows: AtomicU64::new(0),
            update_apply_ns: Mutex::new(LatencyTracker::new(1000)),
            sequence_gaps: AtomicU64::new(0),
            normalization_errors: AtomicU64::new(0),
            crossed_books: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            recovery_failures: AtomicU64::new(0),
            levels_pruned_stale: AtomicU64::new(0),
            levels_pruned_distance: AtomicU64::new(0),
            levels_evicted: AtomicU64::new(0),
        }
    }

    /// Record an applied diff and how long it took.
    pub fn record_applied(&self, latency_ns: u64) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.update_apply_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_buffered(&self) {
        self.updates_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_drop(&self) {
        self.updates_dropped_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.updates_rejected_circuit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffer_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_normalization_error(&self) {
        self.normalization_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crossed_book(&self) {
        self.crossed_books.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open(&self) {
        self.circuit_opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recovery attempt outcome.
    pub fn record_recovery(&self, succeeded: bool) {
        if succeeded {
            self.recoveries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recovery_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the level counts removed by one maintenance pass.
    pub fn record_maintenance(&self, stale: u64, distance: u64, evicted: u64) {
        self.levels_pruned_stale.fetch_add(stale, Ordering::Relaxed);
        self.levels_pruned_distance.fetch_add(distance, Ordering::Relaxed);
        self.levels_evicted.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let gaps = self.sequence_gaps.load(Ordering::Relaxed);
        if gaps > thresholds.max_sequence_gaps {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "sequence_gaps".to_string(),
                message: format!(
                    "Sequence gaps: {} > threshold {}",
                    gaps, thresholds.max_sequence_gaps
                ),
            });
        }

        let crossed = self.crossed_books.load(Ordering::Relaxed);
        if crossed > thresholds.max_crossed_books {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "crossed_books".to_string(),
                message: format!(
                    "Crossed books: {} > threshold {}",
                    crossed, thresholds.max_crossed_books
                ),
            });
        }

        let opens = self.circuit_opens.load(Ordering::Relaxed);
        if opens > thresholds.max_circuit_opens {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "circuit_opens".to_string(),
                message: format!(
                    "Circuit opens: {} > threshold {}",
                    opens, thresholds.max_circuit_opens
                ),
            });
        }

        if let Ok(tracker) = self.update_apply_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_update_apply_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "update_apply_p99".to_string(),
                        message: format!(
                            "Update apply p99: {}ns > threshold {}ns",
                            p99, thresholds.max_update_apply_p99_ns
                        ),
                    });
                }
            }
        }

        alerts
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("updates_applied", &self.updates_applied),
            ("updates_buffered", &self.updates_buffered),
            ("updates_dropped_stale", &self.updates_dropped_stale),
            ("updates_rejected_circuit", &self.updates_rejected_circuit),
            ("buffer_overflows", &self.buffer_overflows),
            ("sequence_gaps", &self.sequence_gaps),
            ("normalization_errors", &self.normalization_errors),
            ("crossed_books", &self.crossed_books),
            ("circuit_opens", &self.circuit_opens),
            ("recoveries", &self.recoveries),
            ("recovery_failures", &self.recovery_failures),
            ("levels_pruned_stale", &self.levels_pruned_stale),
            ("levels_pruned_distance", &self.levels_pruned_distance),
            ("levels_evicted", &self.levels_evicted),
        ];
        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect();
        if let Ok(tracker) = self.update_apply_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("update_apply_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("update_apply_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling window of the most recent latency samples, in nanoseconds.
pub struct LatencyTracker {
    window: VecDeque<u64>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest once the window is full.
    pub fn record(&mut self, sample_ns: u64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample_ns);
    }

    /// Nearest-rank percentile, `p` clamped to 0..=100.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        let n = self.window.len();
        if n == 0 {
            return None;
        }
        let rank = (p.min(100) * n).div_ceil(100).max(1);
        let mut scratch: Vec<u64> = self.window.iter().copied().collect();
        let (_, value, _) = scratch.select_nth_unstable(rank - 1);
        Some(*value)
    }

    pub fn average(&self) -> Option<u64> {
        let n = self.window.len() as u128;
        if n == 0 {
            return None;
        }
        let total: u128 = self.window.iter().map(|&v| v as u128).sum();
        Some((total / n) as u64)
    }

    pub fn max(&self) -> Option<u64> {
        self.window.iter().copied().max()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_sequence_gaps: u64,
    pub max_crossed_books: u64,
    pub max_circuit_opens: u64,
    /// Max diff apply p99 latency in nanoseconds.
    pub max_update_apply_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_sequence_gaps: 5,
            max_crossed_books: 0,
            max_circuit_opens: 0,
            max_update_apply_p99_ns: 100_000, // 100µs
        }
    }
}
