//! Error-rate circuit breaker
//!
//! Keeps a sliding window of error timestamps. When the number of errors in
//! the window reaches `max_errors` the breaker opens for a fixed cooldown;
//! once the cooldown has elapsed the next poll closes it and clears the
//! window. There is no half-open probing state.

use std::collections::VecDeque;

use tracing::{info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until_ms: i64 },
}

/// Result of recording an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Error counted; breaker still closed.
    Counted,
    /// This error tripped the breaker.
    Tripped { until_ms: i64 },
    /// Breaker already open; error ignored.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    errors: VecDeque<i64>,
    window_ms: i64,
    max_errors: usize,
    cooldown_ms: i64,
    open_until: Option<i64>,
    times_opened: u64,
}

impl CircuitBreaker {
    pub fn new(max_errors: usize, window_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            errors: VecDeque::with_capacity(max_errors),
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            max_errors: max_errors.max(1),
            cooldown_ms: i64::try_from(cooldown_ms).unwrap_or(i64::MAX),
            open_until: None,
            times_opened: 0,
        }
    }

    /// Record a processing error at `now_ms`.
    pub fn record_error(&mut self, now_ms: i64) -> ErrorVerdict {
        if self.poll(now_ms) {
            return ErrorVerdict::Ignored;
        }

        self.errors.push_back(now_ms);
        self.prune(now_ms);

        if self.errors.len() >= self.max_errors {
            let until_ms = now_ms.saturating_add(self.cooldown_ms);
            self.open_until = Some(until_ms);
            self.times_opened += 1;
            warn!(
                errors = self.errors.len(),
                window_ms = self.window_ms,
                cooldown_ms = self.cooldown_ms,
                "Circuit breaker opened"
            );
            return ErrorVerdict::Tripped { until_ms };
        }
        ErrorVerdict::Counted
    }

    /// Whether the breaker is open at `now_ms`, closing it (and clearing the
    /// window) if the cooldown has elapsed.
    pub fn poll(&mut self, now_ms: i64) -> bool {
        match self.open_until {
            Some(until) if now_ms >= until => {
                self.open_until = None;
                self.errors.clear();
                info!("Circuit breaker closed after cooldown");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Non-mutating view of whether the breaker is open at `now_ms`.
    pub fn is_open_at(&self, now_ms: i64) -> bool {
        matches!(self.open_until, Some(until) if now_ms < until)
    }

    pub fn state(&self, now_ms: i64) -> CircuitState {
        match self.open_until {
            Some(until_ms) if now_ms < until_ms => CircuitState::Open { until_ms },
            _ => CircuitState::Closed,
        }
    }

    /// Errors inside the window ending at `now_ms`.
    pub fn error_count(&self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.errors.iter().filter(|&&t| t > cutoff).count()
    }

    pub fn open_until(&self) -> Option<i64> {
        self.open_until
    }

    pub fn times_opened(&self) -> u64 {
        self.times_opened
    }

    pub fn reset(&mut self) {
        self.errors.clear();
        self.open_until = None;
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while matches!(self.errors.front(), Some(&t) if t <= cutoff) {
            self.errors.pop_front();
        }
    }
}
