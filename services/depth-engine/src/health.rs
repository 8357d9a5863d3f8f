//! Engine health classification
//!
//! Health degrades before it fails: stale-ish data or a rising error count
//! report `Degraded` so consumers can pause gracefully, while conditions
//! that make the book untrustworthy report `Unhealthy`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Point-in-time health of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub initialized: bool,
    /// Milliseconds since the last applied diff; `None` before the first one.
    pub last_update_age_ms: Option<i64>,
    pub circuit_open: bool,
    /// Errors inside the circuit breaker window.
    pub error_count: usize,
    pub book_size: usize,
    pub spread: Decimal,
    pub mid_price: Decimal,
    pub stream_connected: bool,
    pub crossed: bool,
    /// Human-readable causes of a non-healthy status.
    pub reasons: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Raw observations the status is derived from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthInputs {
    pub initialized: bool,
    pub last_update_age_ms: Option<i64>,
    pub circuit_open: bool,
    pub error_count: usize,
    pub stream_connected: bool,
    pub crossed: bool,
}

/// Classify `inputs` against the configured thresholds, returning the status
/// and the reasons that produced it.
pub(crate) fn classify(
    inputs: &HealthInputs,
    config: &EngineConfig,
) -> (HealthStatus, Vec<String>) {
    let mut unhealthy = Vec::new();
    if !inputs.initialized {
        unhealthy.push("not initialized".to_string());
    }
    if inputs.circuit_open {
        unhealthy.push("circuit breaker open".to_string());
    }
    if inputs.crossed {
        unhealthy.push("book crossed".to_string());
    }
    if !inputs.stream_connected {
        unhealthy.push("stream disconnected".to_string());
    }
    if let Some(age) = inputs.last_update_age_ms {
        if age >= config.silence_recovery_ms as i64 {
            unhealthy.push(format!("no update for {age}ms"));
        }
    }
    if !unhealthy.is_empty() {
        return (HealthStatus::Unhealthy, unhealthy);
    }

    let mut degraded = Vec::new();
    if let Some(age) = inputs.last_update_age_ms {
        if age >= config.degraded_update_age_ms as i64 {
            degraded.push(format!("last update {age}ms ago"));
        }
    }
    // Half the trip threshold, rounded up.
    let error_threshold = config.max_error_rate.div_ceil(2);
    if inputs.error_count >= error_threshold {
        degraded.push(format!(
            "{} errors in window (threshold {})",
            inputs.error_count, config.max_error_rate
        ));
    }
    if !degraded.is_empty() {
        return (HealthStatus::Degraded, degraded);
    }

    (HealthStatus::Healthy, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> HealthInputs {
        HealthInputs {
            initialized: true,
            last_update_age_ms: Some(100),
            circuit_open: false,
            error_count: 0,
            stream_connected: true,
            crossed: false,
        }
    }

    #[test]
    fn test_healthy() {
        let (status, reasons) = classify(&nominal(), &EngineConfig::default());
        assert_eq!(status, HealthStatus::Healthy);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_degraded_by_age_then_unhealthy() {
        let config = EngineConfig::default();
        let inputs = HealthInputs {
            last_update_age_ms: Some(15_000),
            ..nominal()
        };
        assert_eq!(classify(&inputs, &config).0, HealthStatus::Degraded);

        let inputs = HealthInputs {
            last_update_age_ms: Some(60_000),
            ..nominal()
        };
        assert_eq!(classify(&inputs, &config).0, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_degraded_by_error_count() {
        let config = EngineConfig::default();
        let inputs = HealthInputs {
            error_count: 4,
            ..nominal()
        };
        assert_eq!(classify(&inputs, &config).0, HealthStatus::Healthy);
        let inputs = HealthInputs {
            error_count: 5,
            ..nominal()
        };
        assert_eq!(classify(&inputs, &config).0, HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_conditions() {
        let config = EngineConfig::default();
        for inputs in [
            HealthInputs { initialized: false, ..nominal() },
            HealthInputs { circuit_open: true, ..nominal() },
            HealthInputs { crossed: true, ..nominal() },
            HealthInputs { stream_connected: false, ..nominal() },
        ] {
            let (status, reasons) = classify(&inputs, &config);
            assert_eq!(status, HealthStatus::Unhealthy);
            assert_eq!(reasons.len(), 1);
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert!(HealthStatus::Healthy < HealthStatus::Unhealthy);
    }
}
