//! Engine configuration
//!
//! Field names follow the camelCase option names used by the upstream
//! deployment descriptors, so a JSON document such as
//! `{"pricePrecision": 2, "maxLevels": 500}` deserializes directly. Every
//! field has a default; environment variables named
//! `DEPTH_ENGINE_<SCREAMING_SNAKE_FIELD>` override individual values.

use std::time::Duration;

use config::{Config, Environment};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DepthError;

/// Prefix of environment overrides (`DEPTH_ENGINE_MAX_LEVELS=250`).
pub const ENV_PREFIX: &str = "DEPTH_ENGINE";

/// Configuration for one order book engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Decimal places of normalized price keys.
    pub price_precision: u32,
    /// Decimal places kept for quantities.
    pub quantity_precision: u32,
    /// Maximum number of active levels before eviction.
    pub max_levels: usize,
    /// Fraction of mid-price beyond which levels are pruned.
    pub max_price_distance: Decimal,
    /// Maintenance timer period.
    pub prune_interval_ms: u64,
    /// Age after which zero-volume levels are pruned.
    pub stale_threshold_ms: u64,
    /// Errors within the window that open the circuit breaker.
    pub max_error_rate: usize,
    /// Circuit breaker sliding window.
    pub error_window_ms: u64,
    /// How long the breaker stays open.
    pub circuit_cooldown_ms: u64,
    /// Health watchdog period.
    pub health_check_interval_ms: u64,
    /// Update silence after which the watchdog triggers recovery.
    pub silence_recovery_ms: u64,
    /// Update age at which health is reported as degraded.
    pub degraded_update_age_ms: u64,
    /// Depth requested from the snapshot source.
    pub snapshot_depth_limit: u32,
    /// Upper bound on a single snapshot fetch.
    pub snapshot_timeout_ms: u64,
    /// Capacity of the pre-initialization buffer; oldest diffs are dropped beyond it.
    pub max_buffered_updates: usize,
    /// Skip gap/stale checks (offline or backtest replay).
    pub disable_sequence_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            price_precision: 2,
            quantity_precision: 8,
            max_levels: 1000,
            max_price_distance: Decimal::new(10, 2),
            prune_interval_ms: 30_000,
            stale_threshold_ms: 300_000,
            max_error_rate: 10,
            error_window_ms: 60_000,
            circuit_cooldown_ms: 30_000,
            health_check_interval_ms: 10_000,
            silence_recovery_ms: 60_000,
            degraded_update_age_ms: 15_000,
            snapshot_depth_limit: 1000,
            snapshot_timeout_ms: 10_000,
            max_buffered_updates: 10_000,
            disable_sequence_validation: false,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, DepthError> {
        let config: Self = serde_json::from_str(json).map_err(invalid)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DEPTH_ENGINE_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, DepthError> {
        self.with_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Layer an environment source over `self`.
    ///
    /// The source yields lowercase snake_case keys (`max_levels`), which are
    /// matched against the camelCase field names. Values are typed by the
    /// field they replace; unknown keys are ignored with a warning.
    pub fn with_environment(self, env: Environment) -> Result<Self, DepthError> {
        let overrides: config::Map<String, String> = Config::builder()
            .add_source(env.prefix_separator("_"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(invalid)?;
        if overrides.is_empty() {
            return Ok(self);
        }

        let mut layered = serde_json::to_value(&self).map_err(invalid)?;
        if let Some(fields) = layered.as_object_mut() {
            for (key, raw) in overrides {
                match fields.get_mut(&camel_case(&key)) {
                    Some(slot) => {
                        debug!(key = %key, value = %raw, "Applying config override");
                        *slot = typed_like(slot, raw);
                    }
                    None => warn!(key = %key, "Ignoring unknown config override"),
                }
            }
        }

        let config: Self = serde_json::from_value(layered).map_err(invalid)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), DepthError> {
        if self.price_precision > 16 {
            return Err(DepthError::InvalidConfig(format!(
                "pricePrecision {} exceeds 16",
                self.price_precision
            )));
        }
        if self.quantity_precision > 16 {
            return Err(DepthError::InvalidConfig(format!(
                "quantityPrecision {} exceeds 16",
                self.quantity_precision
            )));
        }
        if self.max_levels == 0 {
            return Err(DepthError::InvalidConfig("maxLevels must be > 0".into()));
        }
        if self.max_price_distance <= Decimal::ZERO || self.max_price_distance > Decimal::ONE {
            return Err(DepthError::InvalidConfig(format!(
                "maxPriceDistance {} must be in (0, 1]",
                self.max_price_distance
            )));
        }
        if self.max_error_rate == 0 {
            return Err(DepthError::InvalidConfig("maxErrorRate must be > 0".into()));
        }
        for (name, value) in [
            ("pruneIntervalMs", self.prune_interval_ms),
            ("errorWindowMs", self.error_window_ms),
            ("healthCheckIntervalMs", self.health_check_interval_ms),
            ("snapshotTimeoutMs", self.snapshot_timeout_ms),
        ] {
            if value == 0 {
                return Err(DepthError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        // Durations are compared against signed Unix-millisecond clocks.
        for (name, value) in [
            ("pruneIntervalMs", self.prune_interval_ms),
            ("staleThresholdMs", self.stale_threshold_ms),
            ("errorWindowMs", self.error_window_ms),
            ("circuitCooldownMs", self.circuit_cooldown_ms),
            ("healthCheckIntervalMs", self.health_check_interval_ms),
            ("silenceRecoveryMs", self.silence_recovery_ms),
            ("degradedUpdateAgeMs", self.degraded_update_age_ms),
            ("snapshotTimeoutMs", self.snapshot_timeout_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(DepthError::InvalidConfig(format!(
                    "{name} {value} exceeds {MAX_DURATION_MS}"
                )));
            }
        }
        if self.max_buffered_updates == 0 {
            return Err(DepthError::InvalidConfig(
                "maxBufferedUpdates must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Smallest price increment implied by `price_precision`.
    pub fn tick_size(&self) -> Decimal {
        Decimal::new(1, self.price_precision)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// Largest accepted millisecond duration.
pub const MAX_DURATION_MS: u64 = i64::MAX as u64;

fn invalid(e: impl std::fmt::Display) -> DepthError {
    DepthError::InvalidConfig(e.to_string())
}

/// `max_price_distance` -> `maxPriceDistance`.
fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, word) in key.to_ascii_lowercase().split('_').enumerate() {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) if i > 0 => {
                out.push(first.to_ascii_uppercase());
                out.extend(chars);
            }
            Some(first) => {
                out.push(first);
                out.extend(chars);
            }
            None => {}
        }
    }
    out
}

/// Decimals serialize as strings and stay strings; numbers and booleans are
/// parsed so a bad value fails deserialization instead of being coerced.
fn typed_like(current: &Value, raw: String) -> Value {
    if current.is_string() {
        return Value::String(raw);
    }
    serde_json::from_str(raw.trim()).unwrap_or(Value::String(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_error_rate, 10);
        assert_eq!(config.error_window_ms, 60_000);
        assert_eq!(config.circuit_cooldown_ms, 30_000);
        assert_eq!(config.tick_size(), dec!(0.01));
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EngineConfig::from_json_str(r#"{"pricePrecision": 4, "maxLevels": 50}"#).unwrap();
        assert_eq!(config.price_precision, 4);
        assert_eq!(config.max_levels, 50);
        assert_eq!(config.prune_interval_ms, 30_000);
        assert_eq!(config.tick_size(), dec!(0.0001));
    }

    #[test]
    fn test_from_json_distance_as_string() {
        let config = EngineConfig::from_json_str(r#"{"maxPriceDistance": "0.05"}"#).unwrap();
        assert_eq!(config.max_price_distance, dec!(0.05));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"maxLevels": 0}"#),
            Err(DepthError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str("not json"),
            Err(DepthError::InvalidConfig(_))
        ));
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_environment(env(&[
                ("DEPTH_ENGINE_MAX_LEVELS", "250"),
                ("DEPTH_ENGINE_DISABLE_SEQUENCE_VALIDATION", "true"),
                ("DEPTH_ENGINE_MAX_PRICE_DISTANCE", "0.2"),
                ("OTHER_MAX_LEVELS", "7"),
            ]))
            .unwrap();
        assert_eq!(config.max_levels, 250);
        assert!(config.disable_sequence_validation);
        assert_eq!(config.max_price_distance, dec!(0.2));
        assert_eq!(config.prune_interval_ms, 30_000);
    }

    #[test]
    fn test_env_overrides_layer_on_json() {
        let base =
            EngineConfig::from_json_str(r#"{"pricePrecision": 4, "maxLevels": 50}"#).unwrap();
        let config = base
            .with_environment(env(&[("DEPTH_ENGINE_PRUNE_INTERVAL_MS", "5000")]))
            .unwrap();
        assert_eq!(config.price_precision, 4);
        assert_eq!(config.max_levels, 50);
        assert_eq!(config.prune_interval_ms, 5_000);
    }

    #[test]
    fn test_env_override_parse_error() {
        let result =
            EngineConfig::default().with_environment(env(&[("DEPTH_ENGINE_MAX_LEVELS", "many")]));
        assert!(matches!(result, Err(DepthError::InvalidConfig(_))));

        let result =
            EngineConfig::default().with_environment(env(&[("DEPTH_ENGINE_MAX_LEVELS", "0")]));
        assert!(matches!(result, Err(DepthError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_env_key_ignored() {
        let config = EngineConfig::default()
            .with_environment(env(&[("DEPTH_ENGINE_COLOUR", "blue")]))
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("max_price_distance"), "maxPriceDistance");
        assert_eq!(camel_case("MAX_LEVELS"), "maxLevels");
        assert_eq!(camel_case("disable_sequence_validation"), "disableSequenceValidation");
    }

    #[test]
    fn test_durations_must_fit_signed_clock() {
        let config = EngineConfig {
            circuit_cooldown_ms: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(DepthError::InvalidConfig(_))));

        let config = EngineConfig {
            error_window_ms: MAX_DURATION_MS,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_distance_bounds() {
        let config = EngineConfig {
            max_price_distance: dec!(1.5),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
