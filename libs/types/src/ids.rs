//! Identifier types for market entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Market identifier (exchange symbol)
///
/// Accepts both exchange-native symbols ("BTCUSDT") and pair notation
/// ("BTC/USDT"). Must be non-empty and contain no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    /// Create a new MarketId
    ///
    /// # Panics
    /// Panics if the symbol is empty or contains whitespace
    pub fn new(symbol: impl Into<String>) -> Self {
        let s = symbol.into();
        assert!(Self::is_valid(&s), "MarketId must be a non-empty symbol without whitespace");
        Self(s)
    }

    /// Try to create a MarketId, returning None if invalid
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol in lowercase, as used by exchange stream names.
    pub fn stream_name(&self) -> String {
        self.0.replace('/', "").to_lowercase()
    }

    fn is_valid(s: &str) -> bool {
        !s.is_empty() && !s.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_id_creation() {
        let market = MarketId::new("BTCUSDT");
        assert_eq!(market.as_str(), "BTCUSDT");
        assert_eq!(market.stream_name(), "btcusdt");

        let pair = MarketId::new("ETH/USDC");
        assert_eq!(pair.stream_name(), "ethusdc");
    }

    #[test]
    fn test_market_id_try_new() {
        assert!(MarketId::try_new("BTCUSDT").is_some());
        assert!(MarketId::try_new("").is_none());
        assert!(MarketId::try_new("BTC USDT").is_none());
    }

    #[test]
    #[should_panic(expected = "MarketId must be a non-empty symbol")]
    fn test_market_id_invalid_format() {
        MarketId::new("");
    }

    #[test]
    fn test_market_id_serialization() {
        let market = MarketId::new("ETHUSDC");
        let json = serde_json::to_string(&market).unwrap();
        assert_eq!(json, "\"ETHUSDC\"");

        let deserialized: MarketId = serde_json::from_str(&json).unwrap();
        assert_eq!(market, deserialized);
    }
}
