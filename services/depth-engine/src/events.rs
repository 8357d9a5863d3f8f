//! Wire definitions for the depth feed
//!
//! Mirrors the exchange payloads verbatim: prices and quantities stay as
//! strings until the normalizer turns them into tick-aligned keys. Field
//! aliases accept the single-letter names used by exchange diff streams
//! (`U`, `u`, `b`, `a`, `E`).

use serde::{Deserialize, Serialize};

/// A raw `(price, quantity)` pair as delivered by the exchange.
pub type RawLevel = (String, String);

/// Incremental depth diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthUpdate {
    /// First update id covered by this diff.
    #[serde(alias = "U")]
    pub first_update_id: u64,
    /// Last update id covered by this diff.
    #[serde(alias = "u")]
    pub final_update_id: u64,
    /// Changed bid levels; quantity "0" removes the bid at that price.
    #[serde(alias = "b", default)]
    pub bids: Vec<RawLevel>,
    /// Changed ask levels; quantity "0" removes the ask at that price.
    #[serde(alias = "a", default)]
    pub asks: Vec<RawLevel>,
    /// Exchange event time in Unix milliseconds, when provided.
    #[serde(alias = "E", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
}

impl DepthUpdate {
    /// Build a diff from string-slice pairs.
    pub fn from_pairs(
        first_update_id: u64,
        final_update_id: u64,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> Self {
        Self {
            first_update_id,
            final_update_id,
            bids: to_raw(bids),
            asks: to_raw(asks),
            event_time: None,
        }
    }

    /// Number of price/quantity pairs carried.
    pub fn pair_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Full depth snapshot returned by the snapshot source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Feed sequence the snapshot is consistent with.
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
}

impl DepthSnapshot {
    pub fn from_pairs(last_update_id: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Self {
        Self {
            last_update_id,
            bids: to_raw(bids),
            asks: to_raw(asks),
        }
    }

    /// A snapshot with no levels.
    pub fn empty(last_update_id: u64) -> Self {
        Self {
            last_update_id,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }
}

fn to_raw(pairs: &[(&str, &str)]) -> Vec<RawLevel> {
    pairs
        .iter()
        .map(|(p, q)| (p.to_string(), q.to_string()))
        .collect()
}
