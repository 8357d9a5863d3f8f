//! Book checkpoints
//!
//! The only persistence surface: a serializable, checksummed copy of the
//! book that a caller can store anywhere and later hand back to
//! `OrderBookEngine::restore_checkpoint`. No file I/O happens here.

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use tracing::error;
use types::ids::MarketId;

use crate::error::DepthError;
use crate::tree::PriceLevel;

/// A checksummed copy of one engine's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCheckpoint {
    pub symbol: MarketId,
    /// Sequence cursor at capture time.
    pub last_update_id: Option<u64>,
    /// Levels in ascending price order.
    pub levels: Vec<PriceLevel>,
    /// Unix milliseconds when the checkpoint was taken.
    pub taken_at_ms: i64,
    /// SHA-256 over symbol, sequence and levels.
    pub checksum: String,
}

impl BookCheckpoint {
    /// Build a checkpoint, computing its checksum.
    pub fn capture(
        symbol: MarketId,
        last_update_id: Option<u64>,
        levels: Vec<PriceLevel>,
        taken_at_ms: i64,
    ) -> Self {
        let checksum = compute_checksum(&symbol, last_update_id, &levels);
        Self {
            symbol,
            last_update_id,
            levels,
            taken_at_ms,
            checksum,
        }
    }

    /// Fail with `ChecksumMismatch` if the content no longer matches the
    /// stored checksum.
    pub fn verify(&self) -> Result<(), DepthError> {
        let actual = compute_checksum(&self.symbol, self.last_update_id, &self.levels);
        if actual != self.checksum {
            error!(
                symbol = %self.symbol,
                expected = %self.checksum,
                actual = %actual,
                "Checkpoint checksum mismatch"
            );
            return Err(DepthError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Compute a SHA-256 checksum over the symbol, sequence cursor and levels.
///
/// Levels must be supplied in ascending price order for the result to be
/// deterministic; timestamps are excluded so that two books with identical
/// depth hash identically.
pub fn compute_checksum<'a, I>(symbol: &MarketId, last_update_id: Option<u64>, levels: I) -> String
where
    I: IntoIterator<Item = &'a PriceLevel>,
{
    let mut hasher = Sha256::new();

    hasher.update(symbol.as_str().as_bytes());
    hasher.update(b"---");

    for level in levels {
        hasher.update(level.price.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.bid.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.ask.to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    match last_update_id {
        Some(id) => {
            hasher.update([1u8]);
            hasher.update(id.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::numeric::{Price, Quantity};

    fn level(price: &str, bid: &str, ask: &str) -> PriceLevel {
        PriceLevel {
            price: Price::parse(price, 2).unwrap(),
            bid: Quantity::parse(bid, 8).unwrap(),
            ask: Quantity::parse(ask, 8).unwrap(),
            last_update_ms: 1,
        }
    }

    fn checkpoint() -> BookCheckpoint {
        BookCheckpoint::capture(
            MarketId::new("BTCUSDT"),
            Some(42),
            vec![level("49.00", "100", "0"), level("51.00", "0", "150")],
            1_708_123_456_789,
        )
    }

    #[test]
    fn test_checksum_deterministic() {
        let a = checkpoint();
        let b = checkpoint();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64); // SHA-256 hex
        assert!(a.verify().is_ok());
    }

    #[test]
    fn test_checksum_ignores_timestamps() {
        let a = checkpoint();
        let mut levels = a.levels.clone();
        levels[0].last_update_ms = 999;
        assert_eq!(
            compute_checksum(&a.symbol, a.last_update_id, &levels),
            a.checksum
        );
    }

    #[test]
    fn test_checksum_covers_sequence_and_symbol() {
        let a = checkpoint();
        assert_ne!(compute_checksum(&a.symbol, Some(43), &a.levels), a.checksum);
        assert_ne!(compute_checksum(&a.symbol, None, &a.levels), a.checksum);
        assert_ne!(
            compute_checksum(&MarketId::new("ETHUSDT"), a.last_update_id, &a.levels),
            a.checksum
        );
    }

    #[test]
    fn test_tamper_detected() {
        let mut cp = checkpoint();
        cp.levels[1].ask = Quantity::parse("151", 8).unwrap();
        assert!(matches!(cp.verify(), Err(DepthError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_serde_roundtrip_preserves_checksum() {
        let cp = checkpoint();
        let json = serde_json::to_string(&cp).unwrap();
        let back: BookCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
        assert!(back.verify().is_ok());
    }
}
