//! Price and quantity normalization
//!
//! Every raw pair is converted to a tick-aligned [`Price`] key and a
//! precision-bounded [`Quantity`] before it touches the tree. Two strings
//! that round to the same tick address the same level.

use rust_decimal::Decimal;
use types::numeric::{Price, Quantity};
use types::side::Side;

use crate::error::DepthError;
use crate::events::RawLevel;

/// Converts raw feed strings to normalized book keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceNormalizer {
    price_precision: u32,
    quantity_precision: u32,
}

impl PriceNormalizer {
    pub fn new(price_precision: u32, quantity_precision: u32) -> Self {
        Self {
            price_precision,
            quantity_precision,
        }
    }

    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }

    /// Normalize a raw decimal price.
    pub fn price(&self, raw: Decimal) -> Option<Price> {
        Price::normalize(raw, self.price_precision).ok()
    }

    /// Normalize one raw pair from side `side`.
    pub fn pair(&self, side: Side, raw: &RawLevel) -> Result<(Price, Quantity), DepthError> {
        let (raw_price, raw_qty) = raw;
        let fail = |reason: String| DepthError::Normalization {
            side,
            price: raw_price.clone(),
            quantity: raw_qty.clone(),
            reason,
        };

        let price = Price::parse(raw_price, self.price_precision).map_err(|e| fail(e.to_string()))?;
        let quantity =
            Quantity::parse(raw_qty, self.quantity_precision).map_err(|e| fail(e.to_string()))?;
        Ok((price, quantity))
    }
}
