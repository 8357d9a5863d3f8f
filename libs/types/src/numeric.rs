//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Prices are rounded to the configured tick precision with banker's rounding
//! (round-half-to-even) before they are used as book keys, so two raw strings
//! that denote the same tick always map to the same key.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::NumericError;

/// Largest scale rust_decimal can represent.
pub const MAX_PRECISION: u32 = 28;

/// Parse a decimal string as delivered by exchange feeds.
///
/// Plain notation is tried first; scientific notation ("1e-5") is accepted
/// as a fallback.
pub fn parse_decimal(raw: &str) -> Result<Decimal, NumericError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NumericError::Empty);
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| NumericError::InvalidDecimal {
            value: trimmed.to_string(),
            reason: e.to_string(),
        })
}

/// Round `value` to `precision` decimal places, half-to-even.
///
/// The result always carries exactly `precision` digits of scale so its
/// string form is canonical.
pub fn round_to_precision(value: Decimal, precision: u32) -> Result<Decimal, NumericError> {
    if precision > MAX_PRECISION {
        return Err(NumericError::UnsupportedPrecision(precision));
    }
    let mut rounded =
        value.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(precision);
    Ok(rounded)
}

pub fn safe_add(a: Decimal, b: Decimal) -> Result<Decimal, NumericError> {
    a.checked_add(b).ok_or(NumericError::Overflow { op: "add" })
}

pub fn safe_sub(a: Decimal, b: Decimal) -> Result<Decimal, NumericError> {
    a.checked_sub(b).ok_or(NumericError::Overflow { op: "sub" })
}

pub fn safe_mul(a: Decimal, b: Decimal) -> Result<Decimal, NumericError> {
    a.checked_mul(b).ok_or(NumericError::Overflow { op: "mul" })
}

pub fn safe_div(a: Decimal, b: Decimal) -> Result<Decimal, NumericError> {
    if b.is_zero() {
        return Err(NumericError::DivisionByZero);
    }
    a.checked_div(b).ok_or(NumericError::Overflow { op: "div" })
}

/// A normalized, strictly positive price.
///
/// Construct through [`Price::normalize`] or [`Price::parse`] so the value is
/// always a multiple of the tick for the precision it was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Round a raw decimal to `precision` places and wrap it.
    pub fn normalize(raw: Decimal, precision: u32) -> Result<Self, NumericError> {
        let rounded = round_to_precision(raw, precision)?;
        if rounded <= Decimal::ZERO {
            return Err(NumericError::NonPositivePrice(raw.to_string()));
        }
        Ok(Self(rounded))
    }

    /// Parse and normalize a price string.
    pub fn parse(raw: &str, precision: u32) -> Result<Self, NumericError> {
        Self::normalize(parse_decimal(raw)?, precision)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

// Ordering and hashing are derived from the inner decimal, so ordered maps
// keyed by `Price` can be queried with plain decimal bounds.
impl Borrow<Decimal> for Price {
    fn borrow(&self) -> &Decimal {
        &self.0
    }
}

/// A non-negative quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Round to `precision` places and wrap; negative values are rejected.
    pub fn normalize(raw: Decimal, precision: u32) -> Result<Self, NumericError> {
        if raw.is_sign_negative() && !raw.is_zero() {
            return Err(NumericError::Negative(raw.to_string()));
        }
        let rounded = round_to_precision(raw, precision)?;
        Ok(Self(rounded.abs()))
    }

    /// Parse and normalize a quantity string.
    pub fn parse(raw: &str, precision: u32) -> Result<Self, NumericError> {
        Self::normalize(parse_decimal(raw)?, precision)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Quantity) -> Result<Quantity, NumericError> {
        safe_add(self.0, other.0).map(Quantity)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Quantity> for Decimal {
    fn from(qty: Quantity) -> Self {
        qty.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("49.00").unwrap(), dec!(49));
        assert_eq!(parse_decimal(" 0.001 ").unwrap(), dec!(0.001));
        assert_eq!(parse_decimal("1e-3").unwrap(), dec!(0.001));
        assert_eq!(parse_decimal(""), Err(NumericError::Empty));
        assert!(matches!(
            parse_decimal("abc"),
            Err(NumericError::InvalidDecimal { .. })
        ));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_to_precision(dec!(1.005), 2).unwrap(), dec!(1.00));
        assert_eq!(round_to_precision(dec!(1.015), 2).unwrap(), dec!(1.02));
        assert_eq!(round_to_precision(dec!(1.0151), 2).unwrap(), dec!(1.02));
        assert_eq!(round_to_precision(dec!(2.5), 0).unwrap(), dec!(2));
        assert_eq!(round_to_precision(dec!(3.5), 0).unwrap(), dec!(4));
    }

    #[test]
    fn test_round_canonical_scale() {
        let rounded = round_to_precision(dec!(49), 2).unwrap();
        assert_eq!(rounded.to_string(), "49.00");
        assert_eq!(rounded.scale(), 2);
    }

    #[test]
    fn test_unsupported_precision() {
        assert_eq!(
            round_to_precision(dec!(1), 29),
            Err(NumericError::UnsupportedPrecision(29))
        );
    }

    #[test]
    fn test_price_normalization_collapses_drift() {
        let a = Price::parse("100.004999", 2).unwrap();
        let b = Price::parse("100.00", 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "100.00");
    }

    #[test]
    fn test_price_rejects_non_positive() {
        assert!(matches!(
            Price::parse("0", 2),
            Err(NumericError::NonPositivePrice(_))
        ));
        assert!(matches!(
            Price::parse("-1.5", 2),
            Err(NumericError::NonPositivePrice(_))
        ));
        // Rounds to zero at this precision
        assert!(Price::parse("0.004", 2).is_err());
    }

    #[test]
    fn test_quantity_parse() {
        assert!(Quantity::parse("0", 8).unwrap().is_zero());
        assert!(Quantity::parse("0.00000000", 8).unwrap().is_zero());
        assert_eq!(
            Quantity::parse("1.5", 8).unwrap().as_decimal(),
            dec!(1.5)
        );
        assert!(matches!(
            Quantity::parse("-2", 8),
            Err(NumericError::Negative(_))
        ));
    }

    #[test]
    fn test_safe_arithmetic() {
        assert_eq!(safe_add(dec!(1.1), dec!(2.2)).unwrap(), dec!(3.3));
        assert_eq!(safe_sub(dec!(1), dec!(2.5)).unwrap(), dec!(-1.5));
        assert_eq!(safe_mul(dec!(1.5), dec!(2)).unwrap(), dec!(3));
        assert_eq!(safe_div(dec!(1), dec!(4)).unwrap(), dec!(0.25));
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Err(NumericError::DivisionByZero));
        assert_eq!(
            safe_mul(Decimal::MAX, dec!(2)),
            Err(NumericError::Overflow { op: "mul" })
        );
    }

    #[test]
    fn test_price_serialization() {
        let price = Price::parse("49.5", 2).unwrap();
        let json = serde_json::to_string(&price).unwrap();
        assert_eq!(json, "\"49.50\"");
        let back: Price = serde_json::from_str(&json).unwrap();
        assert_eq!(back, price);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_rounding_is_idempotent(
                mantissa in 1i64..1_000_000_000,
                scale in 0u32..8,
                dp in 0u32..6,
            ) {
                let value = Decimal::new(mantissa, scale);
                let once = round_to_precision(value, dp).unwrap();
                let twice = round_to_precision(once, dp).unwrap();
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn prop_rounding_stays_within_half_tick(
                mantissa in 1i64..1_000_000_000,
                scale in 0u32..8,
                dp in 0u32..6,
            ) {
                let value = Decimal::new(mantissa, scale);
                let rounded = round_to_precision(value, dp).unwrap();
                let half_tick = Decimal::new(5, dp + 1);
                prop_assert!((rounded - value).abs() <= half_tick);
            }
        }
    }
}
