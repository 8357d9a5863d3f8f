//! Error types for numeric parsing and arithmetic
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised by the decimal helpers in [`crate::numeric`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("empty numeric string")]
    Empty,

    #[error("invalid decimal '{value}': {reason}")]
    InvalidDecimal { value: String, reason: String },

    #[error("negative value not allowed: {0}")]
    Negative(String),

    #[error("price must be strictly positive: {0}")]
    NonPositivePrice(String),

    #[error("unsupported precision {0} (max 28)")]
    UnsupportedPrecision(u32),

    #[error("arithmetic overflow in {op}")]
    Overflow { op: &'static str },

    #[error("division by zero")]
    DivisionByZero,
}
