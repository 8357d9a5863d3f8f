//! Types library for the market depth engine
//!
//! Provides the shared domain primitives used by the depth engine and its
//! consumers, so that every component agrees on what a price key is.
//!
//! # Modules
//! - `ids`: Market identifiers
//! - `side`: Book side (bid / ask)
//! - `numeric`: Exact decimal prices, quantities and rounding helpers
//! - `errors`: Error taxonomy for numeric parsing and arithmetic

pub mod errors;
pub mod ids;
pub mod numeric;
pub mod side;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::side::*;
}
