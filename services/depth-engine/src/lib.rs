//! Market Depth Engine
//!
//! Turns a sequence-numbered, occasionally gappy exchange diff stream into a
//! self-healing, queryable order book:
//! - O(log n) best bid / best ask and ordered range queries
//! - Gap and duplicate detection against the feed's update ids
//! - Snapshot-based recovery with buffered-diff replay
//! - Error-rate circuit breaker
//! - Periodic staleness, distance and level-count pruning
//! - Checksummed save/restore and deterministic offline replay
//!
//! # Architecture
//!
//! ```text
//!   Depth diffs                 Snapshot source
//!        │                            │
//!   ┌────▼─────┐                 ┌────▼─────┐
//!   │ Breaker  │                 │ Recovery │
//!   └────┬─────┘                 └────┬─────┘
//!   ┌────▼─────┐   buffer while       │
//!   │ Sequence │◄── uninitialized ────┘
//!   └────┬─────┘
//!   ┌────▼──────────┐   ┌─────────────┐
//!   │ PriceLevelTree│◄──│ Maintenance │
//!   └────┬──────────┘   └─────────────┘
//!        │
//!   best bid/ask, spread, bands, snapshot, health
//! ```
//!
//! `OrderBookEngine` is the synchronous single-writer core;
//! `DepthEngine` is the async handle that owns the timers.

pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod maintenance;
pub mod metrics;
pub mod normalizer;
pub mod recovery;
pub mod replay;
pub mod service;
pub mod snapshot;
pub mod tree;

pub use crate::config::EngineConfig;
pub use engine::{BandSum, Crossing, DepthMetrics, OrderBookEngine, UpdateOutcome};
pub use error::{DepthError, SnapshotFetchError};
pub use events::{DepthSnapshot, DepthUpdate};
pub use health::{HealthReport, HealthStatus};
pub use recovery::{RecoveryReport, SnapshotSource};
pub use service::DepthEngine;
