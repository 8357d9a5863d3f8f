//! Periodic book maintenance
//!
//! Three passes run in order against the tree: staleness pruning of
//! zero-volume levels, distance pruning around the mid-price, and
//! level-count eviction. The passes only mutate the tree; the engine
//! recomputes its cached best quotes once after all three have run.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::numeric::{safe_mul, Price};

use crate::tree::PriceLevelTree;

/// Levels removed by one maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub stale_pruned: usize,
    pub distance_pruned: usize,
    pub evicted: usize,
    pub levels_remaining: usize,
}

impl MaintenanceReport {
    pub fn total_removed(&self) -> usize {
        self.stale_pruned + self.distance_pruned + self.evicted
    }
}

/// Delete levels older than `threshold_ms` whose volumes are both zero.
/// Levels that still carry volume are never pruned for age alone.
///
/// The tree already drops a level when its last side goes to zero, so this
/// pass only guards that invariant and normally removes nothing.
pub fn prune_stale(tree: &mut PriceLevelTree, now_ms: i64, threshold_ms: u64) -> usize {
    let cutoff = now_ms.saturating_sub(threshold_ms as i64);
    let stale: Vec<Price> = tree
        .iter()
        .filter(|level| level.is_empty() && level.last_update_ms < cutoff)
        .map(|level| level.price)
        .collect();
    for price in &stale {
        tree.delete(price);
    }
    stale.len()
}

/// Delete every level outside `mid * (1 ± max_distance)`. No-op without a
/// mid-price.
pub fn prune_distance(
    tree: &mut PriceLevelTree,
    mid: Option<Decimal>,
    max_distance: Decimal,
) -> usize {
    let Some(mid) = mid else {
        return 0;
    };
    let Ok(offset) = safe_mul(mid, max_distance) else {
        return 0;
    };
    let doomed = tree.prices_outside(mid - offset, mid + offset);
    for price in &doomed {
        tree.delete(price);
    }
    doomed.len()
}

/// Evict levels until at most `max_levels` remain.
///
/// Candidates are ranked by distance from `reference` (furthest first), then
/// by combined volume (smallest first), then by price (lowest first).
pub fn evict_excess(
    tree: &mut PriceLevelTree,
    reference: Option<Decimal>,
    max_levels: usize,
) -> usize {
    let excess = tree.len().saturating_sub(max_levels);
    if excess == 0 {
        return 0;
    }

    let reference = reference.unwrap_or(Decimal::ZERO);
    let mut ranked: Vec<(Decimal, Decimal, Price)> = tree
        .iter()
        .map(|level| {
            let distance = (level.price.as_decimal() - reference).abs();
            (distance, level.total_volume(), level.price)
        })
        .collect();
    ranked.sort_by(eviction_order);

    for (_, _, price) in ranked.iter().take(excess) {
        tree.delete(price);
    }
    excess
}

fn eviction_order(a: &(Decimal, Decimal, Price), b: &(Decimal, Decimal, Price)) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}
