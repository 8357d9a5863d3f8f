//! Price level tree
//!
//! Aggregate resting liquidity keyed by normalized price. Levels live by
//! value in a `BTreeMap` (a self-balancing B-tree), giving O(log n)
//! insert/update/delete and ordered traversal for snapshots and band sums.
//!
//! Two side indexes (`BTreeSet<Price>`) hold the prices that currently carry
//! bid or ask volume, so the best bid (highest bid price) and best ask
//! (lowest ask price) are O(log n) lookups even when one-sided levels sit on
//! the far side of the book.
//!
//! Invariant: a stored level always has `bid > 0 || ask > 0`. Clearing the
//! last non-zero side removes the node, so `len()` counts active levels.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::numeric::{Price, Quantity};
use types::side::Side;

/// Aggregate liquidity at one normalized price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub bid: Quantity,
    pub ask: Quantity,
    /// Unix milliseconds of the last mutation.
    pub last_update_ms: i64,
}

impl PriceLevel {
    fn new(price: Price, now_ms: i64) -> Self {
        Self {
            price,
            bid: Quantity::ZERO,
            ask: Quantity::ZERO,
            last_update_ms: now_ms,
        }
    }

    /// Volume resting on `side`.
    pub fn volume(&self, side: Side) -> Quantity {
        match side {
            Side::Bid => self.bid,
            Side::Ask => self.ask,
        }
    }

    /// Bid plus ask volume, saturating at `Decimal::MAX`.
    pub fn total_volume(&self) -> Decimal {
        self.bid.as_decimal().saturating_add(self.ask.as_decimal())
    }

    /// Whether both sides are zero.
    pub fn is_empty(&self) -> bool {
        self.bid.is_zero() && self.ask.is_zero()
    }

    fn set_volume(&mut self, side: Side, quantity: Quantity) {
        match side {
            Side::Bid => self.bid = quantity,
            Side::Ask => self.ask = quantity,
        }
    }
}

/// What an upsert did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// A new level was created.
    Inserted,
    /// An existing level was modified and still carries volume.
    Updated,
    /// The level lost its last non-zero side and was deleted.
    Removed,
    /// Zero quantity for a price with no level; nothing to do.
    Unchanged,
}

/// Ordered map from normalized price to aggregate level.
#[derive(Debug, Clone, Default)]
pub struct PriceLevelTree {
    levels: BTreeMap<Price, PriceLevel>,
    bid_prices: BTreeSet<Price>,
    ask_prices: BTreeSet<Price>,
}

impl PriceLevelTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level stored at `price`, if any.
    pub fn get(&self, price: &Price) -> Option<&PriceLevel> {
        self.levels.get(price)
    }

    /// Set `side`'s volume at `price` to `quantity`.
    ///
    /// A zero quantity clears the side and deletes the level when the other
    /// side is also zero. Any mutation refreshes the level timestamp.
    pub fn upsert(
        &mut self,
        price: Price,
        side: Side,
        quantity: Quantity,
        now_ms: i64,
    ) -> LevelChange {
        if quantity.is_zero() {
            return self.clear_side(price, side, now_ms);
        }

        let mut change = LevelChange::Updated;
        let level = self.levels.entry(price).or_insert_with(|| {
            change = LevelChange::Inserted;
            PriceLevel::new(price, now_ms)
        });
        level.set_volume(side, quantity);
        level.last_update_ms = now_ms;
        self.side_index_mut(side).insert(price);
        change
    }

    fn clear_side(&mut self, price: Price, side: Side, now_ms: i64) -> LevelChange {
        let Some(level) = self.levels.get_mut(&price) else {
            return LevelChange::Unchanged;
        };
        level.set_volume(side, Quantity::ZERO);
        level.last_update_ms = now_ms;
        let empty = level.is_empty();
        self.side_index_mut(side).remove(&price);

        if empty {
            self.levels.remove(&price);
            LevelChange::Removed
        } else {
            LevelChange::Updated
        }
    }

    /// Remove the level at `price` regardless of its volumes.
    pub fn delete(&mut self, price: &Price) -> Option<PriceLevel> {
        let removed = self.levels.remove(price)?;
        self.bid_prices.remove(price);
        self.ask_prices.remove(price);
        Some(removed)
    }

    /// Highest price with bid volume.
    pub fn best_bid(&self) -> Option<Price> {
        self.bid_prices.last().copied()
    }

    /// Lowest price with ask volume.
    pub fn best_ask(&self) -> Option<Price> {
        self.ask_prices.first().copied()
    }

    /// Levels with `min <= price <= max`, ascending. Empty when `min > max`.
    pub fn range(&self, min: Decimal, max: Decimal) -> impl Iterator<Item = &PriceLevel> + '_ {
        (min <= max)
            .then(|| self.levels.range::<Decimal, _>(min..=max))
            .into_iter()
            .flatten()
            .map(|(_, level)| level)
    }

    /// Prices strictly below `lower` or strictly above `upper`, ascending.
    pub fn prices_outside(&self, lower: Decimal, upper: Decimal) -> Vec<Price> {
        if lower > upper {
            return self.levels.keys().copied().collect();
        }
        let below = self
            .levels
            .range::<Decimal, _>((Bound::Unbounded, Bound::Excluded(lower)))
            .map(|(price, _)| *price);
        let above = self
            .levels
            .range::<Decimal, _>((Bound::Excluded(upper), Bound::Unbounded))
            .map(|(price, _)| *price);
        below.chain(above).collect()
    }

    /// All levels in ascending price order.
    pub fn iter(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.levels.values()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.bid_prices.clear();
        self.ask_prices.clear();
    }

    /// Number of active levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of levels carrying bid volume.
    pub fn bid_level_count(&self) -> usize {
        self.bid_prices.len()
    }

    /// Number of levels carrying ask volume.
    pub fn ask_level_count(&self) -> usize {
        self.ask_prices.len()
    }

    /// Deep copy of every level, keyed by price.
    pub fn to_map(&self) -> BTreeMap<Price, PriceLevel> {
        self.levels.clone()
    }

    /// Check that the side indexes agree with the stored levels and that no
    /// dead level is present. O(n); diagnostics and tests only.
    pub fn is_consistent(&self) -> bool {
        let no_dead = self.levels.values().all(|l| !l.is_empty());
        let bids: BTreeSet<Price> = self
            .levels
            .values()
            .filter(|l| !l.bid.is_zero())
            .map(|l| l.price)
            .collect();
        let asks: BTreeSet<Price> = self
            .levels
            .values()
            .filter(|l| !l.ask.is_zero())
            .map(|l| l.price)
            .collect();
        no_dead && bids == self.bid_prices && asks == self.ask_prices
    }

    fn side_index_mut(&mut self, side: Side) -> &mut BTreeSet<Price> {
        match side {
            Side::Bid => &mut self.bid_prices,
            Side::Ask => &mut self.ask_prices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: Decimal) -> Price {
        Price::normalize(v, 2).unwrap()
    }

    fn qty(v: Decimal) -> Quantity {
        Quantity::normalize(v, 8).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree = PriceLevelTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.best_bid().is_none());
        assert!(tree.best_ask().is_none());
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_total_volume_saturates() {
        let mut tree = PriceLevelTree::new();
        tree.upsert(px(dec!(50)), Side::Bid, qty(Decimal::MAX), 1);
        tree.upsert(px(dec!(50)), Side::Ask, qty(Decimal::MAX), 1);
        assert_eq!(tree.get(&px(dec!(50))).unwrap().total_volume(), Decimal::MAX);
    }

    #[test]
    fn test_upsert_insert_and_update() {
        let mut tree = PriceLevelTree::new();
        assert_eq!(tree.upsert(px(dec!(49)), Side::Bid, qty(dec!(100)), 1), LevelChange::Inserted);
        assert_eq!(tree.upsert(px(dec!(49)), Side::Bid, qty(dec!(120)), 2), LevelChange::Updated);

        assert_eq!(tree.len(), 1);
        let level = tree.get(&px(dec!(49))).unwrap();
        assert_eq!(level.bid, qty(dec!(120)));
        assert!(level.ask.is_zero());
        assert_eq!(level.last_update_ms, 2);
    }

    #[test]
    fn test_zero_quantity_deletes_dead_level() {
        let mut tree = PriceLevelTree::new();
        tree.upsert(px(dec!(49)), Side::Bid, qty(dec!(100)), 1);
        assert_eq!(tree.upsert(px(dec!(49)), Side::Bid, Quantity::ZERO, 2), LevelChange::Removed);
        assert!(tree.is_empty());
        assert!(tree.best_bid().is_none());
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_zero_quantity_keeps_other_side() {
        let mut tree = PriceLevelTree::new();
        tree.upsert(px(dec!(50)), Side::Bid, qty(dec!(1)), 1);
        tree.upsert(px(dec!(50)), Side::Ask, qty(dec!(2)), 1);
        assert_eq!(tree.upsert(px(dec!(50)), Side::Bid, Quantity::ZERO, 3), LevelChange::Updated);

        let level = tree.get(&px(dec!(50))).unwrap();
        assert!(level.bid.is_zero());
        assert_eq!(level.ask, qty(dec!(2)));
        assert_eq!(level.last_update_ms, 3);
        assert_eq!(tree.bid_level_count(), 0);
        assert_eq!(tree.ask_level_count(), 1);
    }

    #[test]
    fn test_zero_quantity_on_missing_price() {
        let mut tree = PriceLevelTree::new();
        assert_eq!(tree.upsert(px(dec!(10)), Side::Ask, Quantity::ZERO, 1), LevelChange::Unchanged);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_best_quotes_skip_one_sided_levels() {
        let mut tree = PriceLevelTree::new();
        tree.upsert(px(dec!(48)), Side::Bid, qty(dec!(1)), 1);
        tree.upsert(px(dec!(49)), Side::Bid, qty(dec!(1)), 1);
        tree.upsert(px(dec!(51)), Side::Ask, qty(dec!(1)), 1);
        tree.upsert(px(dec!(52)), Side::Ask, qty(dec!(1)), 1);

        // Highest level overall is an ask; best bid must ignore it.
        assert_eq!(tree.best_bid(), Some(px(dec!(49))));
        assert_eq!(tree.best_ask(), Some(px(dec!(51))));

        tree.delete(&px(dec!(49)));
        assert_eq!(tree.best_bid(), Some(px(dec!(48))));
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_range_inclusive_ascending() {
        let mut tree = PriceLevelTree::new();
        for p in [dec!(10), dec!(11), dec!(12), dec!(13)] {
            tree.upsert(px(p), Side::Bid, qty(dec!(1)), 1);
        }
        let prices: Vec<Decimal> = tree
            .range(dec!(11), dec!(12))
            .map(|l| l.price.as_decimal())
            .collect();
        assert_eq!(prices, vec![dec!(11), dec!(12)]);

        assert_eq!(tree.range(dec!(12), dec!(11)).count(), 0);
        assert_eq!(tree.range(dec!(11.5), dec!(11.5)).count(), 0);
        assert_eq!(tree.range(dec!(0), dec!(1000)).count(), 4);
    }

    #[test]
    fn test_prices_outside() {
        let mut tree = PriceLevelTree::new();
        for p in [dec!(10), dec!(11), dec!(12), dec!(13)] {
            tree.upsert(px(p), Side::Ask, qty(dec!(1)), 1);
        }
        let outside: Vec<Decimal> = tree
            .prices_outside(dec!(11), dec!(12))
            .into_iter()
            .map(|p| p.as_decimal())
            .collect();
        assert_eq!(outside, vec![dec!(10), dec!(13)]);
        assert!(tree.prices_outside(dec!(0), dec!(100)).is_empty());
    }

    #[test]
    fn test_clear_and_snapshot_copy() {
        let mut tree = PriceLevelTree::new();
        tree.upsert(px(dec!(10)), Side::Bid, qty(dec!(1)), 1);
        let copy = tree.to_map();
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(copy.len(), 1);
        assert!(tree.best_bid().is_none());
    }
}
