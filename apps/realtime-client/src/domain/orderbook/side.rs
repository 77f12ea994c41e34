//! Order Book Sides
//!
//! Sorted, price-indexed level collections. Bids sort by descending price and
//! asks by ascending price, so index 0 is always the best price.
//!
//! Three strategies share the [`BookSide`] contract:
//!
//! - [`PlainSide`]: one level per price, overwritten by price, zero size deletes
//! - [`CountedSide`]: like plain, but an order count of zero also deletes
//! - [`IndexedSide`]: one entry per order id, so deltas can target individual
//!   orders; several orders may rest at the same price

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;

use rust_decimal::Decimal;

use super::level::{BookLevel, CountedLevel, IndexedLevel, PriceLevel};

/// Which side of the book a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Buy interest, best (highest) price first.
    Bid,
    /// Sell interest, best (lowest) price first.
    Ask,
}

impl Side {
    /// Ordering of `a` relative to `b` in this side's sort order.
    #[must_use]
    pub fn compare(self, a: Decimal, b: Decimal) -> Ordering {
        match self {
            Self::Bid => b.cmp(&a),
            Self::Ask => a.cmp(&b),
        }
    }
}

/// Contract shared by every side strategy.
pub trait BookSide: Clone + Debug + Send + Sync + 'static {
    /// Level record stored by this side.
    type Level: BookLevel;

    /// Create an empty side capped at `depth` levels.
    fn new(side: Side, depth: usize) -> Self;

    /// Which side this is.
    fn side(&self) -> Side;

    /// Configured depth cap.
    fn depth(&self) -> usize;

    /// Insert, overwrite or delete according to the strategy.
    fn store(&mut self, level: Self::Level);

    /// Sorted levels, best first.
    fn levels(&self) -> &[Self::Level];

    /// Remove every level.
    fn clear(&mut self);

    /// Truncate to the depth cap.
    fn limit(&mut self);

    /// Store each level in order.
    fn store_all<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = Self::Level>,
    {
        for level in levels {
            self.store(level);
        }
    }

    /// Number of stored levels.
    fn len(&self) -> usize {
        self.levels().len()
    }

    /// Whether the side is empty.
    fn is_empty(&self) -> bool {
        self.levels().is_empty()
    }

    /// Best level, if any.
    fn best(&self) -> Option<&Self::Level> {
        self.levels().first()
    }
}

// =============================================================================
// Shared sorted storage
// =============================================================================

/// Sorted level vector with binary-search lookup by price.
#[derive(Debug, Clone)]
struct LevelIndex<L> {
    side: Side,
    depth: usize,
    levels: Vec<L>,
}

impl<L: BookLevel> LevelIndex<L> {
    const fn new(side: Side, depth: usize) -> Self {
        Self {
            side,
            depth,
            levels: Vec::new(),
        }
    }

    /// `Ok(index)` of the level at `price`, or `Err(index)` where it would go.
    fn locate(&self, price: Decimal) -> Result<usize, usize> {
        let side = self.side;
        self.levels
            .binary_search_by(|level| side.compare(level.price(), price))
    }

    /// Overwrite the level at the same price, or insert it in order.
    fn upsert(&mut self, level: L) {
        match self.locate(level.price()) {
            Ok(index) => self.levels[index] = level,
            Err(index) => self.levels.insert(index, level),
        }
    }

    fn remove_price(&mut self, price: Decimal) -> Option<L> {
        self.locate(price).ok().map(|index| self.levels.remove(index))
    }

    /// Range of positions holding `price`.
    fn price_range(&self, price: Decimal) -> std::ops::Range<usize> {
        let side = self.side;
        let start = self
            .levels
            .partition_point(|level| side.compare(level.price(), price) == Ordering::Less);
        let end = self
            .levels
            .partition_point(|level| side.compare(level.price(), price) != Ordering::Greater);
        start..end
    }

    /// Drop levels past the cap, returning them.
    fn truncate(&mut self) -> Vec<L> {
        if self.levels.len() > self.depth {
            self.levels.split_off(self.depth)
        } else {
            Vec::new()
        }
    }
}

// =============================================================================
// Plain
// =============================================================================

/// One level per price; a zero size removes the price.
#[derive(Debug, Clone)]
pub struct PlainSide {
    index: LevelIndex<PriceLevel>,
}

impl BookSide for PlainSide {
    type Level = PriceLevel;

    fn new(side: Side, depth: usize) -> Self {
        Self {
            index: LevelIndex::new(side, depth),
        }
    }

    fn side(&self) -> Side {
        self.index.side
    }

    fn depth(&self) -> usize {
        self.index.depth
    }

    fn store(&mut self, level: PriceLevel) {
        if level.is_deletion() {
            self.index.remove_price(level.price);
        } else {
            self.index.upsert(level);
        }
    }

    fn levels(&self) -> &[PriceLevel] {
        &self.index.levels
    }

    fn clear(&mut self) {
        self.index.levels.clear();
    }

    fn limit(&mut self) {
        self.index.truncate();
    }
}

// =============================================================================
// Counted
// =============================================================================

/// One level per price carrying an order count.
#[derive(Debug, Clone)]
pub struct CountedSide {
    index: LevelIndex<CountedLevel>,
}

impl BookSide for CountedSide {
    type Level = CountedLevel;

    fn new(side: Side, depth: usize) -> Self {
        Self {
            index: LevelIndex::new(side, depth),
        }
    }

    fn side(&self) -> Side {
        self.index.side
    }

    fn depth(&self) -> usize {
        self.index.depth
    }

    fn store(&mut self, level: CountedLevel) {
        if level.is_deletion() {
            self.index.remove_price(level.price);
        } else {
            self.index.upsert(level);
        }
    }

    fn levels(&self) -> &[CountedLevel] {
        &self.index.levels
    }

    fn clear(&mut self) {
        self.index.levels.clear();
    }

    fn limit(&mut self) {
        self.index.truncate();
    }
}

// =============================================================================
// Indexed
// =============================================================================

/// One entry per order id, ordered by price then arrival.
#[derive(Debug, Clone)]
pub struct IndexedSide {
    index: LevelIndex<IndexedLevel>,
    prices: HashMap<String, Decimal>,
}

impl IndexedSide {
    /// Price of a resting order.
    #[must_use]
    pub fn price_of(&self, id: &str) -> Option<Decimal> {
        self.prices.get(id).copied()
    }

    /// Remove an order by id alone, for venues whose deletes omit the price.
    pub fn remove_by_id(&mut self, id: &str) -> Option<IndexedLevel> {
        let price = self.prices.remove(id)?;
        let range = self.index.price_range(price);
        let offset = self.index.levels[range.clone()]
            .iter()
            .position(|level| level.id == id)?;
        Some(self.index.levels.remove(range.start + offset))
    }

    fn insert(&mut self, level: IndexedLevel) {
        // new orders queue behind existing ones at the same price
        let position = self.index.price_range(level.price).end;
        self.prices.insert(level.id.clone(), level.price);
        self.index.levels.insert(position, level);
    }
}

impl BookSide for IndexedSide {
    type Level = IndexedLevel;

    fn new(side: Side, depth: usize) -> Self {
        Self {
            index: LevelIndex::new(side, depth),
            prices: HashMap::new(),
        }
    }

    fn side(&self) -> Side {
        self.index.side
    }

    fn depth(&self) -> usize {
        self.index.depth
    }

    fn store(&mut self, level: IndexedLevel) {
        if level.is_deletion() {
            self.remove_by_id(&level.id);
            return;
        }

        match self.prices.get(&level.id).copied() {
            Some(price) if price == level.price => {
                let range = self.index.price_range(price);
                if let Some(existing) = self.index.levels[range]
                    .iter_mut()
                    .find(|existing| existing.id == level.id)
                {
                    existing.size = level.size;
                }
            }
            Some(_) => {
                // the order moved to a new price
                self.remove_by_id(&level.id);
                self.insert(level);
            }
            None => self.insert(level),
        }
    }

    fn levels(&self) -> &[IndexedLevel] {
        &self.index.levels
    }

    fn clear(&mut self) {
        self.index.levels.clear();
        self.prices.clear();
    }

    fn limit(&mut self) {
        for dropped in self.index.truncate() {
            self.prices.remove(&dropped.id);
        }
    }
}
