//! Order Book Engine
//!
//! Reconstructs book state from a snapshot-plus-delta feed.
//!
//! # Sequencing
//!
//! Every snapshot and delta may carry a venue nonce. Once the book holds a
//! nonce, any delta whose nonce is not strictly greater is dropped and the
//! book is left untouched. Staleness is reported through [`UpdateOutcome`],
//! never as an error.
//!
//! # Merge strategies
//!
//! - [`OrderBook::update`] treats every accepted delta as a full replacement of
//!   both sides (venues that push complete top-of-book frames).
//! - [`OrderBook::apply`] merges level by level through the side strategy
//!   (venues that push true increments).
//!
//! A feed picks one with [`MergeStrategy`].

pub mod level;
pub mod side;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use level::{BookLevel, CountedLevel, IndexedLevel, LevelError, PriceLevel};
pub use side::{BookSide, CountedSide, IndexedSide, PlainSide, Side};

/// Book whose levels overwrite by price.
pub type PlainOrderBook = OrderBook<PlainSide>;

/// Book whose levels carry an order count.
pub type CountedOrderBook = OrderBook<CountedSide>;

/// Book keyed by order id.
pub type IndexedOrderBook = OrderBook<IndexedSide>;

/// Snapshot or delta payload.
///
/// Deserializes from `{"bids": [[price, size, ...]], "asks": [...], "nonce"?,
/// "timestamp"?, "symbol"?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "L: Deserialize<'de>", serialize = "L: Serialize"))]
pub struct OrderBookSnapshot<L> {
    /// Bid levels in any order.
    #[serde(default)]
    pub bids: Vec<L>,
    /// Ask levels in any order.
    #[serde(default)]
    pub asks: Vec<L>,
    /// Venue sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// Venue timestamp in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Unified market symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl<L> Default for OrderBookSnapshot<L> {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            nonce: None,
            timestamp: None,
            symbol: None,
        }
    }
}

impl<L> OrderBookSnapshot<L> {
    /// Snapshot with the given levels and nothing else.
    #[must_use]
    pub const fn new(bids: Vec<L>, asks: Vec<L>) -> Self {
        Self {
            bids,
            asks,
            nonce: None,
            timestamp: None,
            symbol: None,
        }
    }

    /// Set the nonce.
    #[must_use]
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// How accepted deltas are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Replace both sides with the delta's levels.
    Reset,
    /// Upsert/delete each level through the side strategy.
    #[default]
    Incremental,
}

/// Result of offering a delta to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The delta was applied.
    Applied,
    /// The delta's nonce was not ahead of the book; nothing changed.
    Stale,
}

impl UpdateOutcome {
    /// Whether the book changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Order book errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderBookError {
    /// Cached deltas start after the snapshot, leaving a gap.
    #[error("cached deltas start at nonce {first_cached}, snapshot is at {snapshot}")]
    CacheBehind {
        /// Snapshot nonce.
        snapshot: u64,
        /// First cached delta nonce.
        first_cached: u64,
    },
}

/// Two-sided book with sequencing metadata.
///
/// # Example
///
/// ```rust
/// use realtime_client::domain::orderbook::{
///     OrderBookSnapshot, PlainOrderBook, PriceLevel, UpdateOutcome,
/// };
/// use rust_decimal::Decimal;
///
/// let level = |p: i64, s: i64| PriceLevel::new(Decimal::from(p), Decimal::from(s));
/// let mut book = PlainOrderBook::new(
///     OrderBookSnapshot::new(vec![level(100, 1)], vec![level(101, 1)]).with_nonce(5),
///     usize::MAX,
/// );
///
/// let stale = OrderBookSnapshot::new(vec![], vec![]).with_nonce(5);
/// assert_eq!(book.update(stale), UpdateOutcome::Stale);
/// assert_eq!(book.bids().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct OrderBook<S: BookSide> {
    symbol: Option<String>,
    nonce: Option<u64>,
    timestamp: Option<i64>,
    bids: S,
    asks: S,
    depth: usize,
    cache: Vec<OrderBookSnapshot<S::Level>>,
}

impl<S: BookSide> OrderBook<S> {
    /// Build a book from an initial snapshot, capped at `depth` levels per side.
    #[must_use]
    pub fn new(snapshot: OrderBookSnapshot<S::Level>, depth: usize) -> Self {
        let mut book = Self::empty(depth);
        book.reset(snapshot);
        book
    }

    /// Book with no levels and no nonce.
    #[must_use]
    pub fn empty(depth: usize) -> Self {
        Self {
            symbol: None,
            nonce: None,
            timestamp: None,
            bids: S::new(Side::Bid, depth),
            asks: S::new(Side::Ask, depth),
            depth,
            cache: Vec::new(),
        }
    }

    /// Replace all state with the snapshot.
    pub fn reset(&mut self, snapshot: OrderBookSnapshot<S::Level>) {
        self.bids.clear();
        self.asks.clear();
        self.bids.store_all(snapshot.bids);
        self.asks.store_all(snapshot.asks);
        self.nonce = snapshot.nonce;
        self.timestamp = snapshot.timestamp;
        if snapshot.symbol.is_some() {
            self.symbol = snapshot.symbol;
        }
        self.limit();
    }

    /// Offer a delta that replaces both sides when accepted.
    pub fn update(&mut self, delta: OrderBookSnapshot<S::Level>) -> UpdateOutcome {
        if self.is_stale(&delta) {
            return UpdateOutcome::Stale;
        }
        self.reset(delta);
        UpdateOutcome::Applied
    }

    /// Offer a delta that is merged level by level when accepted.
    pub fn apply(&mut self, delta: OrderBookSnapshot<S::Level>) -> UpdateOutcome {
        if self.is_stale(&delta) {
            return UpdateOutcome::Stale;
        }
        if delta.nonce.is_some() {
            self.nonce = delta.nonce;
        }
        if delta.timestamp.is_some() {
            self.timestamp = delta.timestamp;
        }
        if delta.symbol.is_some() {
            self.symbol = delta.symbol;
        }
        self.bids.store_all(delta.bids);
        self.asks.store_all(delta.asks);
        self.limit();
        UpdateOutcome::Applied
    }

    /// Offer a delta using the given strategy.
    pub fn merge(
        &mut self,
        delta: OrderBookSnapshot<S::Level>,
        strategy: MergeStrategy,
    ) -> UpdateOutcome {
        match strategy {
            MergeStrategy::Reset => self.update(delta),
            MergeStrategy::Incremental => self.apply(delta),
        }
    }

    /// Truncate both sides to the depth cap.
    pub fn limit(&mut self) {
        self.bids.limit();
        self.asks.limit();
    }

    /// Buffer a delta received before the snapshot it builds on.
    pub fn cache_delta(&mut self, delta: OrderBookSnapshot<S::Level>) {
        self.cache.push(delta);
    }

    /// Number of buffered deltas.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Reset from `snapshot`, then replay every cached delta newer than it.
    ///
    /// Fails without touching the book or the cache if the oldest cached
    /// delta is more than one step ahead of the snapshot.
    pub fn sync_from_cache(
        &mut self,
        snapshot: OrderBookSnapshot<S::Level>,
        strategy: MergeStrategy,
    ) -> Result<usize, OrderBookError> {
        if let (Some(snapshot_nonce), Some(first_cached)) = (
            snapshot.nonce,
            self.cache.first().and_then(|delta| delta.nonce),
        ) && first_cached > snapshot_nonce.saturating_add(1)
        {
            return Err(OrderBookError::CacheBehind {
                snapshot: snapshot_nonce,
                first_cached,
            });
        }

        self.reset(snapshot);
        let cached = std::mem::take(&mut self.cache);
        let applied = cached
            .into_iter()
            .map(|delta| self.merge(delta, strategy))
            .filter(|outcome| outcome.is_applied())
            .count();
        Ok(applied)
    }

    fn is_stale(&self, delta: &OrderBookSnapshot<S::Level>) -> bool {
        matches!((delta.nonce, self.nonce), (Some(incoming), Some(current)) if incoming <= current)
    }

    /// Bid side, best first.
    #[must_use]
    pub fn bids(&self) -> &[S::Level] {
        self.bids.levels()
    }

    /// Ask side, best first.
    #[must_use]
    pub fn asks(&self) -> &[S::Level] {
        self.asks.levels()
    }

    /// Bid side strategy.
    #[must_use]
    pub const fn bid_side(&self) -> &S {
        &self.bids
    }

    /// Ask side strategy.
    #[must_use]
    pub const fn ask_side(&self) -> &S {
        &self.asks
    }

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<&S::Level> {
        self.bids.best()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<&S::Level> {
        self.asks.best()
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price() - self.best_bid()?.price())
    }

    /// Current nonce.
    #[must_use]
    pub const fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    /// Timestamp of the last accepted change.
    #[must_use]
    pub const fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Market symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Depth cap.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Materialize the current state as a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> OrderBookSnapshot<S::Level> {
        OrderBookSnapshot {
            bids: self.bids().to_vec(),
            asks: self.asks().to_vec(),
            nonce: self.nonce,
            timestamp: self.timestamp,
            symbol: self.symbol.clone(),
        }
    }
}
