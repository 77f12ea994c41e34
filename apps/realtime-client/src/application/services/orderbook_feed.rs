//! Order Book Feed
//!
//! Materializes one symbol's book from snapshot and delta messages on the
//! topic bus and republishes the book after every accepted change.
//!
//! Deltas that arrive before the first snapshot are cached on the book and
//! replayed by [`OrderBook::sync_from_cache`] once the snapshot lands. If the
//! cache does not reach the snapshot the feed stays unsynced and keeps
//! caching until a newer snapshot arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::orderbook::{
    BookSide, MergeStrategy, OrderBook, OrderBookSnapshot, UpdateOutcome,
};
use crate::infrastructure::broadcast::{Message, MessageHandler, Stream};
use crate::infrastructure::config::OrderBookConfig;
use crate::infrastructure::metrics::{self, BookUpdateKind};

/// Topic carrying updates and books for `symbol`.
#[must_use]
pub fn orderbook_topic(symbol: &str) -> String {
    format!("orderbook:{symbol}")
}

/// Inbound book message.
///
/// Deserializes from `{"type": "snapshot" | "delta", "bids": ..., "asks": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
#[serde(bound(deserialize = "L: Deserialize<'de>", serialize = "L: Serialize"))]
pub enum BookUpdate<L> {
    /// Full state.
    Snapshot(OrderBookSnapshot<L>),
    /// Change relative to the previous state.
    Delta(OrderBookSnapshot<L>),
}

impl<L> BookUpdate<L> {
    /// Symbol carried by the payload.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Snapshot(snapshot) | Self::Delta(snapshot) => snapshot.symbol.as_deref(),
        }
    }
}

struct FeedState<S: BookSide> {
    book: OrderBook<S>,
    synced: bool,
}

/// Book materializer for one symbol.
pub struct OrderBookFeed<S: BookSide> {
    symbol: String,
    topic: String,
    merge_strategy: MergeStrategy,
    state: Mutex<FeedState<S>>,
    output: Arc<Stream<OrderBook<S>>>,
    handler: Mutex<Option<MessageHandler<BookUpdate<S::Level>>>>,
}

impl<S: BookSide> OrderBookFeed<S> {
    /// Create an unsynced feed publishing to `output`.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        config: &OrderBookConfig,
        output: Arc<Stream<OrderBook<S>>>,
    ) -> Arc<Self> {
        let symbol = symbol.into();
        Arc::new(Self {
            topic: orderbook_topic(&symbol),
            symbol,
            merge_strategy: config.merge_strategy,
            state: Mutex::new(FeedState {
                book: OrderBook::empty(config.depth),
                synced: false,
            }),
            output,
            handler: Mutex::new(None),
        })
    }

    /// Subscribe synchronously to this symbol's topic on `input`.
    pub fn start(self: &Arc<Self>, input: &Stream<BookUpdate<S::Level>>) {
        let feed = Arc::clone(self);
        let handler = MessageHandler::new(move |message: Arc<Message<BookUpdate<S::Level>>>| {
            let feed = Arc::clone(&feed);
            async move { feed.on_message(&message).await }
        });
        input.subscribe(&self.topic, handler.clone(), true);
        *self.handler.lock() = Some(handler);
        tracing::info!(symbol = %self.symbol, topic = %self.topic, "Order book feed started");
    }

    /// Unsubscribe from `input`. Returns whether the feed was subscribed.
    pub fn stop(&self, input: &Stream<BookUpdate<S::Level>>) -> bool {
        let Some(handler) = self.handler.lock().take() else {
            return false;
        };
        input.unsubscribe(&self.topic, &handler)
    }

    /// Market symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Topic consumed and published.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether a snapshot has been applied.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.state.lock().synced
    }

    /// Copy of the current book.
    #[must_use]
    pub fn book(&self) -> OrderBook<S> {
        self.state.lock().book.clone()
    }

    async fn on_message(&self, message: &Message<BookUpdate<S::Level>>) {
        if let Some(error) = &message.error {
            tracing::warn!(symbol = %self.symbol, error = %error, "Book update carried an error");
            let book = self.book();
            self.output
                .publish(&self.topic, book, Some(error.clone()))
                .await;
            return;
        }
        if let Some(book) = self.handle(message.payload.clone()) {
            self.output.publish(&self.topic, book, None).await;
        }
    }

    /// Apply one update; returns the book to publish if it changed.
    fn handle(&self, update: BookUpdate<S::Level>) -> Option<OrderBook<S>> {
        let mut state = self.state.lock();
        match update {
            BookUpdate::Snapshot(snapshot) if state.synced => {
                state.book.reset(snapshot);
            }
            BookUpdate::Snapshot(snapshot) => {
                match state.book.sync_from_cache(snapshot, self.merge_strategy) {
                    Ok(replayed) => {
                        state.synced = true;
                        tracing::debug!(symbol = %self.symbol, replayed, "Order book synced");
                    }
                    Err(error) => {
                        tracing::warn!(symbol = %self.symbol, error = %error, "Snapshot behind cached deltas");
                        return None;
                    }
                }
            }
            BookUpdate::Delta(delta) if !state.synced => {
                state.book.cache_delta(delta);
                return None;
            }
            BookUpdate::Delta(delta) => {
                if state.book.merge(delta, self.merge_strategy) == UpdateOutcome::Stale {
                    metrics::record_stale_delta(&self.symbol);
                    tracing::debug!(symbol = %self.symbol, nonce = ?state.book.nonce(), "Dropped stale delta");
                    return None;
                }
                metrics::record_book_update(&self.symbol, BookUpdateKind::Delta);
                return Some(state.book.clone());
            }
        }
        metrics::record_book_update(&self.symbol, BookUpdateKind::Snapshot);
        Some(state.book.clone())
    }
}
