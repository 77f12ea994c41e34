//! Application Services
//!
//! - [`OrderBookFeed`]: materializes books from snapshot and delta topics

mod orderbook_feed;

pub use orderbook_feed::{BookUpdate, OrderBookFeed, orderbook_topic};
