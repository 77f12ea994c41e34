#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Realtime Client - Streaming Data Plane
//!
//! Persistent venue connections multiplexing many subscriptions, an
//! in-process topic bus, and an order book engine that rebuilds books from
//! snapshot-plus-delta feeds.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure state and algorithms
//!   - `deferred`: single-assignment completion handles
//!   - `queue`: growable ring buffer
//!   - `orderbook`: Plain, Counted and Indexed books with nonce sequencing
//!   - `error`: the client error taxonomy
//!
//! - **Application**: ports and services
//!   - `ports`: the streaming transport interface
//!   - `services`: order book feeds
//!
//! - **Infrastructure**: adapters and ambient concerns
//!   - `websocket`: connection client, keepalive, codec, transports, reconnect policy
//!   - `broadcast`: topic bus (Stream and Consumer)
//!   - `config`: typed settings and environment loading
//!   - `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Venue ──frames──► ConnectionClient ──on_message──► Stream (topic bus)
//!                        ▲                               │
//!                        │ watch / request               ├──► OrderBookFeed ──► Stream<OrderBook>
//!                   caller tasks ◄── Deferred ───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core data-plane types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::deferred::{Deferred, DeferredState};
pub use domain::error::ClientError;
pub use domain::orderbook::{
    BookLevel, BookSide, CountedLevel, CountedOrderBook, CountedSide, IndexedLevel,
    IndexedOrderBook, IndexedSide, MergeStrategy, OrderBook, OrderBookError, OrderBookSnapshot,
    PlainOrderBook, PlainSide, PriceLevel, Side, UpdateOutcome,
};
pub use domain::queue::RingQueue;

// Ports and services
pub use application::ports::{CloseEvent, Frame, Transport, TransportEvent, TransportSink};
pub use application::services::{BookUpdate, OrderBookFeed, orderbook_topic};

// Connection client
pub use infrastructure::websocket::{
    ClientCallbacks, ConnectionClient, ConnectionStatus, MemoryTransport, ReconnectConfig,
    ReconnectPolicy, TungsteniteTransport,
};

// Topic bus
pub use infrastructure::broadcast::{Message, MessageHandler, Stream, StreamConfig};

// Configuration
pub use infrastructure::config::{
    AppConfig, ClientConfig, ConfigError, Decompression, OrderBookConfig, ReconnectSettings,
    StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
