//! Domain Layer - Core data-plane types.
//!
//! Pure state and algorithms with no I/O: completion handles, the backlog
//! queue, the client error taxonomy and the order book engine.

/// Single-assignment completion handle.
pub mod deferred;

/// Error taxonomy shared by the client and the topic bus.
pub mod error;

/// Snapshot-plus-delta order book reconstruction.
pub mod orderbook;

/// Growable circular FIFO buffer.
pub mod queue;
