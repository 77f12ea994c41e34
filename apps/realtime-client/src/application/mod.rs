//! Application Layer - Use cases and port definitions.
//!
//! Ports define what the connection core needs from the outside world;
//! services compose the core into feeds.

/// Port interfaces (streaming transport).
pub mod ports;

/// Application services (order book feeds).
pub mod services;
