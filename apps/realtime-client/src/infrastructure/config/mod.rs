//! Configuration Module
//!
//! Configuration structs for the client, the topic bus and the host binary.

mod settings;

pub use settings::{
    AppConfig, ClientConfig, ConfigError, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_KEEP_ALIVE,
    DEFAULT_MAX_PING_PONG_MISSES, Decompression, OrderBookConfig, ReconnectSettings,
    StreamSettings,
};
