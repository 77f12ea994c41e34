//! Streaming Connection Adapters
//!
//! - [`client`]: the connection state machine with correlation and subscriptions
//! - [`keepalive`]: ping-pong liveness monitor
//! - [`codec`]: frame decompression and JSON decoding
//! - [`transport`]: tokio-tungstenite [`Transport`](crate::application::ports::Transport)
//! - [`memory`]: in-memory loopback transport
//! - [`reconnect`]: backoff policy for supervisors

pub mod client;
pub mod codec;
pub mod keepalive;
pub mod memory;
pub mod reconnect;
pub mod transport;

pub use client::{
    ClientCallbacks, ConnectedHandle, ConnectionClient, ConnectionStatus, DisconnectedHandle,
    ResponseHandle, SendHandle,
};
pub use codec::{FrameCodec, is_json_encoded_object, quote_big_integers};
pub use keepalive::{KeepAliveConfig, KeepAliveEvent, KeepAliveMonitor, KeepAliveState};
pub use memory::{
    Handshake, MemoryCapabilities, MemoryPeer, MemoryServer, MemoryTransport, Written,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use transport::TungsteniteTransport;
