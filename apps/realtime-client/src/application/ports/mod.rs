//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: Opens one streaming session to a venue and yields a write
//!   half plus an inbound event stream.

mod transport_port;

pub use transport_port::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CloseEvent, Frame, Transport, TransportEvent, TransportEvents,
    TransportOptions, TransportSink,
};
