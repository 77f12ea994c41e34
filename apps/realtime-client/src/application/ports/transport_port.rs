//! Transport Port (Driven Port)
//!
//! Capability interface for a bidirectional message transport. The connection
//! client's state machine talks only to this trait; the production adapter
//! wraps tokio-tungstenite and tests inject an in-memory implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::error::ClientError;

/// Close code for a normal, locally requested shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a connection that ended without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One application data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame, possibly compressed.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Close notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseEvent {
    /// Create a close event.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close without a handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }
}

/// Event produced by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Application data.
    Message(Frame),
    /// Protocol ping from the peer.
    Ping(Vec<u8>),
    /// Protocol pong from the peer.
    Pong(Vec<u8>),
    /// Transport failure; the session is unusable afterwards.
    Error(ClientError),
    /// Session closed.
    Close(CloseEvent),
}

/// Handshake options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Subprotocols to offer.
    pub protocols: Vec<String>,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
}

/// Inbound event stream of an open session.
pub type TransportEvents = BoxStream<'static, TransportEvent>;

/// Write half of an open session.
#[async_trait]
pub trait TransportSink: Send {
    /// Write one data frame.
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError>;

    /// Send a protocol ping.
    ///
    /// # Errors
    ///
    /// Transports that do not expose control frames return
    /// [`ClientError::NotSupported`].
    async fn ping(&mut self) -> Result<(), ClientError> {
        Err(ClientError::NotSupported(
            "transport does not expose protocol pings".to_string(),
        ))
    }

    /// Answer a peer ping.
    async fn pong(&mut self, _data: Vec<u8>) -> Result<(), ClientError> {
        Err(ClientError::NotSupported(
            "transport does not expose protocol pongs".to_string(),
        ))
    }

    /// Start the close handshake.
    async fn close(&mut self, code: u16) -> Result<(), ClientError>;

    /// Whether `ping`/`pong` reach the wire. When false the platform answers
    /// pings itself and the keepalive treats the link as alive.
    fn exposes_control_frames(&self) -> bool {
        false
    }

    /// Whether `send` returns only once the frame is written. When false the
    /// client settles sends as soon as the frame is queued.
    fn confirms_writes(&self) -> bool {
        true
    }
}

/// Opens transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and return the session halves.
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<(Box<dyn TransportSink>, TransportEvents), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentSink;

    #[async_trait]
    impl TransportSink for SilentSink {
        async fn send(&mut self, _frame: Frame) -> Result<(), ClientError> {
            Ok(())
        }

        async fn close(&mut self, _code: u16) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_ping_is_not_supported() {
        let mut sink = SilentSink;
        assert!(!sink.exposes_control_frames());
        assert!(matches!(
            sink.ping().await,
            Err(ClientError::NotSupported(_))
        ));
    }

    #[test]
    fn frame_length() {
        assert_eq!(Frame::Text("abc".to_string()).len(), 3);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }

    #[test]
    fn abnormal_close_code() {
        assert_eq!(CloseEvent::abnormal("gone").code, 1006);
    }
}
