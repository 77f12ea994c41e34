//! In-Memory Transport
//!
//! Loopback [`Transport`] for tests and simulations. Every `open` hands a
//! [`MemoryPeer`] to the paired [`MemoryServer`], which can push events to the
//! client and read what the client wrote.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::{
    CloseEvent, Frame, Transport, TransportEvent, TransportEvents, TransportOptions, TransportSink,
};
use crate::domain::error::ClientError;

/// How the next handshake behaves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Handshake {
    /// Open immediately.
    #[default]
    Accept,
    /// Fail with the error.
    Reject(ClientError),
    /// Never complete.
    Hang,
}

/// Something the client wrote to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    /// Data frame.
    Frame(Frame),
    /// Protocol ping.
    Ping,
    /// Protocol pong.
    Pong(Vec<u8>),
    /// Close request with code.
    Close(u16),
}

/// Capabilities reported by the in-memory sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCapabilities {
    /// Whether protocol ping/pong reach the peer.
    pub control_frames: bool,
    /// Whether sends complete only once written.
    pub confirms_writes: bool,
}

impl Default for MemoryCapabilities {
    fn default() -> Self {
        Self {
            control_frames: true,
            confirms_writes: true,
        }
    }
}

struct Shared {
    handshake: Mutex<Handshake>,
    capabilities: MemoryCapabilities,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    opened: Mutex<Vec<(String, TransportOptions)>>,
}

/// Client side of the loopback.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Server side of the loopback.
pub struct MemoryServer {
    shared: Arc<Shared>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// One accepted session, seen from the server.
pub struct MemoryPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    written: mpsc::UnboundedReceiver<Written>,
}

impl MemoryTransport {
    /// Create a transport and its server with default capabilities.
    #[must_use]
    pub fn pair() -> (Self, MemoryServer) {
        Self::with_capabilities(MemoryCapabilities::default())
    }

    /// Create a transport and its server.
    #[must_use]
    pub fn with_capabilities(capabilities: MemoryCapabilities) -> (Self, MemoryServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            handshake: Mutex::new(Handshake::Accept),
            capabilities,
            peers: peers_tx,
            opened: Mutex::new(Vec::new()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryServer {
                shared,
                peers: peers_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<(Box<dyn TransportSink>, TransportEvents), ClientError> {
        self.shared
            .opened
            .lock()
            .push((url.to_string(), options.clone()));
        let handshake = self.shared.handshake.lock().clone();
        match handshake {
            Handshake::Accept => {}
            Handshake::Reject(error) => return Err(error),
            Handshake::Hang => std::future::pending::<()>().await,
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        self.shared
            .peers
            .send(MemoryPeer {
                events: events_tx,
                written: written_rx,
            })
            .map_err(|_| ClientError::Network("memory server is gone".to_string()))?;

        let sink = MemorySink {
            written: written_tx,
            capabilities: self.shared.capabilities,
        };
        Ok((
            Box::new(sink),
            UnboundedReceiverStream::new(events_rx).boxed(),
        ))
    }
}

impl MemoryServer {
    /// Set how subsequent handshakes behave.
    pub fn set_handshake(&self, handshake: Handshake) {
        *self.shared.handshake.lock() = handshake;
    }

    /// Wait for the next accepted session.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// URLs and options of every `open` call so far.
    #[must_use]
    pub fn opened(&self) -> Vec<(String, TransportOptions)> {
        self.shared.opened.lock().clone()
    }
}

impl MemoryPeer {
    /// Deliver an event to the client. Returns false once the client is gone.
    pub fn push(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Deliver a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(TransportEvent::Message(Frame::Text(text.into())))
    }

    /// Deliver a close event.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.push(TransportEvent::Close(CloseEvent::new(code, reason)))
    }

    /// Next thing the client wrote, `None` once the client dropped its sink.
    pub async fn next_written(&mut self) -> Option<Written> {
        self.written.recv().await
    }

    /// Next data frame the client wrote, skipping control frames.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(written) = self.written.recv().await {
            if let Written::Frame(frame) = written {
                return Some(frame);
            }
        }
        None
    }
}

struct MemorySink {
    written: mpsc::UnboundedSender<Written>,
    capabilities: MemoryCapabilities,
}

impl MemorySink {
    fn write(&self, written: Written) -> Result<(), ClientError> {
        self.written
            .send(written)
            .map_err(|_| ClientError::Network("memory peer is gone".to_string()))
    }
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        self.write(Written::Frame(frame))
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        if !self.capabilities.control_frames {
            return Err(ClientError::NotSupported("ping".to_string()));
        }
        self.write(Written::Ping)
    }

    async fn pong(&mut self, data: Vec<u8>) -> Result<(), ClientError> {
        if !self.capabilities.control_frames {
            return Err(ClientError::NotSupported("pong".to_string()));
        }
        self.write(Written::Pong(data))
    }

    async fn close(&mut self, code: u16) -> Result<(), ClientError> {
        self.write(Written::Close(code))
    }

    fn exposes_control_frames(&self) -> bool {
        self.capabilities.control_frames
    }

    fn confirms_writes(&self) -> bool {
        self.capabilities.confirms_writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut server) = MemoryTransport::pair();
        let (mut sink, mut events) = transport
            .open("memory://venue", &TransportOptions::default())
            .await
            .unwrap();
        let mut peer = server.accept().await.unwrap();

        sink.send(Frame::Text("hello".to_string())).await.unwrap();
        assert_eq!(
            peer.next_frame().await,
            Some(Frame::Text("hello".to_string()))
        );

        assert!(peer.send_text("world"));
        assert_eq!(
            events.next().await,
            Some(TransportEvent::Message(Frame::Text("world".to_string())))
        );
        assert_eq!(server.opened()[0].0, "memory://venue");
    }

    #[tokio::test]
    async fn rejected_handshake() {
        let (transport, server) = MemoryTransport::pair();
        server.set_handshake(Handshake::Reject(ClientError::Network("refused".to_string())));
        let result = transport
            .open("memory://venue", &TransportOptions::default())
            .await;
        assert!(matches!(result, Err(ClientError::Network(_))));
    }

    #[tokio::test]
    async fn ping_without_control_frames_is_not_supported() {
        let (transport, _server) = MemoryTransport::with_capabilities(MemoryCapabilities {
            control_frames: false,
            confirms_writes: true,
        });
        let (mut sink, _events) = transport
            .open("memory://venue", &TransportOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            sink.ping().await,
            Err(ClientError::NotSupported(_))
        ));
    }
}
