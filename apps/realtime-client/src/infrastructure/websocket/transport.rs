//! WebSocket Transport Adapter
//!
//! [`Transport`] implementation over tokio-tungstenite with rustls. The
//! socket is split into a sink half (wrapped as [`TransportSink`]) and a read
//! half mapped onto [`TransportEvent`]s.

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    CloseEvent, Frame, Transport, TransportEvent, TransportEvents, TransportOptions, TransportSink,
};
use crate::domain::error::ClientError;

/// Close code reported when the peer sent a close frame without a code.
const CLOSE_NO_STATUS: u16 = 1005;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<(Box<dyn TransportSink>, TransportEvents), ClientError> {
        let mut request = url.into_client_request().map_err(ClientError::network)?;
        let headers = request.headers_mut();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(ClientError::network)?;
            let value = HeaderValue::from_str(value).map_err(ClientError::network)?;
            headers.insert(name, value);
        }
        if !options.protocols.is_empty() {
            let protocols = HeaderValue::from_str(&options.protocols.join(", "))
                .map_err(ClientError::network)?;
            headers.insert("Sec-WebSocket-Protocol", protocols);
        }

        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(ClientError::network)?;
        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();
        let events = read
            .filter_map(|message| futures::future::ready(into_event(message)))
            .boxed();
        Ok((Box::new(TungsteniteSink { write }), events))
    }
}

fn into_event(message: Result<Message, tungstenite::Error>) -> Option<TransportEvent> {
    let event = match message {
        Ok(Message::Text(text)) => TransportEvent::Message(Frame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(data)) => TransportEvent::Message(Frame::Binary(data.to_vec())),
        Ok(Message::Ping(data)) => TransportEvent::Ping(data.to_vec()),
        Ok(Message::Pong(data)) => TransportEvent::Pong(data.to_vec()),
        Ok(Message::Close(frame)) => TransportEvent::Close(frame.map_or_else(
            || CloseEvent::new(CLOSE_NO_STATUS, ""),
            |frame| CloseEvent::new(u16::from(frame.code), frame.reason.as_str()),
        )),
        Ok(Message::Frame(_)) => return None,
        Err(tungstenite::Error::ConnectionClosed) => {
            TransportEvent::Close(CloseEvent::abnormal("connection closed"))
        }
        Err(error) => TransportEvent::Error(ClientError::network(error)),
    };
    Some(event)
}

struct TungsteniteSink {
    write: SplitSink<Socket, Message>,
}

#[async_trait]
impl TransportSink for TungsteniteSink {
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        self.write.send(message).await.map_err(ClientError::network)
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        self.write
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(ClientError::network)
    }

    async fn pong(&mut self, data: Vec<u8>) -> Result<(), ClientError> {
        self.write
            .send(Message::Pong(data.into()))
            .await
            .map_err(ClientError::network)
    }

    async fn close(&mut self, code: u16) -> Result<(), ClientError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: String::new().into(),
        };
        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(ClientError::network)
    }

    fn exposes_control_frames(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_become_frames() {
        assert_eq!(
            into_event(Ok(Message::Text("hi".into()))),
            Some(TransportEvent::Message(Frame::Text("hi".to_string())))
        );
        assert_eq!(
            into_event(Ok(Message::Binary(vec![1, 2].into()))),
            Some(TransportEvent::Message(Frame::Binary(vec![1, 2])))
        );
    }

    #[test]
    fn close_without_frame_has_no_status_code() {
        assert_eq!(
            into_event(Ok(Message::Close(None))),
            Some(TransportEvent::Close(CloseEvent::new(1005, "")))
        );
    }

    #[test]
    fn close_frame_code_is_kept() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        };
        assert_eq!(
            into_event(Ok(Message::Close(Some(frame)))),
            Some(TransportEvent::Close(CloseEvent::new(1001, "maintenance")))
        );
    }

    #[test]
    fn read_errors_are_network_errors() {
        let event = into_event(Err(tungstenite::Error::AlreadyClosed));
        assert!(matches!(
            event,
            Some(TransportEvent::Error(ClientError::Network(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_url_fails_before_connecting() {
        let result = TungsteniteTransport::new()
            .open("not a url", &TransportOptions::default())
            .await;
        assert!(matches!(result, Err(ClientError::Network(_))));
    }
}
