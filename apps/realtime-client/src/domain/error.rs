//! Client Error Taxonomy
//!
//! One error type shared by the connection client, its correlation table and
//! the topic bus. It is `Clone` because a single failure rejects every
//! waiter on a connection.

/// Errors surfaced by the realtime client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure: refused connection, abrupt close, write failure.
    #[error("network error: {0}")]
    Network(String),

    /// Handshake or keepalive deadline missed.
    #[error("request timeout: {0}")]
    RequestTimeout(String),

    /// The connection was closed by the local user.
    #[error("connection closed by the user")]
    ClosedByUser,

    /// A frame could not be decompressed or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The transport cannot perform the requested capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Error reported by the venue itself, passed through untouched.
    #[error("exchange error: {0}")]
    Exchange(String),
}

impl ClientError {
    /// Normalize an arbitrary transport failure into a network error.
    #[must_use]
    pub fn network(error: impl std::fmt::Display) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        Self::network(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_network_errors() {
        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(
            ClientError::from(error),
            ClientError::Network("reset by peer".to_string())
        );
    }

    #[test]
    fn json_errors_become_codec_errors() {
        let error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ClientError::from(error), ClientError::Codec(_)));
    }

    #[test]
    fn display_includes_detail() {
        let error = ClientError::Network("connection reset".to_string());
        assert_eq!(error.to_string(), "network error: connection reset");
    }
}
