//! Frame Codec
//!
//! Turns inbound frames into JSON values and outbound values into frames.
//!
//! # Inbound
//!
//! 1. Binary frames are decompressed per [`Decompression`] and read as UTF-8.
//! 2. Text that looks like a JSON object or array literal is parsed after
//!    quoting integers of 15 or more digits that precede a comma, so order
//!    ids and nonces beyond `f64` precision survive as strings.
//! 3. Anything else is handed on as [`Value::String`].
//!
//! # Outbound
//!
//! Strings are sent verbatim, every other value is serialized with
//! `serde_json`.

use std::borrow::Cow;
use std::io::Read;
use std::sync::OnceLock;

use flate2::read::{DeflateDecoder, GzDecoder};
use regex::Regex;
use serde_json::Value;

use crate::application::ports::Frame;
use crate::domain::error::ClientError;
use crate::infrastructure::config::Decompression;

/// Stateless frame codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec {
    decompression: Decompression,
}

impl FrameCodec {
    /// Create a codec applying `decompression` to binary frames.
    #[must_use]
    pub const fn new(decompression: Decompression) -> Self {
        Self { decompression }
    }

    /// Configured decompression mode.
    #[must_use]
    pub const fn decompression(&self) -> Decompression {
        self.decompression
    }

    /// Decode an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] if decompression fails, the payload is
    /// not UTF-8, or a JSON-looking payload does not parse.
    pub fn decode(&self, frame: &Frame) -> Result<Value, ClientError> {
        match frame {
            Frame::Text(text) => decode_text(text),
            Frame::Binary(bytes) => {
                let bytes = self.decompress(bytes)?;
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| ClientError::Codec(format!("frame is not UTF-8: {e}")))?;
                decode_text(text)
            }
        }
    }

    /// Encode an outbound value as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] if serialization fails.
    pub fn encode(&self, message: &Value) -> Result<Frame, ClientError> {
        match message {
            Value::String(text) => Ok(Frame::Text(text.clone())),
            other => Ok(Frame::Text(serde_json::to_string(other)?)),
        }
    }

    fn decompress<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, [u8]>, ClientError> {
        let mut out = Vec::new();
        let result = match self.decompression {
            Decompression::None => return Ok(Cow::Borrowed(bytes)),
            Decompression::Inflate => DeflateDecoder::new(bytes).read_to_end(&mut out),
            Decompression::Gzip => GzDecoder::new(bytes).read_to_end(&mut out),
        };
        result.map_err(|e| {
            ClientError::Codec(format!(
                "{} decompression failed: {e}",
                self.decompression.as_str()
            ))
        })?;
        Ok(Cow::Owned(out))
    }
}

/// Whether `text` opens like a JSON object or array literal.
#[must_use]
pub fn is_json_encoded_object(text: &str) -> bool {
    text.len() >= 2 && (text.starts_with('{') || text.starts_with('['))
}

/// Quote `:<15+ digits>,` so the integer is kept exactly as a string.
#[must_use]
#[allow(clippy::expect_used)]
pub fn quote_big_integers(text: &str) -> Cow<'_, str> {
    static BIG_INTEGER: OnceLock<Regex> = OnceLock::new();
    // constant pattern
    let pattern = BIG_INTEGER.get_or_init(|| {
        Regex::new(r":(\d{15,}),").expect("big integer pattern is a valid regex")
    });
    pattern.replace_all(text, r#":"${1}","#)
}

fn decode_text(text: &str) -> Result<Value, ClientError> {
    if !is_json_encoded_object(text) {
        return Ok(Value::String(text.to_string()));
    }
    let rewritten = quote_big_integers(text);
    Ok(serde_json::from_str(&rewritten)?)
}
