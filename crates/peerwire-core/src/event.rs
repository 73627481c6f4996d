//! Event encoding and decoding.
//!
//! An event travels as one opaque blob: the bincode encoding (varint
//! integers, little endian, trailing bytes rejected) of
//! `Envelope { event, object }`. There is no version field; schema evolution
//! is done through event names.

use crate::error::CodecError;
use crate::value::{MAX_VALUE_DEPTH, Value};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Default upper bound for one encoded event (16 MiB)
pub const DEFAULT_MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;

/// Decoded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Optional payload
    pub object: Option<Value>,
}

impl Envelope {
    /// Create an envelope
    pub fn new(event: impl Into<String>, object: Option<Value>) -> Self {
        Self {
            event: event.into(),
            object,
        }
    }
}

/// Borrowed form with the same wire layout as [`Envelope`]
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    event: &'a str,
    object: Option<&'a Value>,
}

/// Event codec with a size limit
#[derive(Debug, Clone, Copy)]
pub struct EventCodec {
    max_event_size: usize,
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENT_SIZE)
    }
}

impl EventCodec {
    /// Create a codec rejecting blobs above `max_event_size` bytes
    pub fn new(max_event_size: usize) -> Self {
        Self { max_event_size }
    }

    /// Configured size limit
    pub fn max_event_size(&self) -> usize {
        self.max_event_size
    }

    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_little_endian()
            .with_varint_encoding()
            .reject_trailing_bytes()
    }

    /// Encode `(event, object)` into a single blob
    ///
    /// # Errors
    ///
    /// Returns `CodecError::TooLarge` above the size limit and
    /// `CodecError::TooDeep` for payloads the decoder would refuse.
    pub fn encode(&self, event: &str, object: Option<&Value>) -> Result<Vec<u8>, CodecError> {
        if let Some(depth) = object.map(Value::depth) {
            if depth > MAX_VALUE_DEPTH {
                return Err(CodecError::TooDeep {
                    depth,
                    max: MAX_VALUE_DEPTH,
                });
            }
        }

        let envelope = EnvelopeRef { event, object };
        let size = Self::options()
            .serialized_size(&envelope)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        if size > self.max_event_size as u64 {
            return Err(CodecError::TooLarge {
                size,
                limit: self.max_event_size as u64,
            });
        }

        Self::options()
            .serialize(&envelope)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a blob received from a peer
    ///
    /// # Errors
    ///
    /// Returns `CodecError` for anything that is not a complete, well-formed
    /// encoding within the size limit.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, CodecError> {
        if data.len() > self.max_event_size {
            return Err(CodecError::TooLarge {
                size: data.len() as u64,
                limit: self.max_event_size as u64,
            });
        }

        Self::options()
            .with_limit(self.max_event_size as u64)
            .deserialize(data)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Encode with the default codec
///
/// # Errors
///
/// See [`EventCodec::encode`].
pub fn encode_event(event: &str, object: Option<&Value>) -> Result<Vec<u8>, CodecError> {
    EventCodec::default().encode(event, object)
}

/// Decode with the default codec
///
/// # Errors
///
/// See [`EventCodec::decode`].
pub fn decode_event(data: &[u8]) -> Result<Envelope, CodecError> {
    EventCodec::default().decode(data)
}
