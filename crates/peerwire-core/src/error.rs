//! Error types for the Peerwire core.
//!
//! Nothing in the core is fatal. Configuration and start-up problems surface as
//! [`CoreError`]; event codec failures as [`CodecError`] (the dispatcher drops
//! them silently); resource transfer failures reach the per-transfer
//! completion callback as [`ResourceError`].

use peerwire_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Service type rejected by validation
    #[error("Invalid service type '{service_type}': {reason}")]
    InvalidServiceType {
        /// Offending service type
        service_type: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Event codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),

    /// Input is not a valid event encoding
    #[error("decode failed: {0}")]
    Decode(String),

    /// Encoded event exceeds the configured limit
    #[error("event too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Encoded size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// Payload nests deeper than the decoder accepts
    #[error("payload nesting depth {depth} exceeds {max}")]
    TooDeep {
        /// Depth of the payload
        depth: usize,
        /// Maximum accepted depth
        max: usize,
    },
}

/// Resource transfer errors, reported through the completion callback
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Transport refused or aborted the transfer
    #[error("resource transfer failed: {0}")]
    Transport(#[from] TransportError),

    /// Transfer ended without a result (transport went away)
    #[error("resource transfer cancelled")]
    Cancelled,
}
