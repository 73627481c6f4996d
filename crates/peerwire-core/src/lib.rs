//! # Peerwire Core
//!
//! Connection negotiation and event dispatch for nearby-peer sessions.
//!
//! This crate provides:
//! - Invitation arbitration (only the peer with the larger order key accepts)
//! - Advertiser, Browser and Session over any [`Transport`]
//! - Event encoding and decoding ([`Value`] payloads, bincode wire format)
//! - Handler registry and dispatch on a single callback task
//! - [`Transceiver`], which composes all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Transceiver                               │
//! │   (start/stop, send_event, send_resource, handler registration) │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │     Advertiser       │       Browser        │      Session      │
//! │  (arbitrate invites) │  (invite found peers)│  (ordered sends)  │
//! ├──────────────────────┴──────────────────────┴───────────────────┤
//! │                        Dispatcher                                │
//! │   (decode events, route to handlers on the dispatch task)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     Transport (trait)                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advertiser;
pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod session;
pub mod transceiver;
pub mod value;

pub use advertiser::{Advertiser, should_accept};
pub use browser::Browser;
pub use config::{TransceiverConfig, validate_service_type};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{CodecError, CoreError, ResourceError, Result};
pub use event::{DEFAULT_MAX_EVENT_SIZE, Envelope, EventCodec, decode_event, encode_event};
pub use handlers::{AnyEventHandler, EventHandler, HandlerRegistry, Hook, PeerHandler, ResourceHandler};
pub use session::{ResourceCompletion, Session};
pub use transceiver::Transceiver;
pub use value::{MAX_VALUE_DEPTH, Value};

pub use peerwire_transport::{
    DiscoveryEvent, DiscoveryInfo, LocalNetwork, LocalTransport, PeerIdentity, PeerState,
    ResourceProgress, ResourceStatus, SessionEvent, Transport, TransportError, TransportStats,
};
