//! # Peerwire Transport
//!
//! Transport capability for the Peerwire session layer.
//!
//! This crate provides:
//! - [`PeerIdentity`], the totally-ordered participant identifier
//! - The [`Transport`] trait: advertise, browse, invite, send data, send resources
//! - Typed transport notifications pushed onto channels
//!   ([`Invitation`], [`DiscoveryEvent`], [`SessionEvent`])
//! - [`LocalNetwork`], an in-process backend used by tests and demos
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Transport                                 │
//! │   advertise / browse / invite / send / send_resource            │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │   Invitation chan    │  DiscoveryEvent chan │ SessionEvent chan │
//! │   (advertiser)       │  (browser)           │ (session)         │
//! └──────────────────────┴──────────────────────┴───────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod identity;
pub mod local;
pub mod progress;
pub mod transport;

pub use identity::PeerIdentity;
pub use local::{LocalNetwork, LocalTransport};
pub use progress::{ResourceProgress, ResourceStatus};
pub use transport::{
    DiscoveryEvent, DiscoveryInfo, Invitation, PeerState, ResourceTransfer, SessionEvent,
    Transport, TransportError, TransportResult, TransportStats,
};

/// Default timeout for an outstanding invitation
pub const DEFAULT_INVITE_TIMEOUT_SECS: u64 = 30;
