//! Transport trait abstraction for multiple transport backends.
//!
//! This module defines the core `Transport` trait: the capability a local
//! network backend offers to the session layer. Backends push their
//! notifications onto channels handed to them by the caller instead of
//! invoking delegate callbacks, so consumers can drain them from a single
//! task.

use crate::identity::PeerIdentity;
use crate::progress::ResourceProgress;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Flat string metadata broadcast alongside an advertisement
pub type DiscoveryInfo = BTreeMap<String, String>;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Peer is not connected to this session
    #[error("Peer not connected: {0}")]
    NotConnected(String),

    /// Peer is unknown or no longer advertising
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Connection state of a remote peer as seen by the local session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Not (or no longer) connected
    NotConnected,
    /// Invitation in flight
    Connecting,
    /// Connected; data may flow
    Connected,
}

/// Browse-side notification
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// An advertising peer became visible
    Found {
        /// Advertising peer
        peer: PeerIdentity,
        /// Metadata broadcast with the advertisement
        info: Option<DiscoveryInfo>,
    },
    /// A previously found peer stopped advertising
    Lost {
        /// Peer that went away
        peer: PeerIdentity,
    },
}

/// Session-side notification
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection state of `peer` changed
    StateChanged {
        /// Remote peer
        peer: PeerIdentity,
        /// New state
        state: PeerState,
    },
    /// Raw bytes arrived from `peer`
    Data {
        /// Sending peer
        peer: PeerIdentity,
        /// Payload as received
        data: Vec<u8>,
    },
    /// A resource from `peer` has been written to `local_path`
    ResourceFinished {
        /// Sending peer
        peer: PeerIdentity,
        /// Name the resource was sent under
        name: String,
        /// Where the received copy lives
        local_path: PathBuf,
    },
}

/// Incoming connection invitation.
///
/// Exactly one of [`Invitation::accept`] or [`Invitation::decline`] answers it;
/// dropping it unanswered counts as a decline.
#[derive(Debug)]
pub struct Invitation {
    from: PeerIdentity,
    context: Option<Vec<u8>>,
    reply: oneshot::Sender<bool>,
}

impl Invitation {
    /// Create an invitation and the receiver its answer arrives on
    pub fn new(from: PeerIdentity, context: Option<Vec<u8>>) -> (Self, oneshot::Receiver<bool>) {
        let (reply, answer) = oneshot::channel();
        (
            Self {
                from,
                context,
                reply,
            },
            answer,
        )
    }

    /// Inviting peer
    pub fn from(&self) -> &PeerIdentity {
        &self.from
    }

    /// Opaque context attached by the inviter
    pub fn context(&self) -> Option<&[u8]> {
        self.context.as_deref()
    }

    /// Join the inviter to the local session
    pub fn accept(self) {
        let _ = self.reply.send(true);
    }

    /// Decline without notifying the inviter beyond what the transport does
    pub fn decline(self) {
        let _ = self.reply.send(false);
    }
}

/// Handle for one outgoing resource transfer
#[derive(Debug)]
pub struct ResourceTransfer {
    /// Latest progress snapshot
    pub progress: watch::Receiver<ResourceProgress>,
    /// Resolves once the transfer finished or failed
    pub completion: oneshot::Receiver<TransportResult<()>>,
}

/// Async transport trait for nearby-peer sessions.
///
/// A transport instance belongs to exactly one local peer. Notifications are
/// delivered on the channels passed to [`Transport::start_advertising`],
/// [`Transport::start_browsing`] and [`Transport::attach_session`]; the
/// transport never blocks on them.
///
/// # Examples
///
/// ```no_run
/// use peerwire_transport::{LocalNetwork, PeerIdentity, Transport};
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let network = LocalNetwork::new();
/// let transport = network.join(PeerIdentity::new("kitchen-ipad"));
///
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// transport.start_browsing("cards", tx).await?;
/// while let Some(event) = rx.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the local peer
    fn local_peer(&self) -> &PeerIdentity;

    /// Start broadcasting under `service_type`, replacing any prior broadcast.
    ///
    /// Incoming invitations are pushed onto `invitations`.
    ///
    /// # Errors
    /// Returns `TransportError` if the advertisement cannot be registered
    async fn start_advertising(
        &self,
        service_type: &str,
        info: Option<DiscoveryInfo>,
        invitations: mpsc::UnboundedSender<Invitation>,
    ) -> TransportResult<()>;

    /// Stop broadcasting. No-op when not advertising.
    async fn stop_advertising(&self);

    /// Start looking for peers advertising `service_type`.
    ///
    /// # Errors
    /// Returns `TransportError` if browsing cannot be started
    async fn start_browsing(
        &self,
        service_type: &str,
        discoveries: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> TransportResult<()>;

    /// Stop browsing. No-op when not browsing.
    async fn stop_browsing(&self);

    /// Route session notifications to `events`, replacing any prior sink.
    fn attach_session(&self, events: mpsc::UnboundedSender<SessionEvent>);

    /// Stop routing session notifications.
    fn detach_session(&self);

    /// Invite `peer` into the local session.
    ///
    /// Returns once the invitation is delivered; the outcome arrives later as
    /// [`SessionEvent::StateChanged`].
    ///
    /// # Errors
    /// Returns `TransportError::UnknownPeer` if the peer is not advertising
    async fn invite(
        &self,
        peer: &PeerIdentity,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> TransportResult<()>;

    /// Peers currently connected to the local session
    fn connected_peers(&self) -> Vec<PeerIdentity>;

    /// Send `data` reliably and in order to one connected peer.
    ///
    /// # Errors
    /// Returns `TransportError::NotConnected` if the peer is not connected
    async fn send(&self, data: &[u8], peer: &PeerIdentity) -> TransportResult<()>;

    /// Start sending the file at `path` to `peer` under `name`.
    ///
    /// # Errors
    /// Returns `TransportError` if the transfer cannot be started
    async fn send_resource(
        &self,
        path: &Path,
        name: &str,
        peer: &PeerIdentity,
    ) -> TransportResult<ResourceTransfer>;

    /// Leave the session: drop every connection.
    async fn disconnect(&self);

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Resource transfers started
    pub resources_sent: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.messages_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    /// Record a started resource transfer
    pub fn record_resource(&mut self) {
        self.resources_sent += 1;
    }

    /// Total transport operations attempted (sends, errors, resources)
    pub fn operations(&self) -> u64 {
        self.messages_sent + self.send_errors + self.resources_sent
    }
}
