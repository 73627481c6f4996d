//! Session: the send side of a set of connected peers.
//!
//! Events are encoded once and queued; a writer task hands them to the
//! transport peer by peer, in queue order. Failures are logged at `debug`
//! and otherwise ignored. Resource completions are not run on transport
//! tasks: they are posted to the deferred-callback queue that the
//! transceiver's dispatch loop drains alongside incoming notifications.

use crate::error::ResourceError;
use crate::event::EventCodec;
use crate::value::Value;
use peerwire_transport::{PeerIdentity, ResourceProgress, Transport};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Callback run on the dispatch context
pub type Deferred = Box<dyn FnOnce() + Send>;

/// Per-peer resource completion: `(peer, error)`; `None` means success
pub type ResourceCompletion = Arc<dyn Fn(&PeerIdentity, Option<ResourceError>) + Send + Sync>;

struct Outbound {
    data: Vec<u8>,
    peers: Vec<PeerIdentity>,
}

/// Connected-peer session
pub struct Session {
    transport: Arc<dyn Transport>,
    codec: EventCodec,
    outbound: mpsc::UnboundedSender<Outbound>,
    deferred: mpsc::UnboundedSender<Deferred>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Create a session over `transport`, posting completions to `deferred`
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: EventCodec,
        deferred: mpsc::UnboundedSender<Deferred>,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(Arc::clone(&transport), rx));
        Self {
            transport,
            codec,
            outbound,
            deferred,
            writer,
        }
    }

    /// Peers currently connected
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.transport.connected_peers()
    }

    /// Explicit lists keep first-seen order with duplicates removed
    fn resolve(&self, peers: Option<&[PeerIdentity]>) -> Vec<PeerIdentity> {
        match peers {
            Some(peers) => {
                let mut seen = HashSet::with_capacity(peers.len());
                peers
                    .iter()
                    .filter(|peer| seen.insert(*peer))
                    .cloned()
                    .collect()
            }
            None => self.connected_peers(),
        }
    }

    /// Queue `event` for every peer in `peers` (all connected peers when
    /// `None`). Returns how many peers the event was queued for.
    pub fn send(&self, event: &str, object: Option<&Value>, peers: Option<&[PeerIdentity]>) -> usize {
        let peers = self.resolve(peers);
        if peers.is_empty() {
            return 0;
        }

        let data = match self.codec.encode(event, object) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Dropping event '{}': {}", event, e);
                return 0;
            }
        };

        let count = peers.len();
        tracing::debug!("Sending '{}' ({} bytes) to {} peer(s)", event, data.len(), count);
        if self.outbound.send(Outbound { data, peers }).is_err() {
            tracing::debug!("Session writer gone, dropping '{}'", event);
            return 0;
        }
        count
    }

    /// Start one transfer of the file at `path` per resolved peer.
    ///
    /// Returns a progress receiver per peer, in peer order; `None` where the
    /// transfer could not be started (the completion then reports why).
    pub async fn send_resource(
        &self,
        path: &Path,
        name: &str,
        peers: Option<&[PeerIdentity]>,
        on_complete: ResourceCompletion,
    ) -> Vec<Option<watch::Receiver<ResourceProgress>>> {
        let peers = self.resolve(peers);
        let mut handles = Vec::with_capacity(peers.len());

        for peer in peers {
            match self.transport.send_resource(path, name, &peer).await {
                Ok(transfer) => {
                    tracing::debug!("Sending resource '{}' to {}", name, peer);
                    handles.push(Some(transfer.progress));

                    let deferred = self.deferred.clone();
                    let on_complete = Arc::clone(&on_complete);
                    tokio::spawn(async move {
                        let error = match transfer.completion.await {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(ResourceError::Transport(e)),
                            Err(_) => Some(ResourceError::Cancelled),
                        };
                        post_completion(&deferred, on_complete, peer, error);
                    });
                }
                Err(e) => {
                    tracing::debug!("Resource '{}' to {} not started: {}", name, peer, e);
                    handles.push(None);
                    post_completion(
                        &self.deferred,
                        Arc::clone(&on_complete),
                        peer,
                        Some(ResourceError::Transport(e)),
                    );
                }
            }
        }

        handles
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

fn post_completion(
    deferred: &mpsc::UnboundedSender<Deferred>,
    on_complete: ResourceCompletion,
    peer: PeerIdentity,
    error: Option<ResourceError>,
) {
    let callback: Deferred = Box::new(move || on_complete(&peer, error));
    // Closed queue: the transceiver stopped, the completion is dropped
    let _ = deferred.send(callback);
}

async fn write_loop(transport: Arc<dyn Transport>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound { data, peers }) = outbound.recv().await {
        for peer in &peers {
            if let Err(e) = transport.send(&data, peer).await {
                tracing::debug!("Send to {} failed: {}", peer, e);
            }
        }
    }
}
