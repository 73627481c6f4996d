//! Browser: discovers advertising peers and invites them.

use dashmap::DashSet;
use peerwire_transport::{DiscoveryEvent, PeerIdentity, Transport, TransportResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Looks for peers and invites each one once
pub struct Browser {
    transport: Arc<dyn Transport>,
    invite_timeout: Duration,
    pending: Arc<DashSet<PeerIdentity>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Browser {
    /// Create an idle browser
    pub fn new(transport: Arc<dyn Transport>, invite_timeout: Duration) -> Self {
        Self {
            transport,
            invite_timeout,
            pending: Arc::new(DashSet::new()),
            task: Mutex::new(None),
        }
    }

    /// Start browsing for `service_type`, replacing any prior browse
    ///
    /// # Errors
    ///
    /// Returns the transport error if browsing could not be started.
    pub async fn start(&self, service_type: &str) -> TransportResult<()> {
        self.abort_task();
        self.pending.clear();

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.start_browsing(service_type, tx).await?;

        let handle = tokio::spawn(browse(
            Arc::clone(&self.transport),
            Arc::clone(&self.pending),
            self.invite_timeout,
            rx,
        ));
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }

        tracing::info!(
            "{} browsing for '{}'",
            self.transport.local_peer(),
            service_type
        );
        Ok(())
    }

    /// Stop browsing. No-op when not browsing.
    pub async fn stop(&self) {
        if self.abort_task() {
            self.transport.stop_browsing().await;
            self.pending.clear();
            tracing::debug!("{} stopped browsing", self.transport.local_peer());
        }
    }

    /// Whether browsing is active
    pub fn is_browsing(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether an invitation to `peer` is outstanding
    pub fn is_pending(&self, peer: &PeerIdentity) -> bool {
        self.pending.contains(peer)
    }

    /// Drop the outstanding invitation to `peer`, if any, so a later
    /// discovery may invite it again
    pub fn forget(&self, peer: &PeerIdentity) {
        self.pending.remove(peer);
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_task(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.abort_task();
    }
}

async fn browse(
    transport: Arc<dyn Transport>,
    pending: Arc<DashSet<PeerIdentity>>,
    invite_timeout: Duration,
    mut discoveries: mpsc::UnboundedReceiver<DiscoveryEvent>,
) {
    while let Some(event) = discoveries.recv().await {
        match event {
            DiscoveryEvent::Found { peer, .. } => {
                if transport.connected_peers().contains(&peer) {
                    continue;
                }
                if !pending.insert(peer.clone()) {
                    continue;
                }

                tracing::debug!("{} inviting {}", transport.local_peer(), peer);
                if let Err(e) = transport.invite(&peer, None, invite_timeout).await {
                    tracing::debug!("Invitation to {} failed: {}", peer, e);
                    pending.remove(&peer);
                }
            }
            DiscoveryEvent::Lost { peer } => {
                tracing::debug!("Lost {}", peer);
                pending.remove(&peer);
            }
        }
    }
}
