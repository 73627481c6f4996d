//! Advertiser: announces the local peer and arbitrates invitations.
//!
//! When two peers discover each other they invite each other at about the
//! same time. Only the peer with the larger order key accepts, so exactly
//! one session forms no matter which invitation arrives first.

use peerwire_transport::{DiscoveryInfo, Invitation, PeerIdentity, Transport, TransportResult};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Whether `local` accepts an invitation from `remote`
pub fn should_accept(local: &PeerIdentity, remote: &PeerIdentity) -> bool {
    local.order_key() > remote.order_key()
}

/// Broadcasts the local peer and answers invitations
pub struct Advertiser {
    transport: Arc<dyn Transport>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Advertiser {
    /// Create an idle advertiser
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            task: Mutex::new(None),
        }
    }

    /// Start advertising under `service_type`, replacing any prior broadcast
    ///
    /// # Errors
    ///
    /// Returns the transport error if the broadcast could not be registered.
    pub async fn start(&self, service_type: &str, info: Option<DiscoveryInfo>) -> TransportResult<()> {
        self.abort_task();

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.start_advertising(service_type, info, tx).await?;

        let handle = tokio::spawn(arbitrate(Arc::clone(&self.transport), rx));
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }

        tracing::info!(
            "{} advertising '{}'",
            self.transport.local_peer(),
            service_type
        );
        Ok(())
    }

    /// Stop advertising. No-op when not advertising.
    pub async fn stop(&self) {
        if self.abort_task() {
            self.transport.stop_advertising().await;
            tracing::debug!("{} stopped advertising", self.transport.local_peer());
        }
    }

    /// Whether the arbitration task is still running
    pub fn is_advertising(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
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

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Answer invitations until one is accepted, then stop advertising
async fn arbitrate(transport: Arc<dyn Transport>, mut invitations: mpsc::UnboundedReceiver<Invitation>) {
    let local = transport.local_peer().clone();

    while let Some(invitation) = invitations.recv().await {
        let remote = invitation.from().clone();
        if should_accept(&local, &remote) {
            tracing::info!("{} accepting invitation from {}", local, remote);
            invitation.accept();
            transport.stop_advertising().await;
            break;
        }

        tracing::debug!("{} declining invitation from {}", local, remote);
        invitation.decline();
    }
}
