//! Transport wrapper that records how invitations were answered
//!
//! Every invitation reaching the wrapped transport is handed on to the
//! advertiser as a fresh `Invitation`; its answer is recorded as
//! `(inviter, accepted)` and then passed back to the real inviter.

use async_trait::async_trait;
use peerwire_transport::{
    DiscoveryEvent, DiscoveryInfo, Invitation, LocalTransport, PeerIdentity, ResourceTransfer,
    SessionEvent, Transport, TransportResult, TransportStats,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// `(inviter, accepted)` for every answered invitation
pub type Answers = mpsc::UnboundedReceiver<(PeerIdentity, bool)>;

/// [`LocalTransport`] that reports invitation answers
pub struct AnswerRecorder {
    inner: LocalTransport,
    answers: mpsc::UnboundedSender<(PeerIdentity, bool)>,
}

impl AnswerRecorder {
    /// Wrap `inner`; answers arrive on the returned receiver
    pub fn new(inner: LocalTransport) -> (Self, Answers) {
        let (answers, rx) = mpsc::unbounded_channel();
        (Self { inner, answers }, rx)
    }
}

#[async_trait]
impl Transport for AnswerRecorder {
    fn local_peer(&self) -> &PeerIdentity {
        self.inner.local_peer()
    }

    async fn start_advertising(
        &self,
        service_type: &str,
        info: Option<DiscoveryInfo>,
        invitations: mpsc::UnboundedSender<Invitation>,
    ) -> TransportResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Invitation>();
        let answers = self.answers.clone();

        tokio::spawn(async move {
            while let Some(original) = rx.recv().await {
                let from = original.from().clone();
                let (relayed, answer) =
                    Invitation::new(from.clone(), original.context().map(<[u8]>::to_vec));
                if invitations.send(relayed).is_err() {
                    break;
                }

                let accepted = answer.await.unwrap_or(false);
                let _ = answers.send((from, accepted));
                if accepted {
                    original.accept();
                } else {
                    original.decline();
                }
            }
        });

        self.inner.start_advertising(service_type, info, tx).await
    }

    async fn stop_advertising(&self) {
        self.inner.stop_advertising().await;
    }

    async fn start_browsing(
        &self,
        service_type: &str,
        discoveries: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> TransportResult<()> {
        self.inner.start_browsing(service_type, discoveries).await
    }

    async fn stop_browsing(&self) {
        self.inner.stop_browsing().await;
    }

    fn attach_session(&self, events: mpsc::UnboundedSender<SessionEvent>) {
        self.inner.attach_session(events);
    }

    fn detach_session(&self) {
        self.inner.detach_session();
    }

    async fn invite(
        &self,
        peer: &PeerIdentity,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> TransportResult<()> {
        self.inner.invite(peer, context, timeout).await
    }

    fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.inner.connected_peers()
    }

    async fn send(&self, data: &[u8], peer: &PeerIdentity) -> TransportResult<()> {
        self.inner.send(data, peer).await
    }

    async fn send_resource(
        &self,
        path: &Path,
        name: &str,
        peer: &PeerIdentity,
    ) -> TransportResult<ResourceTransfer> {
        self.inner.send_resource(path, name, peer).await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}
