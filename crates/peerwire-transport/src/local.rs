//! In-process transport backend.
//!
//! [`LocalNetwork`] is a hub shared by every peer that joins it. Discovery,
//! invitations, data and resources all travel through in-memory channels, so
//! several independent peers can run inside one process (tests, simulations,
//! the CLI demo).
//!
//! Declined invitations are silent on the invitee side: the inviter only
//! learns about it through a `NotConnected` state change, the same way it
//! would after the invitation timed out.

use crate::identity::PeerIdentity;
use crate::progress::ResourceProgress;
use crate::transport::{
    DiscoveryEvent, DiscoveryInfo, Invitation, PeerState, ResourceTransfer, SessionEvent,
    Transport, TransportError, TransportResult, TransportStats,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

/// Copy granularity for resource transfers
const RESOURCE_CHUNK_SIZE: usize = 64 * 1024;

struct Advert {
    service_type: String,
    info: Option<DiscoveryInfo>,
    invitations: mpsc::UnboundedSender<Invitation>,
}

struct Browse {
    service_type: String,
    discoveries: mpsc::UnboundedSender<DiscoveryEvent>,
}

#[derive(Default)]
struct PeerSlot {
    advert: Option<Advert>,
    browse: Option<Browse>,
    session: Option<mpsc::UnboundedSender<SessionEvent>>,
    /// Set by `detach_session`; such a peer is not linked until it attaches again
    left_session: bool,
    links: BTreeSet<PeerIdentity>,
    stats: TransportStats,
    resource_dir: PathBuf,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<PeerIdentity, PeerSlot>,
}

impl HubState {
    fn notify(&self, target: &PeerIdentity, event: SessionEvent) {
        if let Some(sink) = self.peers.get(target).and_then(|slot| slot.session.as_ref()) {
            let _ = sink.send(event);
        }
    }

    fn notify_state(&self, target: &PeerIdentity, peer: &PeerIdentity, state: PeerState) {
        self.notify(
            target,
            SessionEvent::StateChanged {
                peer: peer.clone(),
                state,
            },
        );
    }

    fn browsers_of<'a>(
        &'a self,
        service_type: &'a str,
        except: &'a PeerIdentity,
    ) -> impl Iterator<Item = &'a Browse> + 'a {
        self.peers
            .iter()
            .filter(move |(id, _)| *id != except)
            .filter_map(|(_, slot)| slot.browse.as_ref())
            .filter(move |browse| browse.service_type == service_type)
    }

    fn announce(&self, advertiser: &PeerIdentity, service_type: &str, info: &Option<DiscoveryInfo>) {
        for browse in self.browsers_of(service_type, advertiser) {
            let _ = browse.discoveries.send(DiscoveryEvent::Found {
                peer: advertiser.clone(),
                info: info.clone(),
            });
        }
    }

    fn withdraw(&self, advertiser: &PeerIdentity, service_type: &str) {
        for browse in self.browsers_of(service_type, advertiser) {
            let _ = browse.discoveries.send(DiscoveryEvent::Lost {
                peer: advertiser.clone(),
            });
        }
    }

    fn can_link(&self, peer: &PeerIdentity) -> bool {
        self.peers.get(peer).is_some_and(|slot| !slot.left_session)
    }

    fn is_linked(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        self.peers.get(a).is_some_and(|slot| slot.links.contains(b))
    }

    fn unlink_all(&mut self, peer: &PeerIdentity) {
        let links = match self.peers.get_mut(peer) {
            Some(slot) => std::mem::take(&mut slot.links),
            None => return,
        };

        for other in links {
            if let Some(slot) = self.peers.get_mut(&other) {
                slot.links.remove(peer);
            }
            self.notify_state(&other, peer, PeerState::NotConnected);
            self.notify_state(peer, &other, PeerState::NotConnected);
        }
    }
}

/// In-process discovery and transport hub
pub struct LocalNetwork {
    state: Mutex<HubState>,
    resource_root: PathBuf,
}

impl LocalNetwork {
    /// Create a hub storing received resources under the system temp dir
    pub fn new() -> Arc<Self> {
        Self::with_resource_root(std::env::temp_dir().join("peerwire"))
    }

    /// Create a hub storing received resources under `root`
    pub fn with_resource_root(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            resource_root: root.into(),
        })
    }

    /// Join the hub as `identity`
    pub fn join(self: &Arc<Self>, identity: PeerIdentity) -> LocalTransport {
        let resource_dir = self
            .resource_root
            .join(format!("{:016x}", identity.order_key()));

        self.state().peers.insert(
            identity.clone(),
            PeerSlot {
                resource_dir,
                ..PeerSlot::default()
            },
        );
        tracing::debug!("{} joined local network", identity);

        LocalTransport {
            network: Arc::clone(self),
            local: identity,
        }
    }

    /// Number of peers currently joined
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self, inviter: &PeerIdentity, invitee: &PeerIdentity) {
        let mut state = self.state();

        // An accepted invitation may land after either side stopped
        if !state.can_link(inviter) || !state.can_link(invitee) {
            tracing::debug!("not linking {} <-> {}: peer gone", inviter, invitee);
            state.notify_state(inviter, invitee, PeerState::NotConnected);
            return;
        }

        if let Some(slot) = state.peers.get_mut(inviter) {
            slot.links.insert(invitee.clone());
        }
        if let Some(slot) = state.peers.get_mut(invitee) {
            slot.links.insert(inviter.clone());
        }

        state.notify_state(invitee, inviter, PeerState::Connecting);
        state.notify_state(invitee, inviter, PeerState::Connected);
        state.notify_state(inviter, invitee, PeerState::Connected);

        tracing::debug!("linked {} <-> {}", inviter, invitee);
    }

    fn deliver_resource(
        &self,
        sender: &PeerIdentity,
        receiver: &PeerIdentity,
        name: String,
        local_path: PathBuf,
    ) -> TransportResult<()> {
        let state = self.state();
        if !state.is_linked(sender, receiver) {
            let _ = std::fs::remove_file(&local_path);
            return Err(TransportError::NotConnected(receiver.to_string()));
        }

        state.notify(
            receiver,
            SessionEvent::ResourceFinished {
                peer: sender.clone(),
                name,
                local_path,
            },
        );
        Ok(())
    }

    fn leave(&self, peer: &PeerIdentity) {
        let mut state = self.state();
        state.unlink_all(peer);
        if let Some(slot) = state.peers.remove(peer) {
            if let Some(advert) = slot.advert {
                state.withdraw(peer, &advert.service_type);
            }
        }
        tracing::debug!("{} left local network", peer);
    }
}

/// One peer's handle on a [`LocalNetwork`]; leaves the hub when dropped
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    local: PeerIdentity,
}

impl LocalTransport {
    /// Directory received resources are written to
    pub fn resource_dir(&self) -> Option<PathBuf> {
        self.network
            .state()
            .peers
            .get(&self.local)
            .map(|slot| slot.resource_dir.clone())
    }

    /// Whether this peer currently advertises
    pub fn is_advertising(&self) -> bool {
        self.network
            .state()
            .peers
            .get(&self.local)
            .is_some_and(|slot| slot.advert.is_some())
    }

    /// Whether this peer currently browses
    pub fn is_browsing(&self) -> bool {
        self.network
            .state()
            .peers
            .get(&self.local)
            .is_some_and(|slot| slot.browse.is_some())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.network.leave(&self.local);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    async fn start_advertising(
        &self,
        service_type: &str,
        info: Option<DiscoveryInfo>,
        invitations: mpsc::UnboundedSender<Invitation>,
    ) -> TransportResult<()> {
        if service_type.is_empty() {
            return Err(TransportError::InvalidConfig(
                "empty service type".to_string(),
            ));
        }

        let mut state = self.network.state();
        let previous = state
            .peers
            .get_mut(&self.local)
            .ok_or(TransportError::Closed)?
            .advert
            .replace(Advert {
                service_type: service_type.to_string(),
                info: info.clone(),
                invitations,
            });

        if let Some(previous) = previous {
            state.withdraw(&self.local, &previous.service_type);
        }
        state.announce(&self.local, service_type, &info);
        Ok(())
    }

    async fn stop_advertising(&self) {
        let mut state = self.network.state();
        let previous = state
            .peers
            .get_mut(&self.local)
            .and_then(|slot| slot.advert.take());

        if let Some(previous) = previous {
            state.withdraw(&self.local, &previous.service_type);
        }
    }

    async fn start_browsing(
        &self,
        service_type: &str,
        discoveries: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> TransportResult<()> {
        if service_type.is_empty() {
            return Err(TransportError::InvalidConfig(
                "empty service type".to_string(),
            ));
        }

        let mut state = self.network.state();
        let slot = state
            .peers
            .get_mut(&self.local)
            .ok_or(TransportError::Closed)?;
        slot.browse = Some(Browse {
            service_type: service_type.to_string(),
            discoveries: discoveries.clone(),
        });

        for (id, slot) in state.peers.iter().filter(|(id, _)| *id != &self.local) {
            let Some(advert) = slot.advert.as_ref() else {
                continue;
            };
            if advert.service_type == service_type {
                let _ = discoveries.send(DiscoveryEvent::Found {
                    peer: id.clone(),
                    info: advert.info.clone(),
                });
            }
        }
        Ok(())
    }

    async fn stop_browsing(&self) {
        if let Some(slot) = self.network.state().peers.get_mut(&self.local) {
            slot.browse = None;
        }
    }

    fn attach_session(&self, events: mpsc::UnboundedSender<SessionEvent>) {
        if let Some(slot) = self.network.state().peers.get_mut(&self.local) {
            slot.session = Some(events);
            slot.left_session = false;
        }
    }

    fn detach_session(&self) {
        if let Some(slot) = self.network.state().peers.get_mut(&self.local) {
            slot.session = None;
            slot.left_session = true;
        }
    }

    async fn invite(
        &self,
        peer: &PeerIdentity,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> TransportResult<()> {
        {
            let state = self.network.state();
            if state.is_linked(&self.local, peer) {
                tracing::debug!("{} already connected to {}", self.local, peer);
                return Ok(());
            }

            let advert = state
                .peers
                .get(peer)
                .and_then(|slot| slot.advert.as_ref())
                .ok_or_else(|| TransportError::UnknownPeer(peer.to_string()))?;

            let (invitation, answer) = Invitation::new(self.local.clone(), context);
            state.notify_state(&self.local, peer, PeerState::Connecting);
            if advert.invitations.send(invitation).is_err() {
                state.notify_state(&self.local, peer, PeerState::NotConnected);
                return Err(TransportError::UnknownPeer(peer.to_string()));
            }

            let network = Arc::clone(&self.network);
            let inviter = self.local.clone();
            let invitee = peer.clone();
            tokio::spawn(async move {
                match invitation_outcome(tokio::time::timeout(timeout, answer).await) {
                    Ok(true) => {
                        network.link(&inviter, &invitee);
                        return;
                    }
                    Ok(false) => tracing::debug!("{} declined {}", invitee, inviter),
                    Err(e) => tracing::debug!("Invitation {} -> {} failed: {}", inviter, invitee, e),
                }

                // The pair may have linked through the opposite invitation
                let state = network.state();
                if !state.is_linked(&inviter, &invitee) {
                    state.notify_state(&inviter, &invitee, PeerState::NotConnected);
                }
            });
        }
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.network
            .state()
            .peers
            .get(&self.local)
            .map(|slot| slot.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn send(&self, data: &[u8], peer: &PeerIdentity) -> TransportResult<()> {
        let mut state = self.network.state();

        let delivered = state.is_linked(&self.local, peer)
            && state
                .peers
                .get(peer)
                .and_then(|slot| slot.session.as_ref())
                .is_some_and(|sink| {
                    sink.send(SessionEvent::Data {
                        peer: self.local.clone(),
                        data: data.to_vec(),
                    })
                    .is_ok()
                });

        if let Some(slot) = state.peers.get_mut(&self.local) {
            if delivered {
                slot.stats.record_send(data.len());
            } else {
                slot.stats.record_send_error();
            }
        }

        if !delivered {
            return Err(TransportError::NotConnected(peer.to_string()));
        }

        if let Some(slot) = state.peers.get_mut(peer) {
            slot.stats.record_recv(data.len());
        }
        Ok(())
    }

    async fn send_resource(
        &self,
        path: &Path,
        name: &str,
        peer: &PeerIdentity,
    ) -> TransportResult<ResourceTransfer> {
        let dest_dir = {
            let mut state = self.network.state();
            if !state.is_linked(&self.local, peer) {
                return Err(TransportError::NotConnected(peer.to_string()));
            }
            let dest_dir = state
                .peers
                .get(peer)
                .map(|slot| slot.resource_dir.clone())
                .ok_or_else(|| TransportError::UnknownPeer(peer.to_string()))?;
            if let Some(slot) = state.peers.get_mut(&self.local) {
                slot.stats.record_resource();
            }
            dest_dir
        };

        let file = tokio::fs::File::open(path).await?;
        let bytes_total = file.metadata().await?.len();

        let (progress_tx, progress_rx) =
            watch::channel(ResourceProgress::new(name, peer.clone(), bytes_total));
        let (done_tx, done_rx) = oneshot::channel();

        let network = Arc::clone(&self.network);
        let sender = self.local.clone();
        let receiver = peer.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let result = match copy_resource(file, &dest_dir, &name, &progress_tx).await {
                Ok(local_path) => network.deliver_resource(&sender, &receiver, name, local_path),
                Err(e) => Err(e),
            };

            progress_tx.send_modify(|progress| {
                if result.is_ok() {
                    progress.complete();
                } else {
                    progress.fail();
                }
            });
            let _ = done_tx.send(result);
        });

        Ok(ResourceTransfer {
            progress: progress_rx,
            completion: done_rx,
        })
    }

    async fn disconnect(&self) {
        self.network.state().unlink_all(&self.local);
    }

    fn stats(&self) -> TransportStats {
        self.network
            .state()
            .peers
            .get(&self.local)
            .map(|slot| slot.stats.clone())
            .unwrap_or_default()
    }
}

/// Map an awaited invitation answer: `Ok(accepted)`, `Timeout` when no
/// answer came in time, `Closed` when the invitation was dropped unanswered
fn invitation_outcome(
    answer: Result<Result<bool, oneshot::error::RecvError>, tokio::time::error::Elapsed>,
) -> TransportResult<bool> {
    match answer {
        Ok(Ok(accepted)) => Ok(accepted),
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => Err(TransportError::Timeout),
    }
}

/// Keep resource names usable as file names inside the receive directory
fn sanitize_resource_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "resource".to_string()
    } else {
        cleaned
    }
}

async fn copy_resource(
    mut source: tokio::fs::File,
    dest_dir: &Path,
    name: &str,
    progress: &watch::Sender<ResourceProgress>,
) -> TransportResult<PathBuf> {
    tokio::fs::create_dir_all(dest_dir).await?;

    let local_path = dest_dir.join(format!(
        "{:016x}-{}",
        rand::random::<u64>(),
        sanitize_resource_name(name)
    ));
    let mut out = tokio::fs::File::create(&local_path).await?;

    let mut buf = vec![0u8; RESOURCE_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress.send_modify(|p| p.update(copied));
    }
    out.flush().await?;

    Ok(local_path)
}
