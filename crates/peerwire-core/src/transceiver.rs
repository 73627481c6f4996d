//! Transceiver - the application-facing entry point.
//!
//! A [`Transceiver`] owns one Advertiser, one Browser, the handler registry
//! and, while running, a [`Session`]. All handlers run on a single dispatch
//! task, one at a time, in notification order.
//!
//! # Example
//!
//! ```no_run
//! use peerwire_core::{LocalNetwork, Transceiver, TransceiverConfig, Value};
//!
//! # async fn example() -> peerwire_core::Result<()> {
//! let network = LocalNetwork::new();
//! let transceiver =
//!     Transceiver::with_network(&network, TransceiverConfig::with_display_name("den-tv"))?;
//!
//! transceiver.on("score", |peer, object| {
//!     println!("{} scored {:?}", peer, object);
//! });
//! transceiver.on_connect(|_, peer| println!("connected to {}", peer));
//!
//! transceiver.transceive("cards", None).await?;
//! transceiver.send_event("score", Some(&Value::from(42)), None);
//! # Ok(())
//! # }
//! ```

use crate::advertiser::Advertiser;
use crate::browser::Browser;
use crate::config::{TransceiverConfig, validate_service_type};
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::{ResourceError, Result};
use crate::event::EventCodec;
use crate::handlers::{HandlerRegistry, Hook};
use crate::session::{Deferred, Session};
use crate::value::Value;
use peerwire_transport::{
    DiscoveryInfo, LocalNetwork, PeerIdentity, PeerState, ResourceProgress, SessionEvent,
    Transport, TransportStats,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Default)]
struct RunState {
    session: Option<Arc<Session>>,
    event_loop: Option<JoinHandle<()>>,
}

struct TransceiverInner {
    transport: Arc<dyn Transport>,
    config: TransceiverConfig,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<Dispatcher>,
    advertiser: Arc<Advertiser>,
    browser: Arc<Browser>,
    state: Mutex<RunState>,
}

impl Drop for TransceiverInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.event_loop.take() {
            handle.abort();
            self.transport.detach_session();
        }
    }
}

/// Peer-to-peer session handle
///
/// Cloning is cheap; clones share the same session and handlers.
#[derive(Clone)]
pub struct Transceiver {
    inner: Arc<TransceiverInner>,
}

impl Transceiver {
    /// Create a transceiver over `transport`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `config` fails validation.
    pub fn new(transport: Arc<dyn Transport>, config: TransceiverConfig) -> Result<Self> {
        config.validate()?;

        let codec = EventCodec::new(config.max_event_size);
        let handlers = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            transport.local_peer().clone(),
            Arc::clone(&handlers),
            codec,
        ));
        let advertiser = Arc::new(Advertiser::new(Arc::clone(&transport)));
        let browser = Arc::new(Browser::new(Arc::clone(&transport), config.invite_timeout));

        Ok(Self {
            inner: Arc::new(TransceiverInner {
                transport,
                config,
                handlers,
                dispatcher,
                advertiser,
                browser,
                state: Mutex::new(RunState::default()),
            }),
        })
    }

    /// Join `network` under a fresh identity built from `config`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `config` fails validation.
    pub fn with_network(network: &Arc<LocalNetwork>, config: TransceiverConfig) -> Result<Self> {
        config.validate()?;
        let transport = network.join(config.identity());
        Self::new(Arc::new(transport), config)
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Local peer identity
    pub fn local_peer(&self) -> &PeerIdentity {
        self.inner.transport.local_peer()
    }

    /// Active configuration
    pub fn config(&self) -> &TransceiverConfig {
        &self.inner.config
    }

    /// Handler registry
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.inner.handlers
    }

    /// Dispatch counters
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    /// Transport counters
    pub fn transport_stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    /// Whether a session exists (between start and stop)
    pub fn is_running(&self) -> bool {
        self.state().session.is_some()
    }

    /// Whether the advertiser is active
    pub fn is_advertising(&self) -> bool {
        self.inner.advertiser.is_advertising()
    }

    /// Whether the browser is active
    pub fn is_browsing(&self) -> bool {
        self.inner.browser.is_browsing()
    }

    /// Connected peers; empty while stopped
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        match self.session() {
            Some(session) => session.connected_peers(),
            None => Vec::new(),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.state().session.clone()
    }

    fn ensure_session(&self) {
        let mut state = self.state();
        if state.session.is_some() {
            return;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        self.inner.transport.attach_session(events_tx);

        state.session = Some(Arc::new(Session::new(
            Arc::clone(&self.inner.transport),
            EventCodec::new(self.inner.config.max_event_size),
            deferred_tx,
        )));
        state.event_loop = Some(tokio::spawn(event_loop(
            Arc::clone(&self.inner.dispatcher),
            Arc::clone(&self.inner.advertiser),
            Arc::clone(&self.inner.browser),
            events_rx,
            deferred_rx,
        )));

        tracing::info!("Session started for {}", self.local_peer());
    }

    /// Advertise and browse `service_type` over one session
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidServiceType` for a malformed service type.
    /// Transport failures are logged and leave the peer undiscoverable.
    pub async fn start_transceiving(
        &self,
        service_type: &str,
        info: Option<DiscoveryInfo>,
    ) -> Result<()> {
        validate_service_type(service_type)?;
        self.start_advertising(service_type, info).await?;
        self.start_browsing(service_type).await
    }

    /// Advertise `service_type`, replacing any prior advertisement
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidServiceType` for a malformed service type.
    pub async fn start_advertising(
        &self,
        service_type: &str,
        info: Option<DiscoveryInfo>,
    ) -> Result<()> {
        validate_service_type(service_type)?;
        self.ensure_session();

        if let Err(e) = self.inner.advertiser.start(service_type, info).await {
            tracing::warn!("Failed to advertise '{}': {}", service_type, e);
        }
        Ok(())
    }

    /// Browse for `service_type`, replacing any prior browse
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidServiceType` for a malformed service type.
    pub async fn start_browsing(&self, service_type: &str) -> Result<()> {
        validate_service_type(service_type)?;
        self.ensure_session();

        if let Err(e) = self.inner.browser.start(service_type).await {
            tracing::warn!("Failed to browse '{}': {}", service_type, e);
        }
        Ok(())
    }

    /// Alias for [`Transceiver::start_transceiving`]
    ///
    /// # Errors
    ///
    /// See [`Transceiver::start_transceiving`].
    pub async fn transceive(&self, service_type: &str, info: Option<DiscoveryInfo>) -> Result<()> {
        self.start_transceiving(service_type, info).await
    }

    /// Alias for [`Transceiver::start_advertising`]
    ///
    /// # Errors
    ///
    /// See [`Transceiver::start_advertising`].
    pub async fn advertise(&self, service_type: &str, info: Option<DiscoveryInfo>) -> Result<()> {
        self.start_advertising(service_type, info).await
    }

    /// Alias for [`Transceiver::start_browsing`]
    ///
    /// # Errors
    ///
    /// See [`Transceiver::start_browsing`].
    pub async fn browse(&self, service_type: &str) -> Result<()> {
        self.start_browsing(service_type).await
    }

    /// Stop advertising and browsing, leave the session.
    ///
    /// Handlers stay registered; `send_event` is a no-op until the next start.
    pub async fn stop_transceiving(&self) {
        self.inner.advertiser.stop().await;
        self.inner.browser.stop().await;

        let (session, event_loop) = {
            let mut state = self.state();
            (state.session.take(), state.event_loop.take())
        };
        if session.is_none() {
            return;
        }

        self.inner.transport.detach_session();
        if let Some(handle) = event_loop {
            handle.abort();
        }
        self.inner.transport.disconnect().await;
        drop(session);

        tracing::info!("Session stopped for {}", self.local_peer());
    }

    /// Send `event` to `peers` (all connected peers when `None`).
    ///
    /// Returns immediately; delivery failures are not reported. Without a
    /// session, or with an empty peer list, nothing happens.
    pub fn send_event(&self, event: &str, object: Option<&Value>, peers: Option<&[PeerIdentity]>) {
        if let Some(session) = self.session() {
            session.send(event, object, peers);
        }
    }

    /// Send the file at `path` to `peers` under `name`.
    ///
    /// Returns `None` without a session, otherwise one progress receiver per
    /// peer (`None` for transfers that did not start). `on_complete` runs on
    /// the dispatch task once per peer.
    pub async fn send_resource<F>(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        peers: Option<&[PeerIdentity]>,
        on_complete: F,
    ) -> Option<Vec<Option<watch::Receiver<ResourceProgress>>>>
    where
        F: Fn(&PeerIdentity, Option<ResourceError>) + Send + Sync + 'static,
    {
        let session = self.session()?;
        Some(
            session
                .send_resource(path.as_ref(), name, peers, Arc::new(on_complete))
                .await,
        )
    }

    /// Register the handler for `event`, replacing any previous one.
    /// Returns `true` if one was replaced.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&PeerIdentity, Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.handlers.on(event, Arc::new(handler))
    }

    /// Remove the handler for `event`
    pub fn off(&self, event: &str) -> bool {
        self.inner.handlers.off(event)
    }

    /// Hook run when a peer starts connecting: `(local, remote)`
    pub fn on_connecting<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, &PeerIdentity) + Send + Sync + 'static,
    {
        self.inner.handlers.set_connecting(Arc::new(handler));
    }

    /// Hook run when a peer connects: `(local, remote)`
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, &PeerIdentity) + Send + Sync + 'static,
    {
        self.inner.handlers.set_connect(Arc::new(handler));
    }

    /// Hook run when a peer disconnects or an invitation fails: `(local, remote)`
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, &PeerIdentity) + Send + Sync + 'static,
    {
        self.inner.handlers.set_disconnect(Arc::new(handler));
    }

    /// Catch-all handler for every decoded event: `(sender, name, payload)`
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, &str, Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.handlers.set_any_event(Arc::new(handler));
    }

    /// Catch-all handler for every decoded payload: `(sender, payload)`
    pub fn on_event_object<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.handlers.set_any_object(Arc::new(handler));
    }

    /// Hook run when a resource arrived: `(local, name, sender, local_path)`
    pub fn on_finish_receiving_resource<F>(&self, handler: F)
    where
        F: Fn(&PeerIdentity, &str, &PeerIdentity, &Path) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .set_finish_receiving_resource(Arc::new(handler));
    }

    /// Remove a hook
    pub fn clear_hook(&self, hook: Hook) {
        self.inner.handlers.clear_hook(hook);
    }
}

impl std::fmt::Debug for Transceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transceiver")
            .field("local_peer", self.local_peer())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Dispatch loop: the single context all handlers run on
async fn event_loop(
    dispatcher: Arc<Dispatcher>,
    advertiser: Arc<Advertiser>,
    browser: Arc<Browser>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut deferred: mpsc::UnboundedReceiver<Deferred>,
) {
    loop {
        tokio::select! {
            biased;

            Some(event) = events.recv() => {
                if let SessionEvent::StateChanged { peer, state } = &event {
                    match state {
                        PeerState::Connected => {
                            browser.forget(peer);
                            advertiser.stop().await;
                        }
                        PeerState::NotConnected => browser.forget(peer),
                        PeerState::Connecting => {}
                    }
                }
                dispatcher.handle(event);
            }
            Some(callback) = deferred.recv() => dispatcher.run_deferred(callback),
            else => break,
        }
    }
}
