//! Event dispatcher.
//!
//! Turns raw session notifications into handler invocations. Incoming data
//! is decoded with the [`EventCodec`]; anything that fails to decode is
//! dropped without a trace. Decoded events are routed in a fixed order:
//!
//! 1. the catch-all event handler `(peer, name, payload)`
//! 2. the catch-all payload handler `(peer, payload)`
//! 3. the handler registered under the event name `(peer, payload)`
//!
//! A panicking handler is logged and does not take the dispatch loop down.

use crate::event::{Envelope, EventCodec};
use crate::handlers::HandlerRegistry;
use crate::session::Deferred;
use peerwire_transport::{PeerIdentity, PeerState, SessionEvent};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events decoded and routed
    pub events_dispatched: u64,
    /// Data notifications that failed to decode
    pub events_dropped: u64,
    /// Handler invocations that panicked
    pub handler_panics: u64,
}

/// Routes session notifications to registered handlers
pub struct Dispatcher {
    local: PeerIdentity,
    handlers: Arc<HandlerRegistry>,
    codec: EventCodec,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    panics: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher for the peer `local`
    pub fn new(local: PeerIdentity, handlers: Arc<HandlerRegistry>, codec: EventCodec) -> Self {
        Self {
            local,
            handlers,
            codec,
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            panics: AtomicU64::new(0),
        }
    }

    /// Handler registry this dispatcher routes to
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            events_dispatched: self.dispatched.load(Ordering::Relaxed),
            events_dropped: self.dropped.load(Ordering::Relaxed),
            handler_panics: self.panics.load(Ordering::Relaxed),
        }
    }

    /// Handle one session notification
    pub fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { peer, state } => self.state_changed(&peer, state),
            SessionEvent::Data { peer, data } => {
                self.dispatch_data(&peer, &data);
            }
            SessionEvent::ResourceFinished {
                peer,
                name,
                local_path,
            } => self.resource_finished(&peer, &name, &local_path),
        }
    }

    /// Decode `data` from `peer` and route it.
    ///
    /// Returns `false` if the data did not decode; nothing is dispatched then.
    pub fn dispatch_data(&self, peer: &PeerIdentity, data: &[u8]) -> bool {
        match self.codec.decode(data) {
            Ok(envelope) => {
                self.route(peer, &envelope);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Route a decoded event to the handlers
    pub fn route(&self, peer: &PeerIdentity, envelope: &Envelope) {
        let name = envelope.event.as_str();
        let object = envelope.object.as_ref();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Dispatching '{}' from {}", name, peer);

        if let Some(handler) = self.handlers.any_event() {
            self.guarded(name, || handler(peer, name, object));
        }
        if let Some(handler) = self.handlers.any_object() {
            self.guarded(name, || handler(peer, object));
        }
        if let Some(handler) = self.handlers.handler(name) {
            self.guarded(name, || handler(peer, object));
        }
    }

    /// Run a callback posted from elsewhere (resource completions)
    pub fn run_deferred(&self, callback: Deferred) {
        self.guarded("deferred callback", callback);
    }

    fn state_changed(&self, peer: &PeerIdentity, state: PeerState) {
        let (hook, label) = match state {
            PeerState::Connecting => (self.handlers.connecting(), "connecting"),
            PeerState::Connected => {
                tracing::info!("Connected to {}", peer);
                (self.handlers.connect(), "connect")
            }
            PeerState::NotConnected => {
                tracing::info!("Disconnected from {}", peer);
                (self.handlers.disconnect(), "disconnect")
            }
        };

        if let Some(hook) = hook {
            self.guarded(label, || hook(&self.local, peer));
        }
    }

    fn resource_finished(&self, peer: &PeerIdentity, name: &str, local_path: &Path) {
        tracing::debug!(
            "Finished receiving '{}' from {} at {}",
            name,
            peer,
            local_path.display()
        );
        if let Some(hook) = self.handlers.finish_receiving_resource() {
            self.guarded("resource", || hook(&self.local, name, peer, local_path));
        }
    }

    fn guarded(&self, what: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            self.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Handler for '{}' panicked", what);
        }
    }
}
