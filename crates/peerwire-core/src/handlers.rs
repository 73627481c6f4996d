//! Handler registry.
//!
//! Holds the per-name event handlers, the two catch-all handlers and the
//! lifecycle hooks. Handlers are stored as `Arc`s and cloned out of the lock
//! before they run, so a handler may itself register or remove handlers.

use crate::value::Value;
use peerwire_transport::PeerIdentity;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-name handler: `(sender, payload)`
pub type EventHandler = Arc<dyn Fn(&PeerIdentity, Option<&Value>) + Send + Sync>;

/// Catch-all handler: `(sender, event name, payload)`
pub type AnyEventHandler = Arc<dyn Fn(&PeerIdentity, &str, Option<&Value>) + Send + Sync>;

/// Lifecycle hook: `(local peer, remote peer)`
pub type PeerHandler = Arc<dyn Fn(&PeerIdentity, &PeerIdentity) + Send + Sync>;

/// Resource hook: `(local peer, resource name, sender, local path)`
pub type ResourceHandler = Arc<dyn Fn(&PeerIdentity, &str, &PeerIdentity, &Path) + Send + Sync>;

/// Lifecycle hook slot, used with [`HandlerRegistry::clear_hook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Remote peer is connecting
    Connecting,
    /// Remote peer connected
    Connect,
    /// Remote peer disconnected
    Disconnect,
    /// Catch-all event handler
    Event,
    /// Catch-all payload handler
    EventObject,
    /// Resource received
    FinishReceivingResource,
}

#[derive(Default)]
struct Handlers {
    by_name: HashMap<String, EventHandler>,
    any_event: Option<AnyEventHandler>,
    any_object: Option<EventHandler>,
    connecting: Option<PeerHandler>,
    connect: Option<PeerHandler>,
    disconnect: Option<PeerHandler>,
    resource: Option<ResourceHandler>,
}

/// Registry of event handlers and lifecycle hooks
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Handlers>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.read();
        let mut names: Vec<_> = handlers.by_name.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("events", &names)
            .field("any_event", &handlers.any_event.is_some())
            .field("any_object", &handlers.any_object.is_some())
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `event`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn on(&self, event: impl Into<String>, handler: EventHandler) -> bool {
        self.write().by_name.insert(event.into(), handler).is_some()
    }

    /// Remove the handler for `event`. Returns `true` if one was registered.
    pub fn off(&self, event: &str) -> bool {
        self.write().by_name.remove(event).is_some()
    }

    /// Whether a handler is registered for `event`
    pub fn has_handler(&self, event: &str) -> bool {
        self.read().by_name.contains_key(event)
    }

    /// Number of per-name handlers
    pub fn len(&self) -> usize {
        self.read().by_name.len()
    }

    /// Whether no per-name handler is registered
    pub fn is_empty(&self) -> bool {
        self.read().by_name.is_empty()
    }

    /// Handler for `event`
    pub fn handler(&self, event: &str) -> Option<EventHandler> {
        self.read().by_name.get(event).cloned()
    }

    /// Set the catch-all event handler
    pub fn set_any_event(&self, handler: AnyEventHandler) {
        self.write().any_event = Some(handler);
    }

    /// Set the catch-all payload handler
    pub fn set_any_object(&self, handler: EventHandler) {
        self.write().any_object = Some(handler);
    }

    /// Set the connecting hook
    pub fn set_connecting(&self, handler: PeerHandler) {
        self.write().connecting = Some(handler);
    }

    /// Set the connect hook
    pub fn set_connect(&self, handler: PeerHandler) {
        self.write().connect = Some(handler);
    }

    /// Set the disconnect hook
    pub fn set_disconnect(&self, handler: PeerHandler) {
        self.write().disconnect = Some(handler);
    }

    /// Set the resource hook
    pub fn set_finish_receiving_resource(&self, handler: ResourceHandler) {
        self.write().resource = Some(handler);
    }

    /// Remove a hook
    pub fn clear_hook(&self, hook: Hook) {
        let mut handlers = self.write();
        match hook {
            Hook::Connecting => handlers.connecting = None,
            Hook::Connect => handlers.connect = None,
            Hook::Disconnect => handlers.disconnect = None,
            Hook::Event => handlers.any_event = None,
            Hook::EventObject => handlers.any_object = None,
            Hook::FinishReceivingResource => handlers.resource = None,
        }
    }

    /// Remove every handler and hook
    pub fn clear(&self) {
        *self.write() = Handlers::default();
    }

    pub(crate) fn any_event(&self) -> Option<AnyEventHandler> {
        self.read().any_event.clone()
    }

    pub(crate) fn any_object(&self) -> Option<EventHandler> {
        self.read().any_object.clone()
    }

    pub(crate) fn connecting(&self) -> Option<PeerHandler> {
        self.read().connecting.clone()
    }

    pub(crate) fn connect(&self) -> Option<PeerHandler> {
        self.read().connect.clone()
    }

    pub(crate) fn disconnect(&self) -> Option<PeerHandler> {
        self.read().disconnect.clone()
    }

    pub(crate) fn finish_receiving_resource(&self) -> Option<ResourceHandler> {
        self.read().resource.clone()
    }
}
