//! Fuzz target for the receive path
//!
//! Runs arbitrary bytes through a dispatcher with every catch-all handler
//! registered.

#![no_main]

use libfuzzer_sys::fuzz_target;
use peerwire_core::{Dispatcher, EventCodec, HandlerRegistry, PeerIdentity, Value};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.set_any_event(Arc::new(|_: &PeerIdentity, name: &str, _: Option<&Value>| {
        let _ = name.len();
    }));
    handlers.set_any_object(Arc::new(|_: &PeerIdentity, object: Option<&Value>| {
        let _ = object.map(|value| value.depth());
    }));

    let local = PeerIdentity::with_order_key("local", 2);
    let remote = PeerIdentity::with_order_key("remote", 1);
    let dispatcher = Dispatcher::new(local, handlers, EventCodec::new(4096));

    let delivered = dispatcher.dispatch_data(&remote, data);
    let stats = dispatcher.stats();
    assert_eq!(stats.events_dispatched + stats.events_dropped, 1);
    assert_eq!(delivered, stats.events_dispatched == 1);
});
