//! Integration tests for end-to-end peer sessions.
//!
//! Drives full transceivers over an in-process `LocalNetwork`: discovery,
//! arbitration, event delivery, resources and lifecycle.

use peerwire_core::{
    LocalNetwork, PeerIdentity, PeerState, SessionEvent, Transceiver, Transport, Value,
    encode_event,
};
use peerwire_integration_tests::{AnswerRecorder, Answers, TwoPeerFixture, recv, wait_for};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

// ============================================================================
// Discovery and Arbitration
// ============================================================================

/// Two transceiving peers end up in exactly one shared session.
#[tokio::test]
async fn test_mutual_discovery_forms_one_session() {
    let fixture = TwoPeerFixture::new();
    let connects = counter();
    for peer in [&fixture.a, &fixture.b] {
        let connects = Arc::clone(&connects);
        peer.on_connect(move |_, _| {
            connects.fetch_add(1, Ordering::SeqCst);
        });
    }

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    assert_eq!(fixture.a.connected_peers(), vec![fixture.b.local_peer().clone()]);
    assert_eq!(fixture.b.connected_peers(), vec![fixture.a.local_peer().clone()]);
    assert!(wait_for(|| connects.load(Ordering::SeqCst) == 2).await);

    // Both sides stop advertising once connected
    assert!(wait_for(|| !fixture.a.is_advertising() && !fixture.b.is_advertising()).await);

    // No second session forms afterwards
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.a.connected_peers().len(), 1);
}

fn recording_peer(network: &Arc<LocalNetwork>, name: &str, key: u64) -> (Transceiver, Answers) {
    let (transport, answers) =
        AnswerRecorder::new(network.join(PeerIdentity::with_order_key(name, key)));
    let transceiver = Transceiver::new(
        Arc::new(transport),
        peerwire_core::TransceiverConfig {
            invite_timeout: Duration::from_secs(2),
            ..peerwire_core::TransceiverConfig::with_display_name(name)
        },
    )
    .unwrap();
    (transceiver, answers)
}

/// Whichever peer starts first, only the larger key ever accepts.
#[tokio::test]
async fn test_arbitration_independent_of_start_order() {
    for b_first in [false, true] {
        let network = LocalNetwork::new();
        let (a, mut a_answers) = recording_peer(&network, "alpha", 200);
        let (b, mut b_answers) = recording_peer(&network, "bravo", 100);

        let (first, second) = if b_first { (&b, &a) } else { (&a, &b) };
        first.transceive("cards", None).await.unwrap();
        second.transceive("cards", None).await.unwrap();

        assert!(wait_for(|| a.connected_peers().len() == 1 && b.connected_peers().len() == 1).await);

        // a accepted b's invitation
        assert_eq!(
            recv(&mut a_answers).await,
            Some((b.local_peer().clone(), true)),
            "b_first = {b_first}"
        );
        assert!(a_answers.try_recv().is_err());

        // Anything b answered was a decline
        while let Ok((from, accepted)) = b_answers.try_recv() {
            assert_eq!(&from, a.local_peer());
            assert!(!accepted, "b_first = {b_first}");
        }

        assert!(wait_for(|| !a.is_advertising() && !b.is_advertising()).await);
        a.stop_transceiving().await;
        b.stop_transceiving().await;
    }
}

/// The larger order key accepts the invitation of the smaller one.
#[tokio::test]
async fn test_larger_key_accepts() {
    let fixture = TwoPeerFixture::new();

    fixture.a.advertise("cards", None).await.unwrap();
    fixture.b.browse("cards").await.unwrap();

    assert!(fixture.wait_connected().await);
}

/// The smaller order key declines, and the inviter hears it as not connected.
#[tokio::test]
async fn test_smaller_key_declines() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.a.on_disconnect(move |local, remote| {
        let _ = tx.send((local.clone(), remote.clone()));
    });

    fixture.b.advertise("cards", None).await.unwrap();
    fixture.a.browse("cards").await.unwrap();

    let (local, remote) = recv(&mut rx).await.expect("decline reported");
    assert_eq!(&local, fixture.a.local_peer());
    assert_eq!(&remote, fixture.b.local_peer());
    assert!(fixture.a.connected_peers().is_empty());
    assert!(fixture.b.connected_peers().is_empty());
}

/// Equal order keys never connect.
#[tokio::test]
async fn test_equal_keys_never_connect() {
    let fixture = TwoPeerFixture::with_keys(7, 7);

    fixture.transceive("cards").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fixture.a.connected_peers().is_empty());
    assert!(fixture.b.connected_peers().is_empty());
}

/// Peers browsing a different service type stay apart.
#[tokio::test]
async fn test_service_types_are_separate() {
    let fixture = TwoPeerFixture::new();

    fixture.a.transceive("cards", None).await.unwrap();
    fixture.b.transceive("chess", None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fixture.a.connected_peers().is_empty());
}

/// Separate networks are invisible to each other.
#[tokio::test]
async fn test_networks_are_isolated() {
    let first = TwoPeerFixture::new();
    let second = TwoPeerFixture::with_keys(300, 50);

    first.a.transceive("cards", None).await.unwrap();
    second.b.transceive("cards", None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.a.connected_peers().is_empty());
    assert!(second.b.connected_peers().is_empty());
}

/// A malformed service type is rejected before touching the transport.
#[tokio::test]
async fn test_invalid_service_type() {
    let fixture = TwoPeerFixture::new();

    assert!(fixture.a.transceive("Not_Valid", None).await.is_err());
    assert!(!fixture.a.is_running());
    assert_eq!(fixture.network.peer_count(), 2);
}

/// Discovery info travels with the advertisement without affecting arbitration.
#[tokio::test]
async fn test_discovery_info() {
    let fixture = TwoPeerFixture::new();
    let info: BTreeMap<String, String> = [("room".to_string(), "lobby".to_string())].into();

    fixture.a.transceive("cards", Some(info)).await.unwrap();
    fixture.b.transceive("cards", None).await.unwrap();

    assert!(fixture.wait_connected().await);
}

// ============================================================================
// Events
// ============================================================================

/// One event reaches the per-name, any-event and any-object handlers.
#[tokio::test]
async fn test_event_reaches_all_handlers() {
    let fixture = TwoPeerFixture::new();
    let (named_tx, mut named) = mpsc::unbounded_channel();
    let (any_tx, mut any) = mpsc::unbounded_channel();
    let (object_tx, mut object) = mpsc::unbounded_channel();

    fixture.b.on("score", move |from, payload| {
        let _ = named_tx.send((from.clone(), payload.cloned()));
    });
    fixture.b.on_event(move |_, name, payload| {
        let _ = any_tx.send((name.to_string(), payload.cloned()));
    });
    fixture.b.on_event_object(move |_, payload| {
        let _ = object_tx.send(payload.cloned());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    fixture.a.send_event("score", Some(&Value::from(42)), None);

    let (from, payload) = recv(&mut named).await.expect("named handler");
    assert_eq!(&from, fixture.a.local_peer());
    assert_eq!(payload, Some(Value::from(42)));
    assert_eq!(
        recv(&mut any).await,
        Some(("score".to_string(), Some(Value::from(42))))
    );
    assert_eq!(recv(&mut object).await, Some(Some(Value::from(42))));
}

/// Events without a payload arrive with `None`, unknown names are ignored.
#[tokio::test]
async fn test_absent_payload_and_unknown_event() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.b.on("ping", move |_, payload| {
        let _ = tx.send(payload.cloned());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    fixture.a.send_event("nobody-listens", Some(&Value::from("x")), None);
    fixture.a.send_event("ping", None, None);

    assert_eq!(recv(&mut rx).await, Some(None));
    assert_eq!(fixture.b.dispatch_stats().events_dropped, 0);
}

/// Events from one sender arrive in the order they were sent.
#[tokio::test]
async fn test_event_order_preserved() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.b.on("seq", move |_, payload| {
        if let Some(n) = payload.and_then(Value::as_i64) {
            let _ = tx.send(n);
        }
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    for n in 0..50 {
        fixture.a.send_event("seq", Some(&Value::from(n)), None);
    }
    for n in 0..50 {
        assert_eq!(recv(&mut rx).await, Some(n));
    }
}

/// Nested payloads survive the trip.
#[tokio::test]
async fn test_structured_payload() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.b.on("hand", move |_, payload| {
        let _ = tx.send(payload.cloned());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let hand = Value::Map(
        [
            ("player".to_string(), Value::from("alpha")),
            (
                "cards".to_string(),
                Value::List(vec![Value::from("ace"), Value::from("king")]),
            ),
            ("raw".to_string(), Value::Bytes(vec![0, 255, 7])),
            ("odds".to_string(), Value::Float(0.25)),
        ]
        .into(),
    );
    fixture.a.send_event("hand", Some(&hand), None);

    assert_eq!(recv(&mut rx).await, Some(Some(hand)));
}

/// Registering a handler under the same name replaces the old one.
#[tokio::test]
async fn test_handler_replacement() {
    let fixture = TwoPeerFixture::new();
    let first = counter();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let hits = Arc::clone(&first);
    assert!(!fixture.b.on("score", move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(fixture.b.on("score", move |_, _| {
        let _ = tx.send(());
    }));

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);
    fixture.a.send_event("score", None, None);

    assert!(recv(&mut rx).await.is_some());
    assert_eq!(first.load(Ordering::SeqCst), 0);
}

/// A panicking handler does not take the session down.
#[tokio::test]
async fn test_handler_panic_is_contained() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.b.on("boom", |_, _| panic!("handler failure"));
    fixture.b.on("after", move |_, _| {
        let _ = tx.send(());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    fixture.a.send_event("boom", None, None);
    fixture.a.send_event("after", None, None);

    assert!(recv(&mut rx).await.is_some());
    assert_eq!(fixture.b.dispatch_stats().handler_panics, 1);
}

/// Sending to an explicitly empty peer list does nothing.
#[tokio::test]
async fn test_empty_peer_list_is_noop() {
    let fixture = TwoPeerFixture::new();
    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let before = fixture.a.transport_stats().operations();
    fixture.a.send_event("score", Some(&Value::from(1)), Some(&[]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fixture.a.transport_stats().operations(), before);
}

/// Targeting one peer of several reaches only that peer.
#[tokio::test]
async fn test_targeted_send() {
    let fixture = TwoPeerFixture::new();
    let third = TwoPeerFixture::peer(&fixture.network, "charlie", 50);
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let c_hits = counter();

    fixture.b.on("secret", move |_, _| {
        let _ = b_tx.send(());
    });
    let hits = Arc::clone(&c_hits);
    third.on("secret", move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    let (connect_tx, mut connects) = mpsc::unbounded_channel();
    fixture.a.on_connect(move |_, remote| {
        let _ = connect_tx.send(remote.clone());
    });

    // a accepts both: it advertises, the others only browse
    fixture.a.advertise("cards", None).await.unwrap();
    let b_peer = fixture.b.local_peer().clone();
    fixture.b.browse("cards").await.unwrap();
    assert_eq!(recv(&mut connects).await.as_ref(), Some(&b_peer));

    // a stopped advertising after its first connection, start again for c
    fixture.a.advertise("cards", None).await.unwrap();
    third.browse("cards").await.unwrap();
    assert!(wait_for(|| fixture.a.connected_peers().len() == 2).await);

    fixture
        .a
        .send_event("secret", None, Some(std::slice::from_ref(&b_peer)));

    assert!(recv(&mut b_rx).await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(c_hits.load(Ordering::SeqCst), 0);
}

/// A peer listed more than once still receives the event once.
#[tokio::test]
async fn test_duplicate_peers_receive_once() {
    let fixture = TwoPeerFixture::new();
    let calls = counter();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let hits = Arc::clone(&calls);
    fixture.b.on("score", move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });
    fixture.b.on("done", move |_, _| {
        let _ = tx.send(());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let b = fixture.b.local_peer().clone();
    fixture
        .a
        .send_event("score", Some(&Value::from(42)), Some(&[b.clone(), b.clone()]));
    fixture.a.send_event("done", None, Some(&[b]));

    assert!(recv(&mut rx).await.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A peer listed more than once gets a single resource transfer.
#[tokio::test]
async fn test_duplicate_peers_single_transfer() {
    let fixture = TwoPeerFixture::new();
    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let source = fixture.resource_root().join("deck.txt");
    std::fs::write(&source, b"ace").unwrap();
    let b = fixture.b.local_peer().clone();

    let handles = fixture
        .a
        .send_resource(&source, "deck.txt", Some(&[b.clone(), b]), |_, _| {})
        .await
        .expect("session running");

    assert_eq!(handles.len(), 1);
    assert_eq!(fixture.a.transport_stats().resources_sent, 1);
}

/// Malformed bytes from a connected peer are dropped without reaching handlers.
#[tokio::test]
async fn test_malformed_data_dropped() {
    let fixture = TwoPeerFixture::new();
    let calls = counter();
    let hits = Arc::clone(&calls);
    fixture.b.on_event(move |_, _, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    // A raw transport with a small key, so b accepts its invitation
    let rogue = fixture
        .network
        .join(PeerIdentity::with_order_key("rogue", 1));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    rogue.attach_session(events_tx);

    fixture.b.advertise("cards", None).await.unwrap();
    rogue
        .invite(fixture.b.local_peer(), None, Duration::from_secs(1))
        .await
        .unwrap();
    loop {
        match recv(&mut events).await {
            Some(SessionEvent::StateChanged {
                state: PeerState::Connected,
                ..
            }) => break,
            Some(_) => {}
            None => panic!("rogue never connected"),
        }
    }

    rogue
        .send(b"\xff\xff\xff not an event", fixture.b.local_peer())
        .await
        .unwrap();
    let valid = encode_event("fine", None).unwrap();
    rogue.send(&valid, fixture.b.local_peer()).await.unwrap();

    assert!(wait_for(|| calls.load(Ordering::SeqCst) == 1).await);
    assert_eq!(fixture.b.dispatch_stats().events_dropped, 1);
}

/// Oversized events are refused on the receive side.
#[tokio::test]
async fn test_oversized_event_dropped() {
    let network = LocalNetwork::new();
    let small = Transceiver::new(
        Arc::new(network.join(PeerIdentity::with_order_key("small", 200))),
        peerwire_core::TransceiverConfig {
            max_event_size: 256,
            ..peerwire_core::TransceiverConfig::with_display_name("small")
        },
    )
    .unwrap();
    let sender = TwoPeerFixture::peer(&network, "sender", 100);
    let calls = counter();
    let hits = Arc::clone(&calls);
    small.on("big", move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    small.advertise("cards", None).await.unwrap();
    sender.browse("cards").await.unwrap();
    assert!(wait_for(|| !small.connected_peers().is_empty()).await);

    sender.send_event("big", Some(&Value::Bytes(vec![7; 4096])), None);

    assert!(wait_for(|| small.dispatch_stats().events_dropped == 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Resources
// ============================================================================

/// A file sent to a peer lands on disk there and both callbacks fire.
#[tokio::test]
async fn test_resource_transfer() {
    let fixture = TwoPeerFixture::new();
    let (received_tx, mut received) = mpsc::unbounded_channel();
    let (done_tx, mut done) = mpsc::unbounded_channel();

    fixture
        .b
        .on_finish_receiving_resource(move |local, name, from, path| {
            let _ = received_tx.send((
                local.clone(),
                name.to_string(),
                from.clone(),
                PathBuf::from(path),
            ));
        });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let source = fixture.resource_root().join("deck.txt");
    std::fs::write(&source, b"ace king queen jack").unwrap();

    let handles = fixture
        .a
        .send_resource(&source, "deck.txt", None, move |peer, error| {
            let _ = done_tx.send((peer.clone(), error.is_none()));
        })
        .await
        .expect("session running");
    assert_eq!(handles.len(), 1);

    let (local, name, from, path) = recv(&mut received).await.expect("resource received");
    assert_eq!(&local, fixture.b.local_peer());
    assert_eq!(name, "deck.txt");
    assert_eq!(&from, fixture.a.local_peer());
    assert_eq!(std::fs::read(&path).unwrap(), b"ace king queen jack");

    let (peer, ok) = recv(&mut done).await.expect("completion");
    assert_eq!(&peer, fixture.b.local_peer());
    assert!(ok);

    let mut progress = handles.into_iter().flatten().next().expect("progress");
    let snapshot = progress.wait_for(|p| p.is_finished()).await.unwrap().clone();
    assert_eq!(snapshot.status, peerwire_core::ResourceStatus::Complete);
    assert_eq!(snapshot.bytes_done, 19);
}

/// A missing file reports a failure through the completion callback.
#[tokio::test]
async fn test_resource_missing_file() {
    let fixture = TwoPeerFixture::new();
    let (done_tx, mut done) = mpsc::unbounded_channel();

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    let missing = fixture.resource_root().join("missing.bin");
    let handles = fixture
        .a
        .send_resource(&missing, "missing.bin", None, move |_, error| {
            let _ = done_tx.send(error.is_some());
        })
        .await
        .expect("session running");

    assert_eq!(handles.len(), 1);
    assert!(handles[0].is_none());
    assert_eq!(recv(&mut done).await, Some(true));
}

/// Without a session there is nothing to send a resource over.
#[tokio::test]
async fn test_resource_without_session() {
    let fixture = TwoPeerFixture::new();
    let result = fixture
        .a
        .send_resource(fixture.resource_root().join("x"), "x", None, |_, _| {})
        .await;
    assert!(result.is_none());
}

// ============================================================================
// Lifecycle
// ============================================================================

/// After stopping, sends do nothing and the other side sees a disconnect.
#[tokio::test]
async fn test_stop_then_send_is_noop() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.a.on_disconnect(move |_, remote| {
        let _ = tx.send(remote.clone());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);

    fixture.b.stop_transceiving().await;
    assert!(!fixture.b.is_running());
    assert_eq!(recv(&mut rx).await.as_ref(), Some(fixture.b.local_peer()));

    let before = fixture.b.transport_stats().operations();
    fixture.b.send_event("score", Some(&Value::from(1)), None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.b.transport_stats().operations(), before);
    assert!(fixture.a.connected_peers().is_empty());
}

/// Handlers survive a stop and a restart.
#[tokio::test]
async fn test_restart_keeps_handlers() {
    let fixture = TwoPeerFixture::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.b.on("score", move |_, payload| {
        let _ = tx.send(payload.cloned());
    });

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);
    fixture.stop().await;
    assert!(wait_for(|| fixture.a.connected_peers().is_empty()).await);

    fixture.transceive("cards").await;
    assert!(fixture.wait_connected().await);
    fixture.a.send_event("score", Some(&Value::from(2)), None);

    assert_eq!(recv(&mut rx).await, Some(Some(Value::from(2))));
}

/// Stopping twice, or before starting, is harmless.
#[tokio::test]
async fn test_stop_is_idempotent() {
    let fixture = TwoPeerFixture::new();
    fixture.a.stop_transceiving().await;

    fixture.transceive("cards").await;
    fixture.a.stop_transceiving().await;
    fixture.a.stop_transceiving().await;

    assert!(!fixture.a.is_running());
    assert!(!fixture.a.is_advertising());
    assert!(!fixture.a.is_browsing());
}

/// Dropping the last handle tears the session down.
#[tokio::test]
async fn test_drop_leaves_session() {
    let fixture = TwoPeerFixture::new();
    let network = Arc::clone(&fixture.network);
    let extra = TwoPeerFixture::peer(&network, "zulu", 1);

    fixture.a.advertise("cards", None).await.unwrap();
    extra.browse("cards").await.unwrap();
    assert!(wait_for(|| fixture.a.connected_peers().len() == 1).await);

    drop(extra);
    assert!(wait_for(|| fixture.a.connected_peers().is_empty()).await);
}
