// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn user_event(topic: &str, src: &str) -> Envelope {
    Envelope::new(topic, src, Payload::User { value: json!({"n": 1}) })
}

#[test]
fn frames_round_trip() {
    let envelope = user_event("user.script.announce", "worker-2");
    let line = encode_frame(&envelope).unwrap();
    assert!(!line.contains('\n'));
    let back: Envelope = decode_frame(&(line + "\n")).unwrap();
    assert_eq!(back, envelope);
}

#[tokio::test]
async fn forward_delivers_to_queue() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::channel(4);
    let relay = RelayTx::new(tx, Duration::from_millis(50));

    relay.forward(&bus, &user_event("user.a", "worker-1"));
    let got = rx.recv().await.unwrap();
    assert_eq!(got.topic, "user.a");
}

#[tokio::test]
async fn full_queue_drops_after_timeout_and_reports() {
    let bus = EventBus::new();
    let drops: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&drops);
    bus.subscribe(topics::BUS_DROP, move |e| {
        if let Payload::Dropped { topic } = &e.payload {
            sink.lock().push(topic.clone());
        }
        Ok(())
    });

    let (tx, _rx) = mpsc::channel(1);
    let relay = RelayTx::new(tx, Duration::from_millis(10));
    relay.forward(&bus, &user_event("user.a", "worker-1"));
    // queue now full and nothing drains it
    relay.forward(&bus, &user_event("user.b", "worker-1"));

    assert_eq!(*drops.lock(), vec!["user.b".to_string()]);
}

#[tokio::test]
async fn outbound_bridge_forwards_local_origins_only() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::channel(4);
    bridge_outbound(&bus, "worker-3", RelayTx::new(tx, Duration::from_millis(50)));

    bus.publish(&user_event("user.local", "worker-3"));
    bus.publish(&user_event("user.relayed", "ses"));
    bus.publish(&user_event("bus.drop", "worker-3"));

    let got = rx.recv().await.unwrap();
    assert_eq!(got.topic, "user.local");
    assert!(rx.try_recv().is_err(), "foreign and housekeeping events must not leave");
}

#[tokio::test]
async fn peer_bridge_suppresses_echo() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::channel(4);
    bridge_to_peer(&bus, "worker-3", RelayTx::new(tx, Duration::from_millis(50)));

    // came from worker-3: must not be sent back to it
    bus.publish(&user_event("user.echo", "worker-3"));
    // from the parent and from a sibling: both flow down
    bus.publish(&user_event("user.parent", "ses"));
    bus.publish(&user_event("user.sibling", "worker-4"));

    assert_eq!(rx.recv().await.unwrap().topic, "user.parent");
    assert_eq!(rx.recv().await.unwrap().topic, "user.sibling");
    assert!(rx.try_recv().is_err());
}
