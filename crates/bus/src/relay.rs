// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process relay: framing and bridge subscriptions.
//!
//! Worker processes exchange envelopes with the supervisor over stdio as
//! newline-delimited JSON. Each side subscribes a bridge on its local bus;
//! echo loops are suppressed by origin (`msg_src`): a bridge never forwards
//! an event back towards the process it originated from. Housekeeping
//! topics (`bus.*`) stay process-local.

use crate::EventBus;
use oet_core::{topics, Envelope, Payload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

/// Serialize one frame (no trailing newline).
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse one frame from a line.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Bounded forwarder onto a relay queue.
///
/// A full queue blocks the publisher up to `timeout`; on expiry the event
/// is dropped and `bus.drop` is emitted once for it.
#[derive(Clone)]
pub struct RelayTx {
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl RelayTx {
    pub fn new(tx: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Queue an envelope for the peer process.
    pub fn forward(&self, bus: &EventBus, envelope: &Envelope) {
        let deadline = Instant::now() + self.timeout;
        let mut pending = envelope.clone();
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => return,
                Err(mpsc::error::TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        warn!(topic = %envelope.topic, "relay queue full, dropping event");
                        bus.publish(&Envelope::new(
                            topics::BUS_DROP,
                            "bus",
                            Payload::Dropped { topic: envelope.topic.clone() },
                        ));
                        return;
                    }
                    pending = back;
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        }
    }
}

/// Child-side bridge: forward locally-originated events to the parent.
///
/// Only envelopes whose `msg_src` equals `own_src` leave the process; the
/// rest arrived over the relay and would echo.
pub fn bridge_outbound(bus: &EventBus, own_src: &str, relay: RelayTx) -> crate::SubscriptionId {
    let own_src = own_src.to_string();
    let bus_for_handler = bus.clone();
    bus.subscribe("**", move |envelope| {
        if envelope.msg_src == own_src && !envelope.topic.starts_with("bus.") {
            relay.forward(&bus_for_handler, envelope);
        }
        Ok(())
    })
}

/// Parent-side bridge: forward everything except the peer's own events
/// back down to that peer.
pub fn bridge_to_peer(bus: &EventBus, peer_src: &str, relay: RelayTx) -> crate::SubscriptionId {
    let peer_src = peer_src.to_string();
    let bus_for_handler = bus.clone();
    bus.subscribe("**", move |envelope| {
        if envelope.msg_src != peer_src && !envelope.topic.starts_with("bus.") {
            relay.forward(&bus_for_handler, envelope);
        }
        Ok(())
    })
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
