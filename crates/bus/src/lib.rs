// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! oet-bus: topic pub/sub with a cross-process relay.
//!
//! Each process runs one [`EventBus`]. Publishing fans out synchronously to
//! every handler whose pattern matches; the relay module bridges envelopes
//! over worker stdio so both sides observe one logical bus.

pub mod relay;

use oet_core::{topic_matches, topics, Envelope, Payload};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one handler invocation.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Handler,
}

struct BusInner {
    subs: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

/// In-process topic pub/sub.
///
/// Cloning is cheap and shares the subscription table. Delivery order is
/// subscription order, which is deterministic within a process; handlers
/// registered after a publish see nothing from before.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { inner: Arc::new(BusInner { subs: RwLock::new(Vec::new()), next_id: AtomicU64::new(1) }) }
    }

    /// Register a handler for every topic matching `pattern`.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: impl Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subs.write().push(Subscription {
            id,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription. Returns false when the id is already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subs.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Synchronously deliver to all matching handlers, in subscription
    /// order. Returns the number of handlers invoked.
    ///
    /// A failing handler is isolated: the error is logged and republished
    /// once on `bus.handler.error` (failures while delivering that event
    /// are only logged).
    pub fn publish(&self, envelope: &Envelope) -> usize {
        // Snapshot outside the lock so handlers may subscribe, unsubscribe
        // or publish reentrantly.
        let matching: Vec<Handler> = {
            let subs = self.inner.subs.read();
            subs.iter()
                .filter(|s| topic_matches(&s.pattern, &envelope.topic))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        for handler in &matching {
            if let Err(e) = handler(envelope) {
                warn!(topic = %envelope.topic, error = %e, "bus handler failed");
                if envelope.topic != topics::BUS_HANDLER_ERROR {
                    self.publish(&Envelope::new(
                        topics::BUS_HANDLER_ERROR,
                        "bus",
                        Payload::HandlerError {
                            topic: envelope.topic.clone(),
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }
        matching.len()
    }

    #[cfg(test)]
    fn subscription_count(&self) -> usize {
        self.inner.subs.read().len()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
