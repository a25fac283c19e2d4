// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response correlation over the bus.
//!
//! A caller publishes a request with a fresh correlation id and waits on a
//! single-shot channel fed by a filtered response subscription. Responses
//! with a foreign `request_id` never reach the waiter.

use crate::error::ServiceFailure;
use oet_bus::EventBus;
use oet_core::{Envelope, ErrorKind, Payload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Process-wide correlation id allocator.
#[derive(Clone, Default)]
pub struct RequestIds {
    next: Arc<AtomicU64>,
}

impl RequestIds {
    pub fn new() -> Self {
        Self { next: Arc::new(AtomicU64::new(1)) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Publish `payload` on `request_topic` and wait for the correlated event
/// on `response_topic`.
///
/// Returns the response payload; a `ServiceError` response or an expired
/// `timeout` become `Err`. The response subscription is removed on every
/// path.
pub async fn call_and_respond(
    bus: &EventBus,
    requests: &RequestIds,
    msg_src: &str,
    request_topic: &str,
    response_topic: &str,
    payload: Payload,
    timeout: Duration,
) -> Result<Payload, ServiceFailure> {
    let request_id = requests.next();
    call_with_id(bus, request_id, msg_src, request_topic, response_topic, payload, timeout).await
}

/// As [`call_and_respond`] with a caller-allocated correlation id, for
/// callers that track the id themselves.
pub async fn call_with_id(
    bus: &EventBus,
    request_id: u64,
    msg_src: &str,
    request_topic: &str,
    response_topic: &str,
    payload: Payload,
    timeout: Duration,
) -> Result<Payload, ServiceFailure> {
    // capacity 1: a correlation id gets exactly one response
    let (tx, mut rx) = mpsc::channel::<Payload>(1);
    let sub = bus.subscribe(response_topic, move |envelope| {
        if envelope.request_id == Some(request_id) {
            let _ = tx.try_send(envelope.payload.clone());
        }
        Ok(())
    });

    bus.publish(&Envelope::new(request_topic, msg_src, payload).with_request_id(request_id));

    let result = tokio::time::timeout(timeout, rx.recv()).await;
    bus.unsubscribe(sub);

    match result {
        Ok(Some(Payload::ServiceError { kind, message })) => Err(ServiceFailure::new(kind, message)),
        Ok(Some(response)) => Ok(response),
        Ok(None) | Err(_) => Err(ServiceFailure::new(
            ErrorKind::RequestTimeout,
            format!("no response on {} within {:?}", response_topic, timeout),
        )),
    }
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod tests;
