// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent event fan-out.
//!
//! Every bus envelope becomes one SSE record per subscriber. Each
//! subscriber owns a bounded queue; a subscriber that falls behind is
//! disconnected rather than ever blocking the bus. Records whose
//! correlation id belongs to an activity carry that activity's `aid`.

use super::RestCtx;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use oet_bus::EventBus;
use oet_core::Envelope;
use parking_lot::Mutex;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Resolves a correlation id to the activity that issued the request.
pub type AidResolver = Arc<dyn Fn(u64) -> Option<u64> + Send + Sync>;

/// Fan-out registry of SSE subscribers.
#[derive(Clone)]
pub struct SseHub {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Envelope>>>>,
    capacity: usize,
    aid_resolver: Option<AidResolver>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        Self { subscribers: Arc::new(Mutex::new(Vec::new())), capacity, aid_resolver: None }
    }

    /// Attribute correlated records to activities in the stream output.
    pub fn with_aid_resolver(mut self, resolver: AidResolver) -> Self {
        self.aid_resolver = Some(resolver);
        self
    }

    /// Mirror every bus event into each subscriber queue.
    pub fn attach(&self, bus: &EventBus) {
        let subscribers = Arc::clone(&self.subscribers);
        bus.subscribe("**", move |envelope| {
            subscribers.lock().retain(|tx| match tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("slow SSE subscriber disconnected");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            Ok(())
        });
    }

    /// Register a new subscriber queue.
    pub fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// One streamed record: the envelope plus its topic, and the owning
/// activity when the correlation id maps to one.
fn record(envelope: &Envelope, resolver: Option<&AidResolver>) -> serde_json::Value {
    let mut data = json!({
        "topic": envelope.topic,
        "msg_src": envelope.msg_src,
        "request_id": envelope.request_id,
        "payload": envelope.payload,
    });
    if let (Some(request_id), Some(resolver)) = (envelope.request_id, resolver) {
        if let Some(aid) = resolver(request_id) {
            data["aid"] = json!(aid);
        }
    }
    data
}

/// `GET /stream`: one SSE record per bus event, with a per-stream
/// monotonically increasing id.
pub async fn stream(
    State(ctx): State<Arc<RestCtx>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.sse.subscribe();
    let resolver = ctx.sse.aid_resolver.clone();
    let events = stream::unfold((rx, 0u64), move |(mut rx, id)| {
        let resolver = resolver.clone();
        async move {
            loop {
                let envelope = rx.recv().await?;
                let data = record(&envelope, resolver.as_ref());
                match Event::default().id(id.to_string()).json_data(&data) {
                    Ok(event) => return Some((Ok(event), (rx, id + 1))),
                    Err(e) => {
                        warn!(error = %e, "unserialisable SSE event skipped");
                        continue;
                    }
                }
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
