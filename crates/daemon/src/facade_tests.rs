// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use oet_core::topics;
use serde_json::json;

fn echo_responder(bus: &EventBus, request_topic: &'static str, response_topic: &'static str) {
    let reply_bus = bus.clone();
    bus.subscribe(request_topic, move |envelope| {
        let mut reply = Envelope::new(
            response_topic,
            "ses",
            Payload::User { value: json!({"answer": 42}) },
        );
        reply.request_id = envelope.request_id;
        reply_bus.publish(&reply);
        Ok(())
    });
}

#[tokio::test]
async fn returns_the_correlated_response() {
    let bus = EventBus::new();
    let requests = RequestIds::new();
    echo_responder(&bus, topics::REQUEST_PROCEDURE_LIST, topics::PROCEDURE_POOL_LIST);

    let response = call_and_respond(
        &bus,
        &requests,
        "rest",
        topics::REQUEST_PROCEDURE_LIST,
        topics::PROCEDURE_POOL_LIST,
        Payload::ProcedureListRequest { pids: None },
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert_eq!(response, Payload::User { value: json!({"answer": 42}) });
}

#[tokio::test]
async fn ignores_responses_for_other_requests() {
    let bus = EventBus::new();
    let requests = RequestIds::new();
    // responder that replies with a wrong correlation id, then the right one
    let reply_bus = bus.clone();
    bus.subscribe(topics::REQUEST_PROCEDURE_LIST, move |envelope| {
        let id = envelope.request_id.unwrap_or_default();
        for (reply_id, n) in [(id + 1000, 1), (id, 2)] {
            reply_bus.publish(
                &Envelope::new(
                    topics::PROCEDURE_POOL_LIST,
                    "ses",
                    Payload::User { value: json!({"n": n}) },
                )
                .with_request_id(reply_id),
            );
        }
        Ok(())
    });

    let response = call_and_respond(
        &bus,
        &requests,
        "rest",
        topics::REQUEST_PROCEDURE_LIST,
        topics::PROCEDURE_POOL_LIST,
        Payload::ProcedureListRequest { pids: None },
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert_eq!(response, Payload::User { value: json!({"n": 2}) });
}

#[tokio::test]
async fn times_out_and_unsubscribes() {
    let bus = EventBus::new();
    let requests = RequestIds::new();

    let err = call_and_respond(
        &bus,
        &requests,
        "rest",
        topics::REQUEST_PROCEDURE_LIST,
        topics::PROCEDURE_POOL_LIST,
        Payload::ProcedureListRequest { pids: None },
        Duration::from_millis(20),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestTimeout);

    // the waiter's subscription is gone: a late reply reaches nobody
    let delivered = bus.publish(
        &Envelope::new(topics::PROCEDURE_POOL_LIST, "ses", Payload::User { value: json!({}) })
            .with_request_id(1),
    );
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn service_error_response_becomes_failure() {
    let bus = EventBus::new();
    let requests = RequestIds::new();
    let reply_bus = bus.clone();
    bus.subscribe(topics::REQUEST_PROCEDURE_CREATE, move |envelope| {
        let mut reply = Envelope::new(
            topics::PROCEDURE_CREATED,
            "ses",
            Payload::ServiceError { kind: ErrorKind::NotReady, message: "pid 2 is LOADING".into() },
        );
        reply.request_id = envelope.request_id;
        reply_bus.publish(&reply);
        Ok(())
    });

    let err = call_and_respond(
        &bus,
        &requests,
        "rest",
        topics::REQUEST_PROCEDURE_CREATE,
        topics::PROCEDURE_CREATED,
        Payload::ProcedureListRequest { pids: None },
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotReady);
    assert_eq!(err.message, "pid 2 is LOADING");
}

#[test]
fn request_ids_are_unique_and_increasing() {
    let ids = RequestIds::new();
    let a = ids.next();
    let b = ids.next();
    assert!(b > a);
}
