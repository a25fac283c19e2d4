// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use oet_core::{Envelope, ProcedureHistory};
use parking_lot::Mutex;
use serde_json::json;
use tower::ServiceExt;

fn summary(pid: u64, state: ProcedureState) -> ProcedureSummary {
    ProcedureSummary {
        pid,
        script: ExecutableScript::Filesystem { path: "/tmp/scripts/hello.py".into() },
        script_args: Default::default(),
        history: ProcedureHistory::starting(1),
        state,
    }
}

/// Answer every request topic with canned service behavior, recording the
/// requests seen.
fn fake_services(bus: &EventBus) -> Arc<Mutex<Vec<Payload>>> {
    let asked: Arc<Mutex<Vec<Payload>>> = Arc::new(Mutex::new(Vec::new()));
    let routes = [
        (topics::REQUEST_PROCEDURE_LIST, topics::PROCEDURE_POOL_LIST),
        (topics::REQUEST_PROCEDURE_CREATE, topics::PROCEDURE_CREATED),
        (topics::REQUEST_PROCEDURE_START, topics::PROCEDURE_STARTED),
        (topics::REQUEST_PROCEDURE_STOP, topics::PROCEDURE_STOPPED),
        (topics::REQUEST_ACTIVITY_RUN, topics::ACTIVITY_RUNNING),
        (topics::REQUEST_ACTIVITY_LIST, topics::ACTIVITY_POOL_LIST),
    ];
    for (request_topic, response_topic) in routes {
        let reply_bus = bus.clone();
        let asked = Arc::clone(&asked);
        bus.subscribe(request_topic, move |envelope| {
            asked.lock().push(envelope.payload.clone());
            let payload = match &envelope.payload {
                Payload::ProcedureListRequest { pids: Some(pids) } if pids.contains(&999) => {
                    Payload::ServiceError {
                        kind: ErrorKind::UnknownPid,
                        message: "no retained procedure with pid 999".into(),
                    }
                }
                Payload::ProcedureListRequest { pids: Some(pids) } => Payload::ProcedureList {
                    procedures: pids.iter().map(|pid| summary(*pid, ProcedureState::Ready)).collect(),
                },
                Payload::ProcedureListRequest { pids: None } => Payload::ProcedureList {
                    procedures: vec![summary(1, ProcedureState::Ready)],
                },
                Payload::Prepare(_) => {
                    Payload::ProcedureCreated { procedure: summary(1, ProcedureState::Ready) }
                }
                Payload::Start(cmd) => {
                    Payload::ProcedureStarted { procedure: summary(cmd.pid, ProcedureState::Running) }
                }
                Payload::Stop(cmd) => Payload::ProcedureStopped {
                    procedures: vec![summary(cmd.pid, ProcedureState::Stopped)],
                },
                Payload::ActivityListRequest { .. } => Payload::ActivityList { activities: vec![] },
                Payload::ActivityRun(_) => Payload::ActivityRunning {
                    activity: oet_core::ActivitySummary {
                        aid: 1,
                        pid: 1,
                        sbd_id: "sbi-x".into(),
                        activity_name: "observe".into(),
                        prepare_only: true,
                        script_args: Default::default(),
                        activity_states: vec![(oet_core::ActivityState::Requested, 1)],
                    },
                },
                other => Payload::ServiceError {
                    kind: ErrorKind::BadRequest,
                    message: format!("unhandled: {:?}", other),
                },
            };
            let mut reply = Envelope::new(response_topic, "ses", payload);
            reply.request_id = envelope.request_id;
            reply_bus.publish(&reply);
            Ok(())
        });
    }
    asked
}

fn harness() -> (Router, Arc<Mutex<Vec<Payload>>>, EventBus) {
    let bus = EventBus::new();
    let asked = fake_services(&bus);
    let ctx = Arc::new(RestCtx {
        bus: bus.clone(),
        requests: RequestIds::new(),
        api_timeout: Duration::from_secs(1),
        sse: sse::SseHub::new(16),
    });
    (router(ctx), asked, bus)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_procedures_returns_summaries() {
    let (app, _, _) = harness();
    let response =
        app.oneshot(Request::get("/procedures").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["pid"], 1);
    assert_eq!(body[0]["state"], "READY");
}

#[tokio::test]
async fn unknown_pid_maps_to_resource_not_found() {
    let (app, _, _) = harness();
    let response =
        app.oneshot(Request::get("/procedures/999").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "404 Not Found");
    assert_eq!(body["type"], "ResourceNotFound");
}

#[tokio::test]
async fn create_procedure_returns_201() {
    let (app, asked, _) = harness();
    let request = Request::post("/procedures")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "script": {"kind": "filesystem", "path": "/tmp/scripts/hello.py"},
                "script_args": {"init": {"kwargs": {"subarray_id": 1}}}
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let prepare = asked.lock().iter().find_map(|p| match p {
        Payload::Prepare(cmd) => Some(cmd.clone()),
        _ => None,
    });
    let prepare = prepare.unwrap();
    assert_eq!(prepare.init_args.unwrap().kwargs["subarray_id"], json!(1));
    assert!(!prepare.create_env);
}

#[tokio::test]
async fn put_running_starts_main() {
    let (app, asked, _) = harness();
    let request = Request::put("/procedures/1")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "state": "RUNNING",
                "script_args": {"main": {"kwargs": {"verbose": true}}}
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let start = asked.lock().iter().find_map(|p| match p {
        Payload::Start(cmd) => Some(cmd.clone()),
        _ => None,
    });
    let start = start.unwrap();
    assert_eq!(start.pid, 1);
    assert_eq!(start.fn_name, "main");
    assert!(!start.force);
    assert_eq!(start.fn_args.kwargs["verbose"], json!(true));
}

#[tokio::test]
async fn put_stopped_with_abort_requests_the_follow_on() {
    let (app, asked, _) = harness();
    let request = Request::put("/procedures/1")
        .header("content-type", "application/json")
        .body(Body::from(json!({"state": "STOPPED", "abort": true}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["state"], "STOPPED");

    let stop = asked.lock().iter().find_map(|p| match p {
        Payload::Stop(cmd) => Some(cmd.clone()),
        _ => None,
    });
    assert!(stop.unwrap().run_abort);
}

#[tokio::test]
async fn put_other_states_is_a_bad_request() {
    let (app, _, _) = harness();
    let request = Request::put("/procedures/1")
        .header("content-type", "application/json")
        .body(Body::from(json!({"state": "IDLE"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["type"], "BadRequest");
}

#[tokio::test]
async fn create_activity_returns_201() {
    let (app, _, _) = harness();
    let request = Request::post("/activities")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "sbd_id": "sbi-mvp01-20200325-00002",
                "activity_name": "observe",
                "prepare_only": true
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["aid"], 1);
}

#[tokio::test]
async fn unanswered_request_times_out_as_504() {
    let bus = EventBus::new();
    let ctx = Arc::new(RestCtx {
        bus: bus.clone(),
        requests: RequestIds::new(),
        api_timeout: Duration::from_millis(50),
        sse: sse::SseHub::new(16),
    });
    let app = router(ctx);
    let response =
        app.oneshot(Request::get("/procedures").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["type"], "RequestTimeout");
}
