// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::topic::topics;
use serde_json::json;

#[test]
fn prepare_envelope_round_trips() {
    let cmd = PrepareCmd {
        script: ExecutableScript::Filesystem { path: "/tmp/scripts/hello.py".into() },
        init_args: Some(ProcedureInput::default()),
        create_env: false,
    };
    let envelope = Envelope::new(topics::REQUEST_PROCEDURE_CREATE, "rest", Payload::Prepare(cmd))
        .with_request_id(17);
    let json = serde_json::to_string(&envelope).unwrap();
    let back: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, envelope);
}

#[test]
fn payload_carries_flat_type_tag() {
    let payload = Payload::Stop(StopCmd { pid: 4, run_abort: true });
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value, json!({"type": "stop", "pid": 4, "run_abort": true}));
}

#[test]
fn statechange_constructor_fills_topic() {
    let envelope =
        Envelope::statechange("worker-3", 3, ProcedureState::Running, 1_000, None);
    assert_eq!(envelope.topic, topics::PROCEDURE_STATECHANGE);
    assert_eq!(envelope.msg_src, "worker-3");
    match envelope.payload {
        Payload::StateChange { pid, state, stacktrace, .. } => {
            assert_eq!(pid, 3);
            assert_eq!(state, ProcedureState::Running);
            assert!(stacktrace.is_none());
        }
        other => panic!("expected statechange, got {:?}", other),
    }
}

#[test]
fn missing_request_id_stays_absent() {
    let envelope = Envelope::new(
        "user.script.announce",
        "worker-1",
        Payload::User { value: json!({"msg": "hi"}) },
    );
    let value = serde_json::to_value(&envelope).unwrap();
    assert!(value.get("request_id").is_none());
}

#[test]
fn service_error_round_trips_kind() {
    let payload = Payload::ServiceError {
        kind: ErrorKind::NotReady,
        message: "pid 2 is LOADING".into(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    let back: Payload = serde_json::from_str(&json).unwrap();
    assert_eq!(back, payload);
}
