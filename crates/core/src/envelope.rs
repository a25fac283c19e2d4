// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus envelopes and the typed payloads they carry.
//!
//! Every event on the bus is an [`Envelope`]: a topic, the originating
//! component (`msg_src`, used by the cross-process bridge for echo
//! suppression), an optional correlation id, and a typed [`Payload`].

use crate::activity::ActivitySummary;
use crate::error::ErrorKind;
use crate::procedure::ProcedureSummary;
use crate::script::{ExecutableScript, ProcedureInput};
use crate::state::ProcedureState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Function name primed at prepare time.
pub const INIT_FN: &str = "init";
/// Function name started by default on a RUNNING request.
pub const MAIN_FN: &str = "main";

/// Function inputs keyed by function name.
pub type ScriptArgs = BTreeMap<String, ProcedureInput>;

/// Request to prepare a new procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareCmd {
    pub script: ExecutableScript,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_args: Option<ProcedureInput>,
    #[serde(default)]
    pub create_env: bool,
}

/// Request to start a prepared procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCmd {
    pub pid: u64,
    pub fn_name: String,
    #[serde(default)]
    pub fn_args: ProcedureInput,
    #[serde(default)]
    pub force: bool,
}

/// Request to stop a procedure, optionally chaining the abort script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCmd {
    pub pid: u64,
    #[serde(default)]
    pub run_abort: bool,
}

/// Request to run a Scheduling Block activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCmd {
    pub sbd_id: String,
    pub activity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_args_override: Option<ScriptArgs>,
    #[serde(default)]
    pub prepare_only: bool,
}

/// Typed payload of a bus envelope.
///
/// Serializes with `{"type": "<tag>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    // -- requests --
    Prepare(PrepareCmd),
    Start(StartCmd),
    Stop(StopCmd),
    ProcedureListRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pids: Option<Vec<u64>>,
    },
    ActivityRun(ActivityCmd),
    ActivityListRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aids: Option<Vec<u64>>,
    },

    // -- responses --
    ProcedureCreated { procedure: ProcedureSummary },
    ProcedureStarted { procedure: ProcedureSummary },
    ProcedureStopped { procedures: Vec<ProcedureSummary> },
    ProcedureList { procedures: Vec<ProcedureSummary> },
    ActivityRunning { activity: ActivitySummary },
    ActivityList { activities: Vec<ActivitySummary> },
    /// A request failed; carried on the request's response topic so the
    /// waiter observes it under the same correlation id.
    ServiceError { kind: ErrorKind, message: String },

    // -- unsolicited lifecycle --
    Preparing { pid: u64, script: ExecutableScript },
    StateChange {
        pid: u64,
        state: ProcedureState,
        at_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
    },

    // -- bus housekeeping --
    HandlerError { topic: String, message: String },
    Dropped { topic: String },

    // -- user script traffic: arbitrary JSON --
    User { value: serde_json::Value },
}

/// One event on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub msg_src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(topic: &str, msg_src: &str, payload: Payload) -> Self {
        Self { topic: topic.to_string(), msg_src: msg_src.to_string(), request_id: None, payload }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Statechange convenience constructor used by workers and supervisor.
    pub fn statechange(
        msg_src: &str,
        pid: u64,
        state: ProcedureState,
        at_ms: u64,
        stacktrace: Option<String>,
    ) -> Self {
        Self::new(
            crate::topic::topics::PROCEDURE_STATECHANGE,
            msg_src,
            Payload::StateChange { pid, state, at_ms, stacktrace },
        )
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
