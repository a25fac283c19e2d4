// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds that cross the bus.
//!
//! Failures raised anywhere in the engine are carried on response topics as
//! a `ServiceError` payload tagged with one of these kinds; the REST edge
//! maps each kind onto an HTTP status.

use serde::{Deserialize, Serialize};

/// Engine-level failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Script path could not be resolved during load
    ScriptNotFound,
    /// Worker received a message it cannot service in its current state
    InvalidWorkerCommand,
    /// Environment clone/install failed
    EnvironmentBuildFailed,
    /// Timed out waiting for another caller's environment build
    EnvironmentTimeout,
    /// Worker process did not report startup in time
    WorkerStartupTimeout,
    /// Worker process survived the kill escalation
    WorkerUnreachable,
    /// No retained procedure with that pid
    UnknownPid,
    /// No retained activity with that aid
    UnknownAid,
    /// Start requested while the worker is not READY
    NotReady,
    /// Live worker cap reached
    TooManyWorkers,
    /// No response arrived for a correlated request in time
    RequestTimeout,
    /// Procedure creation did not complete within the activity wait
    ActivityTimeout,
    /// Malformed or unsupported request
    BadRequest,
    /// Unclassified internal failure
    Internal,
}

crate::simple_display! {
    ErrorKind {
        ScriptNotFound => "ScriptNotFound",
        InvalidWorkerCommand => "InvalidWorkerCommand",
        EnvironmentBuildFailed => "EnvironmentBuildFailed",
        EnvironmentTimeout => "EnvironmentTimeout",
        WorkerStartupTimeout => "WorkerStartupTimeout",
        WorkerUnreachable => "WorkerUnreachable",
        UnknownPid => "UnknownPid",
        UnknownAid => "UnknownAid",
        NotReady => "NotReady",
        TooManyWorkers => "TooManyWorkers",
        RequestTimeout => "RequestTimeout",
        ActivityTimeout => "ActivityTimeout",
        BadRequest => "BadRequest",
        Internal => "Internal",
    }
}
