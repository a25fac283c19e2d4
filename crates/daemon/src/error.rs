// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service-level failure carried between components and onto the bus.

use oet_core::ErrorKind;
use thiserror::Error;

/// A classified failure of an engine operation.
///
/// Converted to a `ServiceError` payload when it crosses the bus and to an
/// HTTP status at the REST edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ServiceFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn unknown_pid(pid: u64) -> Self {
        Self::new(ErrorKind::UnknownPid, format!("no retained procedure with pid {}", pid))
    }

    pub fn unknown_aid(aid: u64) -> Self {
        Self::new(ErrorKind::UnknownAid, format!("no retained activity with aid {}", aid))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Parse the classification prefix a worker puts on infrastructure
/// stacktraces (`"ScriptNotFound: ..."`). User-script tracebacks carry no
/// recognised prefix and classify as None.
pub fn classify_stacktrace(stacktrace: &str) -> Option<ErrorKind> {
    let prefix = stacktrace.split(':').next().unwrap_or_default().trim();
    match prefix {
        "ScriptNotFound" => Some(ErrorKind::ScriptNotFound),
        "InvalidWorkerCommand" => Some(ErrorKind::InvalidWorkerCommand),
        "EnvironmentBuildFailed" => Some(ErrorKind::EnvironmentBuildFailed),
        "EnvironmentTimeout" => Some(ErrorKind::EnvironmentTimeout),
        "WorkerStartupTimeout" => Some(ErrorKind::WorkerStartupTimeout),
        "WorkerUnreachable" => Some(ErrorKind::WorkerUnreachable),
        _ => None,
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
