// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Procedure records and their state timeline.

use crate::script::{ExecutableScript, FunctionCall, ProcedureInput};
use crate::state::{ProcedureState, TransitionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recorded state entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: ProcedureState,
    pub at_ms: u64,
}

/// Ordered state timeline of a procedure.
///
/// `stacktrace` is set exactly when the last entry is FAILED.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureHistory {
    pub entries: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl ProcedureHistory {
    /// Start a timeline at CREATING.
    pub fn starting(at_ms: u64) -> Self {
        Self {
            entries: vec![HistoryEntry { state: ProcedureState::Creating, at_ms }],
            stacktrace: None,
        }
    }

    pub fn current(&self) -> Option<ProcedureState> {
        self.entries.last().map(|e| e.state)
    }

    /// Record a transition, enforcing the graph. A FAILED entry carries the
    /// stacktrace delivered with the event; recording any other state clears
    /// it, preserving `stacktrace <=> FAILED`.
    pub fn record(
        &mut self,
        state: ProcedureState,
        at_ms: u64,
        stacktrace: Option<String>,
    ) -> Result<(), TransitionError> {
        if let Some(current) = self.current() {
            if !ProcedureState::can_transition(current, state) {
                return Err(TransitionError { from: current, to: state });
            }
        }
        self.entries.push(HistoryEntry { state, at_ms });
        self.stacktrace = if state == ProcedureState::Failed { stacktrace } else { None };
        Ok(())
    }

    /// States in recorded order, without timestamps.
    pub fn states(&self) -> Vec<ProcedureState> {
        self.entries.iter().map(|e| e.state).collect()
    }
}

/// A loaded user script instance with its execution history.
///
/// Owned by the execution service; the worker process itself only ever sees
/// the script reference and call frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub pid: u64,
    pub script: ExecutableScript,
    pub calls: Vec<FunctionCall>,
    pub history: ProcedureHistory,
}

impl Procedure {
    pub fn new(pid: u64, script: ExecutableScript, at_ms: u64) -> Self {
        Self { pid, script, calls: Vec::new(), history: ProcedureHistory::starting(at_ms) }
    }

    /// A procedure whose timeline has not been written yet; the CREATING
    /// entry arrives as a recorded event like every other transition.
    pub fn pending(pid: u64, script: ExecutableScript) -> Self {
        Self { pid, script, calls: Vec::new(), history: ProcedureHistory::default() }
    }

    /// Current state, i.e. the last history entry.
    pub fn state(&self) -> ProcedureState {
        self.history.current().unwrap_or(ProcedureState::Creating)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Most recent input per function name, in the shape the REST surface
    /// reports (`{"init": {...}, "main": {...}}`).
    pub fn script_args(&self) -> BTreeMap<String, ProcedureInput> {
        let mut args = BTreeMap::new();
        for call in &self.calls {
            args.insert(call.fn_name.clone(), call.input.clone());
        }
        args
    }

    pub fn summary(&self) -> ProcedureSummary {
        ProcedureSummary {
            pid: self.pid,
            script: self.script.clone(),
            script_args: self.script_args(),
            history: self.history.clone(),
            state: self.state(),
        }
    }
}

/// Wire DTO for a procedure, as listed and streamed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureSummary {
    pub pid: u64,
    pub script: ExecutableScript,
    pub script_args: BTreeMap<String, ProcedureInput>,
    pub history: ProcedureHistory,
    pub state: ProcedureState,
}

#[cfg(test)]
#[path = "procedure_tests.rs"]
mod tests;
