// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Procedure lifecycle states and the legal transition graph.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a procedure's worker.
///
/// Ordered only by time of entry; serialized in the upper-case wire form
/// used by the REST surface (`"PREP_ENV"`, `"RUNNING"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcedureState {
    Creating,
    Idle,
    PrepEnv,
    Loading,
    Ready,
    Running,
    Complete,
    Stopped,
    Failed,
    Unknown,
}

crate::simple_display! {
    ProcedureState {
        Creating => "CREATING",
        Idle => "IDLE",
        PrepEnv => "PREP_ENV",
        Loading => "LOADING",
        Ready => "READY",
        Running => "RUNNING",
        Complete => "COMPLETE",
        Stopped => "STOPPED",
        Failed => "FAILED",
        Unknown => "UNKNOWN",
    }
}

/// A state event arrived that the transition graph does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ProcedureState,
    pub to: ProcedureState,
}

impl ProcedureState {
    /// Whether this state ends the procedure's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcedureState::Complete
                | ProcedureState::Stopped
                | ProcedureState::Failed
                | ProcedureState::Unknown
        )
    }

    /// Whether the graph allows `from -> to`.
    ///
    /// Any non-terminal state may move to STOPPED (forced termination),
    /// FAILED (exception) or UNKNOWN (lost contact); the forward ladder is
    /// otherwise explicit. Terminal states have no successors.
    pub fn can_transition(from: ProcedureState, to: ProcedureState) -> bool {
        use ProcedureState::*;
        if from.is_terminal() {
            return false;
        }
        match to {
            Stopped | Failed | Unknown => true,
            Idle => matches!(from, Creating | PrepEnv | Loading),
            PrepEnv | Loading => matches!(from, Idle),
            // IDLE -> RUNNING covers the init call straight after load
            Running => matches!(from, Idle | Ready),
            Ready => matches!(from, Running),
            Complete => matches!(from, Idle | Ready),
            Creating => false,
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
