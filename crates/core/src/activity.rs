// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity records: a Scheduling Block invocation bound to a procedure.

use crate::script::ProcedureInput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of an activity request.
///
/// The activity domain carries a single state; procedure lifecycle detail
/// lives on the bound procedure's own history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    Requested,
}

crate::simple_display! {
    ActivityState {
        Requested => "REQUESTED",
    }
}

/// Wire DTO for an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub aid: u64,
    /// Procedure the activity resolved to
    pub pid: u64,
    pub sbd_id: String,
    pub activity_name: String,
    pub prepare_only: bool,
    /// Function inputs after override merging and `sb_json` injection
    pub script_args: BTreeMap<String, ProcedureInput>,
    pub activity_states: Vec<(ActivityState, u64)>,
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
