// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! oet-core: domain types for the OET script execution engine

pub mod macros;

pub mod activity;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod procedure;
pub mod script;
pub mod state;
pub mod topic;

pub use activity::{ActivityState, ActivitySummary};
pub use clock::{Clock, FakeClock, SystemClock};
pub use envelope::{
    ActivityCmd, Envelope, Payload, PrepareCmd, ScriptArgs, StartCmd, StopCmd, INIT_FN, MAIN_FN,
};
pub use error::ErrorKind;
pub use procedure::{HistoryEntry, Procedure, ProcedureHistory, ProcedureSummary};
pub use script::{ExecutableScript, FunctionCall, ProcedureInput};
pub use state::{ProcedureState, TransitionError};
pub use topic::{topic_matches, topics};
