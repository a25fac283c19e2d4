// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic names and subscription pattern matching.
//!
//! Topics are dotted strings. Patterns support `*` for exactly one segment
//! and a trailing `**` for any remainder (including none).

/// Well-known topic names.
pub mod topics {
    pub const REQUEST_PROCEDURE_LIST: &str = "request.procedure.list";
    pub const REQUEST_PROCEDURE_CREATE: &str = "request.procedure.create";
    pub const REQUEST_PROCEDURE_START: &str = "request.procedure.start";
    pub const REQUEST_PROCEDURE_STOP: &str = "request.procedure.stop";
    pub const REQUEST_ACTIVITY_RUN: &str = "request.activity.run";
    pub const REQUEST_ACTIVITY_LIST: &str = "request.activity.list";

    pub const PROCEDURE_POOL_LIST: &str = "procedure.pool.list";
    pub const PROCEDURE_CREATED: &str = "procedure.lifecycle.created";
    pub const PROCEDURE_STARTED: &str = "procedure.lifecycle.started";
    pub const PROCEDURE_STOPPED: &str = "procedure.lifecycle.stopped";
    pub const PROCEDURE_PREPARING: &str = "procedure.lifecycle.preparing";
    pub const PROCEDURE_STATECHANGE: &str = "procedure.lifecycle.statechange";

    pub const ACTIVITY_POOL_LIST: &str = "activity.pool.list";
    pub const ACTIVITY_RUNNING: &str = "activity.lifecycle.running";

    pub const BUS_HANDLER_ERROR: &str = "bus.handler.error";
    pub const BUS_DROP: &str = "bus.drop";
}

/// Whether `topic` matches the subscription `pattern`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_segs = pattern.split('.');
    let mut topic_segs = topic.split('.');
    loop {
        match (pattern_segs.next(), topic_segs.next()) {
            (Some("**"), _) => return pattern_segs.next().is_none(),
            (Some(p), Some(t)) => {
                if p != "*" && p != t {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
