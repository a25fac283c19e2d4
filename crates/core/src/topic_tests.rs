// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    exact = { "request.procedure.create", "request.procedure.create", true },
    exact_mismatch = { "request.procedure.create", "request.procedure.start", false },
    single_wildcard = { "request.procedure.*", "request.procedure.stop", true },
    single_wildcard_depth = { "request.*", "request.procedure.stop", false },
    single_wildcard_mid = { "procedure.*.statechange", "procedure.lifecycle.statechange", true },
    trailing_multi = { "procedure.**", "procedure.lifecycle.statechange", true },
    trailing_multi_empty = { "procedure.**", "procedure", true },
    trailing_multi_mismatch = { "procedure.**", "activity.pool.list", false },
    everything = { "**", "user.script.announce", true },
    shorter_topic = { "request.procedure.create", "request.procedure", false },
    longer_topic = { "request.procedure", "request.procedure.create", false },
)]
fn matching(pattern: &str, topic: &str, expected: bool) {
    assert_eq!(topic_matches(pattern, topic), expected, "pattern={pattern} topic={topic}");
}

#[test]
fn multi_wildcard_must_be_trailing() {
    // `**` anywhere but the tail never matches: the remainder check fails.
    assert!(!topic_matches("a.**.c", "a.b.c"));
}
