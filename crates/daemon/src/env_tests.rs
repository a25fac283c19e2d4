// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn timeouts_fall_back_to_defaults() {
    std::env::remove_var("OET_STARTUP_TIMEOUT_S");
    std::env::remove_var("OET_SOFT_STOP_S");
    std::env::remove_var("OET_HARD_STOP_S");
    assert_eq!(startup_timeout(), Duration::from_secs(30));
    assert_eq!(soft_stop_timeout(), Duration::from_secs(5));
    assert_eq!(hard_stop_timeout(), Duration::from_secs(3));
    assert_eq!(env_timeout(), Duration::from_secs(300));
    assert_eq!(api_timeout(), Duration::from_secs(10));
    assert_eq!(history_limit(), 10);
}

#[test]
#[serial]
fn timeout_overrides_parse_seconds() {
    std::env::set_var("OET_STARTUP_TIMEOUT_S", "2");
    assert_eq!(startup_timeout(), Duration::from_secs(2));
    std::env::set_var("OET_STARTUP_TIMEOUT_S", "nonsense");
    assert_eq!(startup_timeout(), Duration::from_secs(30));
    std::env::remove_var("OET_STARTUP_TIMEOUT_S");
}

#[test]
#[serial]
fn state_dir_prefers_explicit_override() {
    std::env::set_var("OET_STATE_DIR", "/tmp/oet-test-state");
    assert_eq!(state_dir(), PathBuf::from("/tmp/oet-test-state"));
    std::env::remove_var("OET_STATE_DIR");
}

#[test]
#[serial]
fn abort_script_ignores_empty_value() {
    std::env::set_var("OET_ABORT_SCRIPT", "");
    assert!(abort_script().is_none());
    std::env::set_var("OET_ABORT_SCRIPT", "/scripts/abort.py");
    assert_eq!(abort_script().as_deref(), Some("/scripts/abort.py"));
    std::env::remove_var("OET_ABORT_SCRIPT");
}
