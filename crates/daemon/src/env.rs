// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

fn duration_secs(var: &str, default_s: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_s))
}

/// Base URL of the Scheduling Block archive.
pub fn oda_url() -> String {
    std::env::var("ODA_URL").unwrap_or_else(|_| "http://localhost:5000".to_string())
}

/// Directory holding locally installed control scripts.
pub fn scripts_location() -> PathBuf {
    std::env::var("SCRIPTS_LOCATION").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/scripts"))
}

/// Resolve state directory: OET_STATE_DIR > XDG_STATE_HOME/oet > ~/.local/state/oet
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OET_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("oet");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local/state/oet"),
        Err(_) => PathBuf::from("/tmp/oet"),
    }
}

/// How long a worker may take to report startup (default 30 s).
pub fn startup_timeout() -> Duration {
    duration_secs("OET_STARTUP_TIMEOUT_S", 30)
}

/// Grace period after a shutdown request before signalling (default 5 s).
pub fn soft_stop_timeout() -> Duration {
    duration_secs("OET_SOFT_STOP_S", 5)
}

/// Grace period after the interrupt signal before the kill (default 3 s).
pub fn hard_stop_timeout() -> Duration {
    duration_secs("OET_HARD_STOP_S", 3)
}

/// Overall wait on another caller's environment build (default 300 s).
pub fn env_timeout() -> Duration {
    duration_secs("OET_ENV_TIMEOUT_S", 300)
}

/// Request/response correlation wait (default 10 s).
pub fn api_timeout() -> Duration {
    duration_secs("OET_API_TIMEOUT_S", 10)
}

/// Retained terminal procedures (default 10).
pub fn history_limit() -> usize {
    std::env::var("OET_HISTORY_LIMIT").ok().and_then(|s| s.parse().ok()).unwrap_or(10)
}

/// Cap on concurrently live workers; 0 means unlimited.
pub fn max_workers() -> usize {
    std::env::var("OET_MAX_WORKERS").ok().and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// REST listen port.
pub fn http_port() -> u16 {
    std::env::var("OET_HTTP_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(5000)
}

/// Interpreter used to run user scripts inside a worker.
pub fn script_runner() -> String {
    std::env::var("OET_SCRIPT_RUNNER").unwrap_or_else(|_| "python3".to_string())
}

/// Filesystem path of the follow-on abort script, when configured.
pub fn abort_script() -> Option<String> {
    std::env::var("OET_ABORT_SCRIPT").ok().filter(|s| !s.is_empty())
}

/// How long a publisher blocks on a full relay queue before dropping.
pub fn relay_timeout() -> Duration {
    std::env::var("OET_RELAY_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
}

/// Bounded per-subscriber SSE queue length (default 1024).
pub fn sse_queue_len() -> usize {
    std::env::var("OET_SSE_QUEUE").ok().and_then(|s| s.parse().ok()).unwrap_or(1024)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
