// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames between the supervisor, its workers, and script hosts.
//!
//! Supervisor -> worker frames travel on the worker's stdin; the reverse
//! direction carries plain bus [`Envelope`]s on stdout. The script host
//! protocol is what a user script speaks on its own stdio.

use oet_core::{Envelope, ExecutableScript, ProcedureInput};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command frame on a worker's work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Adopt a per-commit environment. The worker blocks on the build
    /// markers under `env_dir` before reporting IDLE again.
    Env { env_id: String, env_dir: PathBuf, site_packages: PathBuf },

    /// Load the script, spawning its host process.
    Load { script: ExecutableScript, resolved_path: PathBuf },

    /// Invoke a named function on the loaded script.
    Run { fn_name: String, input: ProcedureInput },

    /// Bridged bus traffic for in-worker subscribers.
    PubSub { envelope: Envelope },

    /// Soft-stop request; the worker winds down and exits.
    Shutdown,
}

/// Handshake a script host sends as its first line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostHello {
    pub functions: Vec<String>,
}

/// One line from a script host.
///
/// `{"hello": ...}` opens the session, `{"ok": ...}` answers an invoke,
/// `{"event": ..., "payload": ...}` is an unsolicited user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostFrame {
    Hello { hello: HostHello },
    Event {
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Result {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

/// Invocation frame sent to a script host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInvoke {
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl HostInvoke {
    pub fn new(fn_name: &str, input: &ProcedureInput) -> Self {
        Self {
            fn_name: fn_name.to_string(),
            args: input.args.clone(),
            kwargs: input.kwargs.clone(),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
