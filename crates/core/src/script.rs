// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User script references and call arguments.

use serde::{Deserialize, Serialize};

/// A user-authored control script, addressed either on the worker's
/// filesystem or inside a git repository.
///
/// Serializes with `{"kind": "filesystem" | "git", ...fields}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutableScript {
    /// Absolute path on the worker's filesystem
    Filesystem { path: String },

    /// Path relative to the root of a cloned repository.
    ///
    /// When `commit` is omitted, the branch tip at clone time is resolved
    /// to a concrete hash and stored back on the procedure record.
    Git {
        path: String,
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
        #[serde(default)]
        create_env: bool,
    },
}

impl ExecutableScript {
    /// Script path as given (absolute for filesystem, repo-relative for git).
    pub fn path(&self) -> &str {
        match self {
            ExecutableScript::Filesystem { path } => path,
            ExecutableScript::Git { path, .. } => path,
        }
    }

    /// Whether preparing this script requires a per-commit environment.
    pub fn wants_env(&self) -> bool {
        matches!(self, ExecutableScript::Git { create_env: true, .. })
    }

    /// Pin a git script to the commit the clone resolved to. No-op for
    /// filesystem scripts.
    pub fn pin_commit(&mut self, resolved: &str) {
        if let ExecutableScript::Git { commit, .. } = self {
            *commit = Some(resolved.to_string());
        }
    }
}

impl std::fmt::Display for ExecutableScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutableScript::Filesystem { path } => write!(f, "file:{}", path),
            ExecutableScript::Git { path, repo, .. } => write!(f, "git:{}#{}", repo, path),
        }
    }
}

/// Positional and keyword arguments for one user-function invocation.
///
/// Values are arbitrary JSON; type mismatches surface inside the worker as
/// a FAILED transition, never here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl ProcedureInput {
    /// Keyword-only input.
    pub fn kwargs_only(kwargs: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { args: Vec::new(), kwargs }
    }

    /// Insert or replace a keyword argument.
    pub fn set_kwarg(&mut self, key: &str, value: serde_json::Value) {
        self.kwargs.insert(key.to_string(), value);
    }
}

/// One invocation attempt of a named function on a loaded script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub fn_name: String,
    pub input: ProcedureInput,
    pub at_ms: u64,
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
