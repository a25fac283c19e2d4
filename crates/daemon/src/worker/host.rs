// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script host subprocess client.
//!
//! A user script runs as a child of the worker and speaks newline-JSON on
//! its stdio: a `hello` greeting naming its callable functions, one result
//! line per invoke, and unsolicited event lines that become `user.*` bus
//! traffic.

use crate::protocol::{HostFrame, HostInvoke};
use oet_bus::relay;
use oet_core::ProcedureInput;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("ScriptNotFound: {0}")]
    NotFound(String),

    #[error("script host spawn failed: {0}")]
    Spawn(String),

    #[error("script host sent no greeting within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("script host closed before greeting")]
    ClosedEarly,
}

/// A running user script.
#[derive(Debug)]
pub struct ScriptHost {
    child: Child,
    stdin: ChildStdin,
    results_rx: mpsc::Receiver<(bool, Option<String>)>,
    functions: Vec<String>,
}

impl ScriptHost {
    /// Spawn the script under `runner` and perform the handshake.
    ///
    /// `site_packages`, when present, is prepended to the interpreter
    /// search path for this process only. Unsolicited event lines are
    /// forwarded to `event_tx` for the worker to republish.
    pub async fn spawn(
        runner: &str,
        script: &Path,
        site_packages: Option<&Path>,
        event_tx: mpsc::Sender<(String, serde_json::Value)>,
        handshake: Duration,
    ) -> Result<ScriptHost, HostError> {
        if !script.is_file() {
            return Err(HostError::NotFound(script.display().to_string()));
        }

        let mut cmd = Command::new(runner);
        cmd.arg(script).stdin(Stdio::piped()).stdout(Stdio::piped()).kill_on_drop(true);
        if let Some(site_packages) = site_packages {
            let mut search_path = site_packages.display().to_string();
            if let Ok(existing) = std::env::var("PYTHONPATH") {
                search_path = format!("{}:{}", search_path, existing);
            }
            cmd.env("PYTHONPATH", search_path);
        }
        let mut child = cmd.spawn().map_err(|e| HostError::Spawn(e.to_string()))?;

        let stdin = child.stdin.take().ok_or_else(|| HostError::Spawn("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| HostError::Spawn("no stdout".into()))?;

        let (hello_tx, mut hello_rx) = mpsc::channel::<Vec<String>>(1);
        let (results_tx, results_rx) = mpsc::channel::<(bool, Option<String>)>(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match relay::decode_frame::<HostFrame>(&line) {
                    Ok(HostFrame::Hello { hello }) => {
                        let _ = hello_tx.try_send(hello.functions);
                    }
                    Ok(HostFrame::Event { event, payload }) => {
                        if event_tx.send((event, payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(HostFrame::Result { ok, traceback }) => {
                        if results_tx.send((ok, traceback)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable script host line");
                    }
                }
            }
        });

        let functions = match tokio::time::timeout(handshake, hello_rx.recv()).await {
            Ok(Some(functions)) => functions,
            Ok(None) => return Err(HostError::ClosedEarly),
            Err(_) => return Err(HostError::HandshakeTimeout(handshake)),
        };

        Ok(ScriptHost { child, stdin, results_rx, functions })
    }

    /// Functions the script advertised in its greeting.
    pub fn functions(&self) -> &[String] {
        &self.functions
    }

    /// Invoke a named function and wait for its result.
    ///
    /// Runs to completion; forced termination is the only cancellation.
    /// A failed invocation returns the script's traceback.
    pub async fn invoke(
        &mut self,
        fn_name: &str,
        input: &ProcedureInput,
    ) -> Result<(), String> {
        let frame = HostInvoke::new(fn_name, input);
        let line = relay::encode_frame(&frame).map_err(|e| e.to_string())?;
        self.stdin
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| format!("script host stdin closed: {}", e))?;
        self.stdin.flush().await.map_err(|e| format!("script host stdin closed: {}", e))?;

        match self.results_rx.recv().await {
            Some((true, _)) => Ok(()),
            Some((false, traceback)) => {
                Err(traceback.unwrap_or_else(|| format!("{} raised with no traceback", fn_name)))
            }
            None => Err("script host exited unexpectedly".to_string()),
        }
    }

    /// Close the script down: end its stdin, give it a moment, then kill.
    pub async fn shutdown(mut self) {
        drop(self.stdin);
        if tokio::time::timeout(Duration::from_secs(1), self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
