// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon signal handling.
//!
//! Exactly one installation of the SIGTERM/SIGINT/SIGHUP handlers; any of
//! them trips the shutdown token, which the lifecycle uses to stop all
//! workers in parallel and exit 130.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Watch for termination signals and cancel `shutdown` on the first one.
///
/// Returns the join handle of the watcher task; resolves to the signal name
/// that fired.
pub fn watch_signals(shutdown: CancellationToken) -> tokio::task::JoinHandle<&'static str> {
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return "none",
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return "none",
        };
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(_) => return "none",
        };
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = hup.recv() => "SIGHUP",
            _ = shutdown.cancelled() => "none",
        };
        if name != "none" {
            info!(signal = name, "termination signal received, shutting down");
            shutdown.cancel();
        }
        name
    })
}
