// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process supervision.
//!
//! Spawns `oetd worker` children wired to the bus over stdio, enforces the
//! startup contract, and terminates stragglers with an escalation from a
//! soft-stop frame through SIGINT to SIGKILL on the worker's process group.

pub mod signal;

use crate::env;
use crate::protocol::WorkerRequest;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use oet_bus::relay::{self, RelayTx};
use oet_bus::EventBus;
use oet_core::{Clock, Envelope, Payload, ProcedureState};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("WorkerStartupTimeout: worker {pid} sent nothing within {timeout:?}")]
    StartupTimeout { pid: u64, timeout: Duration },

    #[error("WorkerUnreachable: worker {pid} survived SIGKILL")]
    Unreachable { pid: u64 },

    #[error("worker {pid} work queue is closed")]
    QueueClosed { pid: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supervisor timeouts, read from the environment by default.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub startup: Duration,
    pub soft_stop: Duration,
    pub hard_stop: Duration,
    pub relay_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup: env::startup_timeout(),
            soft_stop: env::soft_stop_timeout(),
            hard_stop: env::hard_stop_timeout(),
            relay_timeout: env::relay_timeout(),
        }
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code; None when the process was killed by a signal.
    pub code: Option<i32>,
}

/// Handle on one live worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pid: u64,
    os_pid: i32,
    work_tx: mpsc::Sender<WorkerRequest>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    last_state: Arc<Mutex<Option<ProcedureState>>>,
    stopping: Arc<AtomicBool>,
    classified: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Enqueue a frame on the worker's work queue.
    pub async fn send(&self, request: WorkerRequest) -> Result<(), SupervisorError> {
        self.work_tx
            .send(request)
            .await
            .map_err(|_| SupervisorError::QueueClosed { pid: self.pid })
    }

    /// Last state this worker published, as observed by the relay.
    pub fn last_state(&self) -> Option<ProcedureState> {
        *self.last_state.lock()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait until the worker has exited and been classified.
    async fn wait_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        let result = tokio::time::timeout(timeout, rx.wait_for(|exit| exit.is_some())).await;
        result.is_ok()
    }
}

/// Builds the command a worker process is spawned from.
pub type WorkerLauncher = Arc<dyn Fn(u64) -> std::io::Result<Command> + Send + Sync>;

fn default_launcher() -> WorkerLauncher {
    Arc::new(|pid| {
        let mut cmd = Command::new(std::env::current_exe()?);
        cmd.arg("worker").arg("--pid").arg(pid.to_string());
        Ok(cmd)
    })
}

/// Spawns and terminates worker processes for the process manager.
pub struct Supervisor<C: Clock> {
    bus: EventBus,
    clock: C,
    config: SupervisorConfig,
    launcher: WorkerLauncher,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(bus: EventBus, clock: C, config: SupervisorConfig) -> Self {
        Self { bus, clock, config, launcher: default_launcher() }
    }

    /// Substitute the worker command, e.g. a packaged binary path or a
    /// protocol-speaking stand-in under test.
    pub fn with_launcher(mut self, launcher: WorkerLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Spawn the worker entry point for `pid`.
    pub async fn spawn(
        &self,
        pid: u64,
        priming: Vec<WorkerRequest>,
    ) -> Result<WorkerHandle, SupervisorError> {
        let cmd = (self.launcher)(pid)?;
        self.spawn_with(cmd, pid, priming).await
    }

    /// Spawn a specific command as the worker process. The command must
    /// speak the worker stdio protocol; tests substitute small shell
    /// scripts here.
    pub async fn spawn_with(
        &self,
        mut cmd: Command,
        pid: u64,
        priming: Vec<WorkerRequest>,
    ) -> Result<WorkerHandle, SupervisorError> {
        let worker_src = format!("worker-{}", pid);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).process_group(0).kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let os_pid = child.id().map(|id| id as i32).unwrap_or_default();

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdout unavailable")
        })?;

        // Work queue: frames serialised onto the child's stdin.
        let (work_tx, mut work_rx) = mpsc::channel::<WorkerRequest>(64);
        let writer_pid = pid;
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = work_rx.recv().await {
                let line = match relay::encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(pid = writer_pid, error = %e, "work frame encode failed");
                        continue;
                    }
                };
                if stdin.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Event queue: envelopes from the child's stdout onto our bus.
        let (started_tx, mut started_rx) = watch::channel(false);
        let last_state: Arc<Mutex<Option<ProcedureState>>> = Arc::new(Mutex::new(None));
        let reader_bus = self.bus.clone();
        let reader_state = Arc::clone(&last_state);
        let reader_pid = pid;
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let envelope: Envelope = match relay::decode_frame(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(pid = reader_pid, error = %e, "undecodable worker frame");
                        continue;
                    }
                };
                let _ = started_tx.send(true);
                if let Payload::StateChange { pid: event_pid, state, .. } = &envelope.payload {
                    if *event_pid == reader_pid {
                        *reader_state.lock() = Some(*state);
                    }
                }
                reader_bus.publish(&envelope);
            }
        });

        let stopping = Arc::new(AtomicBool::new(false));
        let classified = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = watch::channel(None);

        // Startup contract: something must arrive before the deadline.
        let started = matches!(
            tokio::time::timeout(self.config.startup, started_rx.wait_for(|s| *s)).await,
            Ok(Ok(_))
        );
        if !started {
            classified.store(true, Ordering::SeqCst);
            let _ = killpg(Pid::from_raw(os_pid), Signal::SIGKILL);
            let _ = child.wait().await;
            reader.abort();
            return Err(SupervisorError::StartupTimeout { pid, timeout: self.config.startup });
        }
        debug!(pid, os_pid, "worker started");

        for frame in priming {
            let _ = work_tx.send(frame).await;
        }

        // Bridge bus traffic down to this worker, suppressing its own echo.
        let (relay_tx, mut relay_rx) = mpsc::channel::<Envelope>(256);
        let bridge_sub = oet_bus::relay::bridge_to_peer(
            &self.bus,
            &worker_src,
            RelayTx::new(relay_tx, self.config.relay_timeout),
        );
        let pump_tx = work_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = relay_rx.recv().await {
                if pump_tx.send(WorkerRequest::PubSub { envelope }).await.is_err() {
                    break;
                }
            }
        });

        // Reap, drain, classify.
        let wait_bus = self.bus.clone();
        let wait_clock = self.clock.clone();
        let wait_state = Arc::clone(&last_state);
        let wait_stopping = Arc::clone(&stopping);
        let wait_classified = Arc::clone(&classified);
        tokio::spawn(async move {
            let status = child.wait().await;
            // the last frames may still be in flight; drain before judging
            let _ = reader.await;
            wait_bus.unsubscribe(bridge_sub);
            let code = status.ok().and_then(|s| s.code());
            let last = *wait_state.lock();
            if !wait_classified.swap(true, Ordering::SeqCst) {
                let state = match (last, wait_stopping.load(Ordering::SeqCst), code) {
                    (Some(s), _, _) if s.is_terminal() => None,
                    (_, true, _) => Some(ProcedureState::Stopped),
                    (_, false, Some(0)) => Some(ProcedureState::Complete),
                    _ => Some(ProcedureState::Unknown),
                };
                if let Some(state) = state {
                    info!(pid, code = ?code, %state, "worker exit classified");
                    *wait_state.lock() = Some(state);
                    wait_bus.publish(&Envelope::statechange(
                        "supervisor",
                        pid,
                        state,
                        wait_clock.epoch_ms(),
                        None,
                    ));
                }
            }
            let _ = exit_tx.send(Some(WorkerExit { code }));
        });

        Ok(WorkerHandle { pid, os_pid, work_tx, exit_rx, last_state, stopping, classified })
    }

    /// Terminate a worker with the stop escalation.
    ///
    /// Returns the final state. A process that survives SIGKILL is marked
    /// UNKNOWN and reported unreachable.
    pub async fn stop(&self, handle: &WorkerHandle) -> Result<ProcedureState, SupervisorError> {
        handle.stopping.store(true, Ordering::SeqCst);

        // 1. soft stop over the work queue
        let _ = handle.work_tx.send(WorkerRequest::Shutdown).await;
        if handle.wait_exit(self.config.soft_stop).await {
            return Ok(handle.last_state().unwrap_or(ProcedureState::Stopped));
        }

        // 2. interrupt the process group
        info!(pid = handle.pid, "soft stop expired, sending SIGINT");
        let _ = killpg(Pid::from_raw(handle.os_pid), Signal::SIGINT);
        if handle.wait_exit(self.config.hard_stop).await {
            return Ok(handle.last_state().unwrap_or(ProcedureState::Stopped));
        }

        // 3. kill
        warn!(pid = handle.pid, "hard stop expired, sending SIGKILL");
        let _ = killpg(Pid::from_raw(handle.os_pid), Signal::SIGKILL);
        if handle.wait_exit(self.config.hard_stop).await {
            return Ok(handle.last_state().unwrap_or(ProcedureState::Stopped));
        }

        handle.classified.store(true, Ordering::SeqCst);
        *handle.last_state.lock() = Some(ProcedureState::Unknown);
        self.bus.publish(&Envelope::statechange(
            "supervisor",
            handle.pid,
            ProcedureState::Unknown,
            self.clock.epoch_ms(),
            None,
        ));
        Err(SupervisorError::Unreachable { pid: handle.pid })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
