// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process: the child-side state machine.
//!
//! Runs inside `oetd worker`. Consumes command frames from stdin, drives
//! the script host, and publishes every state transition on the local bus;
//! the outbound bridge mirrors local events to the supervisor over stdout.

pub mod host;

use crate::env;
use crate::envmgr::{CREATED_MARKER, FAILED_MARKER};
use crate::protocol::WorkerRequest;
use host::{HostError, ScriptHost};
use oet_bus::relay::{self, RelayTx};
use oet_bus::EventBus;
use oet_core::{Clock, Envelope, Payload, ProcedureInput, ProcedureState, SystemClock, MAIN_FN};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Interval at which the worker polls the environment build markers.
const MARKER_POLL: Duration = Duration::from_millis(250);

/// The worker's side of the engine state machine.
pub(crate) struct WorkerLoop<C: Clock> {
    pid: u64,
    source: String,
    bus: EventBus,
    clock: C,
    runner: String,
    state: ProcedureState,
    script_host: Option<ScriptHost>,
    site_packages: Option<PathBuf>,
    event_tx: mpsc::Sender<(String, serde_json::Value)>,
    env_wait: Duration,
    handshake: Duration,
}

impl<C: Clock> WorkerLoop<C> {
    pub(crate) fn new(
        pid: u64,
        bus: EventBus,
        clock: C,
        runner: String,
        event_tx: mpsc::Sender<(String, serde_json::Value)>,
    ) -> Self {
        Self {
            pid,
            source: format!("worker-{}", pid),
            bus,
            clock,
            runner,
            state: ProcedureState::Creating,
            script_host: None,
            site_packages: None,
            event_tx,
            env_wait: env::env_timeout(),
            handshake: env::startup_timeout(),
        }
    }

    #[cfg(test)]
    fn with_waits(mut self, env_wait: Duration, handshake: Duration) -> Self {
        self.env_wait = env_wait;
        self.handshake = handshake;
        self
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    fn publish_state(&mut self, state: ProcedureState, stacktrace: Option<String>) {
        self.state = state;
        self.bus.publish(&Envelope::statechange(
            &self.source,
            self.pid,
            state,
            self.clock.epoch_ms(),
            stacktrace,
        ));
    }

    /// Transition to FAILED with a classification-prefixed stacktrace and
    /// yield the worker's exit code.
    fn fail(&mut self, stacktrace: String) -> i32 {
        warn!(pid = self.pid, %stacktrace, "worker failed");
        self.publish_state(ProcedureState::Failed, Some(stacktrace));
        1
    }

    fn reject(&mut self, frame_kind: &str) -> i32 {
        self.fail(format!("InvalidWorkerCommand: {} in state {}", frame_kind, self.state))
    }

    /// Announce startup: CREATING -> IDLE.
    pub(crate) fn startup(&mut self) {
        self.publish_state(ProcedureState::Idle, None);
    }

    /// Service one work frame. `Some(code)` ends the worker.
    pub(crate) async fn handle(&mut self, frame: WorkerRequest) -> Option<i32> {
        match frame {
            WorkerRequest::Env { env_dir, site_packages, env_id } => {
                if self.state != ProcedureState::Idle {
                    return Some(self.reject("ENV"));
                }
                debug!(pid = self.pid, %env_id, "adopting environment");
                self.publish_state(ProcedureState::PrepEnv, None);
                match self.await_environment(&env_dir).await {
                    Ok(()) => {
                        self.site_packages = Some(site_packages);
                        self.publish_state(ProcedureState::Idle, None);
                        None
                    }
                    Err(stacktrace) => Some(self.fail(stacktrace)),
                }
            }
            WorkerRequest::Load { script, resolved_path } => {
                if self.state != ProcedureState::Idle {
                    return Some(self.reject("LOAD"));
                }
                info!(pid = self.pid, %script, "loading script");
                self.publish_state(ProcedureState::Loading, None);
                let spawned = ScriptHost::spawn(
                    &self.runner,
                    &resolved_path,
                    self.site_packages.as_deref(),
                    self.event_tx.clone(),
                    self.handshake,
                )
                .await;
                match spawned {
                    Ok(host) => {
                        self.script_host = Some(host);
                        self.publish_state(ProcedureState::Idle, None);
                        None
                    }
                    Err(e @ HostError::NotFound(_)) => Some(self.fail(e.to_string())),
                    Err(e) => Some(self.fail(format!("ScriptNotFound: {}", e))),
                }
            }
            WorkerRequest::Run { fn_name, input } => self.run_function(&fn_name, &input).await,
            WorkerRequest::PubSub { envelope } => {
                self.bus.publish(&envelope);
                None
            }
            WorkerRequest::Shutdown => {
                if let Some(host) = self.script_host.take() {
                    host.shutdown().await;
                }
                Some(0)
            }
        }
    }

    async fn run_function(&mut self, fn_name: &str, input: &ProcedureInput) -> Option<i32> {
        if !matches!(self.state, ProcedureState::Idle | ProcedureState::Ready) {
            return Some(self.reject("RUN"));
        }
        if self.script_host.is_none() {
            return Some(self.reject("RUN"));
        }
        info!(pid = self.pid, fn_name, "running script function");
        self.publish_state(ProcedureState::Running, None);
        let host = self.script_host.as_mut().expect("checked above");
        match host.invoke(fn_name, input).await {
            Ok(()) => {
                self.publish_state(ProcedureState::Ready, None);
                if fn_name == MAIN_FN {
                    // the script's entry point ran to completion; a clean
                    // exit lets the supervisor classify COMPLETE
                    if let Some(host) = self.script_host.take() {
                        host.shutdown().await;
                    }
                    return Some(0);
                }
                None
            }
            Err(traceback) => Some(self.fail(traceback)),
        }
    }

    /// Block until the parent-side environment build concludes.
    async fn await_environment(&self, env_dir: &Path) -> Result<(), String> {
        let deadline = tokio::time::Instant::now() + self.env_wait;
        loop {
            if env_dir.join(CREATED_MARKER).is_file() {
                return Ok(());
            }
            if env_dir.join(FAILED_MARKER).is_file() {
                let output = tokio::fs::read_to_string(env_dir.join(FAILED_MARKER))
                    .await
                    .unwrap_or_default();
                return Err(format!("EnvironmentBuildFailed: {}", output));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "EnvironmentTimeout: environment not ready after {:?}",
                    self.env_wait
                ));
            }
            tokio::time::sleep(MARKER_POLL).await;
        }
    }
}

/// Worker process entry point: wire the local bus to stdio and loop over
/// work frames. Returns the process exit code.
pub async fn run(pid: u64) -> i32 {
    let bus = EventBus::new();
    let clock = SystemClock;
    let (event_tx, mut event_rx) = mpsc::channel::<(String, serde_json::Value)>(64);
    let mut worker = WorkerLoop::new(pid, bus.clone(), clock, env::script_runner(), event_tx);

    // outbound bridge: local events -> stdout
    let (relay_tx, mut relay_rx) = mpsc::channel::<Envelope>(256);
    let bridge_sub =
        relay::bridge_outbound(&bus, worker.source(), RelayTx::new(relay_tx, env::relay_timeout()));
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(envelope) = relay_rx.recv().await {
            let line = match relay::encode_frame(&envelope) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "event frame encode failed");
                    continue;
                }
            };
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    // user events from the script host -> local bus (the bridge mirrors
    // them up because they carry this worker's msg_src)
    let event_bus = bus.clone();
    let event_src = worker.source().to_string();
    tokio::spawn(async move {
        while let Some((topic, value)) = event_rx.recv().await {
            event_bus.publish(&Envelope::new(&topic, &event_src, Payload::User { value }));
        }
    });

    worker.startup();

    let mut code = 0;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let frame: WorkerRequest = match relay::decode_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "undecodable work frame");
                continue;
            }
        };
        if let Some(exit) = worker.handle(frame).await {
            code = exit;
            break;
        }
    }

    // let the bridge drain before the process ends
    bus.unsubscribe(bridge_sub);
    let _ = writer.await;
    code
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
