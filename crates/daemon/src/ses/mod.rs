// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script execution service: the engine's public surface.
//!
//! Allocates pids, owns the procedure table and its state timelines,
//! consumes the request topics, and prunes terminal history. The process
//! manager does the spawning; this service does the bookkeeping.

use crate::env;
use crate::error::{classify_stacktrace, ServiceFailure};
use crate::procmgr::{PmError, ProcessManager};
use oet_core::{
    topics, Clock, Envelope, ErrorKind, ExecutableScript, FunctionCall, Payload, PrepareCmd,
    Procedure, ProcedureState, ProcedureSummary, StartCmd, StopCmd, INIT_FN, MAIN_FN,
};
use oet_bus::EventBus;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Service tuning, read from the environment by default.
#[derive(Clone)]
pub struct SesConfig {
    /// Retained terminal procedures.
    pub history_limit: usize,
    /// Script prepared and started when a stop requests the follow-on abort.
    pub abort_script: Option<ExecutableScript>,
    /// Upper bound on how long `prepare` waits for priming to settle.
    pub prepare_wait: Duration,
}

impl Default for SesConfig {
    fn default() -> Self {
        Self {
            history_limit: env::history_limit(),
            abort_script: env::abort_script()
                .map(|path| ExecutableScript::Filesystem { path }),
            prepare_wait: env::env_timeout() + env::startup_timeout(),
        }
    }
}

/// The execution service. One per daemon; owns the pid counter.
pub struct ExecutionService<C: Clock> {
    bus: EventBus,
    clock: C,
    manager: Arc<ProcessManager<C>>,
    procedures: Arc<Mutex<BTreeMap<u64, Procedure>>>,
    next_pid: AtomicU64,
    changed: Arc<Notify>,
    config: SesConfig,
}

impl<C: Clock> ExecutionService<C> {
    /// Build the service and attach its history subscription.
    pub fn new(
        bus: EventBus,
        clock: C,
        manager: Arc<ProcessManager<C>>,
        config: SesConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            bus: bus.clone(),
            clock,
            manager,
            procedures: Arc::new(Mutex::new(BTreeMap::new())),
            next_pid: AtomicU64::new(1),
            changed: Arc::new(Notify::new()),
            config,
        });

        let procedures = Arc::clone(&service.procedures);
        let changed = Arc::clone(&service.changed);
        let history_limit = service.config.history_limit;
        bus.subscribe(topics::PROCEDURE_STATECHANGE, move |envelope| {
            if let Payload::StateChange { pid, state, at_ms, stacktrace } = &envelope.payload {
                let mut procedures = procedures.lock();
                if let Some(procedure) = procedures.get_mut(pid) {
                    match procedure.history.record(*state, *at_ms, stacktrace.clone()) {
                        Ok(()) => {
                            if state.is_terminal() {
                                prune_terminal(&mut procedures, history_limit);
                            }
                        }
                        Err(e) => {
                            warn!(pid, error = %e, "state event rejected");
                        }
                    }
                }
                changed.notify_waiters();
            }
            Ok(())
        });

        service
    }

    /// Register the request-topic handlers. Each request is serviced on its
    /// own task so slow prepares never block the bus.
    pub fn attach(self: Arc<Self>) {
        for topic in [
            topics::REQUEST_PROCEDURE_CREATE,
            topics::REQUEST_PROCEDURE_START,
            topics::REQUEST_PROCEDURE_STOP,
            topics::REQUEST_PROCEDURE_LIST,
        ] {
            let service = Arc::clone(&self);
            self.bus.subscribe(topic, move |envelope| {
                let service = Arc::clone(&service);
                let envelope = envelope.clone();
                tokio::spawn(async move { service.dispatch(envelope).await });
                Ok(())
            });
        }
    }

    async fn dispatch(self: Arc<Self>, envelope: Envelope) {
        let (response_topic, payload) = match envelope.payload {
            Payload::Prepare(cmd) => (
                topics::PROCEDURE_CREATED,
                match self.prepare(cmd).await {
                    Ok(procedure) => Payload::ProcedureCreated { procedure },
                    Err(e) => service_error(e),
                },
            ),
            Payload::Start(cmd) => (
                topics::PROCEDURE_STARTED,
                match self.start(cmd).await {
                    Ok(procedure) => Payload::ProcedureStarted { procedure },
                    Err(e) => service_error(e),
                },
            ),
            Payload::Stop(cmd) => (
                topics::PROCEDURE_STOPPED,
                match self.stop(cmd).await {
                    Ok(procedures) => Payload::ProcedureStopped { procedures },
                    Err(e) => service_error(e),
                },
            ),
            Payload::ProcedureListRequest { pids } => (
                topics::PROCEDURE_POOL_LIST,
                match self.summarise(pids) {
                    Ok(procedures) => Payload::ProcedureList { procedures },
                    Err(e) => service_error(e),
                },
            ),
            other => {
                warn!(topic = %envelope.topic, "unserviceable request payload: {:?}", other);
                return;
            }
        };
        let mut reply = Envelope::new(response_topic, "ses", payload);
        reply.request_id = envelope.request_id;
        self.bus.publish(&reply);
    }

    /// Create a procedure: allocate a pid, spawn its worker, and wait for
    /// the priming sequence to settle.
    ///
    /// A script exception during init leaves the procedure FAILED but the
    /// prepare itself succeeds; only infrastructure failures error out.
    pub async fn prepare(&self, cmd: PrepareCmd) -> Result<ProcedureSummary, ServiceFailure> {
        let script = self.validate_script(cmd.script)?;
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let init_expected = cmd.init_args.is_some();
        let now = self.clock.epoch_ms();
        {
            let mut procedures = self.procedures.lock();
            let mut procedure = Procedure::pending(pid, script.clone());
            if let Some(input) = &cmd.init_args {
                procedure.calls.push(FunctionCall {
                    fn_name: INIT_FN.to_string(),
                    input: input.clone(),
                    at_ms: now,
                });
            }
            procedures.insert(pid, procedure);
        }
        info!(pid, %script, "procedure prepare");
        // CREATING is a recorded transition like the rest, so stream
        // subscribers see the timeline from its first entry
        self.bus.publish(&Envelope::statechange("ses", pid, ProcedureState::Creating, now, None));

        match self.manager.create(pid, script, cmd.init_args).await {
            Ok(pinned) => {
                if let Some(procedure) = self.procedures.lock().get_mut(&pid) {
                    procedure.script = pinned;
                }
            }
            Err(e) => {
                let failure = ServiceFailure::from(e);
                // record the failure as the terminal timeline entry
                self.bus.publish(&Envelope::statechange(
                    "ses",
                    pid,
                    ProcedureState::Failed,
                    self.clock.epoch_ms(),
                    Some(failure.to_string()),
                ));
                return Err(failure);
            }
        }

        self.wait_settled(pid, init_expected).await;
        let summary = self.summary(pid).ok_or_else(|| ServiceFailure::unknown_pid(pid))?;
        if summary.state == ProcedureState::Failed {
            if let Some(kind) =
                summary.history.stacktrace.as_deref().and_then(classify_stacktrace)
            {
                let message =
                    summary.history.stacktrace.clone().unwrap_or_else(|| kind.to_string());
                return Err(ServiceFailure::new(kind, message));
            }
        }
        Ok(summary)
    }

    /// Start a function on a prepared procedure.
    pub async fn start(&self, cmd: StartCmd) -> Result<ProcedureSummary, ServiceFailure> {
        if !self.procedures.lock().contains_key(&cmd.pid) {
            return Err(ServiceFailure::unknown_pid(cmd.pid));
        }
        info!(pid = cmd.pid, fn_name = %cmd.fn_name, force = cmd.force, "procedure start");
        match self.manager.run(cmd.pid, &cmd.fn_name, cmd.fn_args.clone(), cmd.force).await {
            Ok(()) => {}
            // retained but no longer live: report readiness, not absence
            Err(PmError::UnknownPid(pid)) => {
                let state = self.summary(pid).map(|s| s.state).unwrap_or(ProcedureState::Unknown);
                return Err(ServiceFailure::new(
                    ErrorKind::NotReady,
                    format!("pid {} is {}", pid, state),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        let now = self.clock.epoch_ms();
        if let Some(procedure) = self.procedures.lock().get_mut(&cmd.pid) {
            procedure.calls.push(FunctionCall {
                fn_name: cmd.fn_name.clone(),
                input: cmd.fn_args,
                at_ms: now,
            });
        }
        self.summary(cmd.pid).ok_or_else(|| ServiceFailure::unknown_pid(cmd.pid))
    }

    /// Stop a procedure; optionally chase it with the configured abort
    /// script on the same subarray.
    pub async fn stop(&self, cmd: StopCmd) -> Result<Vec<ProcedureSummary>, ServiceFailure> {
        let init_input = {
            let procedures = self.procedures.lock();
            let procedure =
                procedures.get(&cmd.pid).ok_or_else(|| ServiceFailure::unknown_pid(cmd.pid))?;
            procedure.calls.iter().find(|c| c.fn_name == INIT_FN).map(|c| c.input.clone())
        };
        info!(pid = cmd.pid, run_abort = cmd.run_abort, "procedure stop");

        if self.manager.is_live(cmd.pid) {
            match self.manager.stop(cmd.pid).await {
                Ok(_) | Err(PmError::UnknownPid(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let mut summaries =
            vec![self.summary(cmd.pid).ok_or_else(|| ServiceFailure::unknown_pid(cmd.pid))?];

        if cmd.run_abort {
            let abort = self.config.abort_script.clone().ok_or_else(|| {
                ServiceFailure::bad_request("no abort script configured")
            })?;
            // carry the subarray binding over to the abort procedure
            let init_args = init_input.map(|mut input| {
                input.args.clear();
                input.kwargs.retain(|key, _| key == "subarray_id");
                input
            });
            let prepared = self
                .prepare(PrepareCmd { script: abort, init_args, create_env: false })
                .await?;
            let started = self
                .start(StartCmd {
                    pid: prepared.pid,
                    fn_name: MAIN_FN.to_string(),
                    fn_args: Default::default(),
                    force: true,
                })
                .await?;
            summaries.push(started);
        }
        Ok(summaries)
    }

    /// Snapshot summaries; an explicit pid that is not retained is an error.
    pub fn summarise(&self, pids: Option<Vec<u64>>) -> Result<Vec<ProcedureSummary>, ServiceFailure> {
        let procedures = self.procedures.lock();
        match pids {
            None => Ok(procedures.values().map(Procedure::summary).collect()),
            Some(pids) => pids
                .into_iter()
                .map(|pid| {
                    procedures
                        .get(&pid)
                        .map(Procedure::summary)
                        .ok_or_else(|| ServiceFailure::unknown_pid(pid))
                })
                .collect(),
        }
    }

    fn summary(&self, pid: u64) -> Option<ProcedureSummary> {
        self.procedures.lock().get(&pid).map(Procedure::summary)
    }

    /// Resolve and pre-validate a filesystem script; git scripts resolve in
    /// the process manager.
    fn validate_script(&self, script: ExecutableScript) -> Result<ExecutableScript, ServiceFailure> {
        match script {
            ExecutableScript::Filesystem { path } => {
                let resolved = if Path::new(&path).is_absolute() {
                    path
                } else {
                    env::scripts_location().join(&path).display().to_string()
                };
                if !Path::new(&resolved).is_file() {
                    return Err(ServiceFailure::new(
                        ErrorKind::ScriptNotFound,
                        format!("ScriptNotFound: {}", resolved),
                    ));
                }
                Ok(ExecutableScript::Filesystem { path: resolved })
            }
            git => Ok(git),
        }
    }

    /// Wait until the priming sequence reached a settle point: READY,
    /// a terminal state, or IDLE-after-load when no init call was primed.
    async fn wait_settled(&self, pid: u64, init_expected: bool) {
        let deadline = tokio::time::Instant::now() + self.config.prepare_wait;
        loop {
            // register before inspecting so no wakeup is lost in between
            let notified = self.changed.notified();
            {
                let procedures = self.procedures.lock();
                let Some(procedure) = procedures.get(&pid) else { return };
                if prepare_settled(procedure, init_expected) {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pid, "prepare wait expired before settle");
                return;
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }
}

fn service_error(failure: ServiceFailure) -> Payload {
    Payload::ServiceError { kind: failure.kind, message: failure.message }
}

fn prepare_settled(procedure: &Procedure, init_expected: bool) -> bool {
    let state = procedure.state();
    if state.is_terminal() || state == ProcedureState::Ready {
        return true;
    }
    if !init_expected && state == ProcedureState::Idle {
        let states = procedure.history.states();
        return states
            .windows(2)
            .any(|pair| pair == [ProcedureState::Loading, ProcedureState::Idle]);
    }
    false
}

/// Evict the oldest terminal procedures beyond the retention limit. Live
/// procedures are never evicted.
fn prune_terminal(procedures: &mut BTreeMap<u64, Procedure>, limit: usize) {
    loop {
        let terminal: Vec<u64> =
            procedures.values().filter(|p| p.is_terminal()).map(|p| p.pid).collect();
        if terminal.len() <= limit {
            return;
        }
        // BTreeMap order makes the first terminal pid the oldest
        if let Some(oldest) = terminal.first() {
            info!(pid = oldest, "terminal procedure pruned");
            procedures.remove(oldest);
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
