// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process manager: owns the live workers.
//!
//! Assembles each worker's priming sequence (environment adoption, script
//! load, optional init call), tracks current states from lifecycle events,
//! and gates start requests on readiness.

use crate::envmgr::{EnvError, EnvironmentManager};
use crate::error::ServiceFailure;
use crate::protocol::WorkerRequest;
use crate::supervisor::{Supervisor, SupervisorError, WorkerHandle};
use oet_bus::EventBus;
use oet_core::{
    topics, Clock, Envelope, ErrorKind, ExecutableScript, Payload, ProcedureInput, ProcedureState,
    INIT_FN,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PmError {
    #[error("TooManyWorkers: {live} live workers at the configured cap")]
    TooManyWorkers { live: usize },

    #[error("UnknownPid: no live worker for pid {0}")]
    UnknownPid(u64),

    #[error("NotReady: pid {pid} is {state}")]
    NotReady { pid: u64, state: ProcedureState },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl From<PmError> for ServiceFailure {
    fn from(e: PmError) -> Self {
        let kind = match &e {
            PmError::TooManyWorkers { .. } => ErrorKind::TooManyWorkers,
            PmError::UnknownPid(_) => ErrorKind::UnknownPid,
            PmError::NotReady { .. } => ErrorKind::NotReady,
            PmError::Supervisor(SupervisorError::StartupTimeout { .. }) => {
                ErrorKind::WorkerStartupTimeout
            }
            PmError::Supervisor(SupervisorError::Unreachable { .. }) => {
                ErrorKind::WorkerUnreachable
            }
            PmError::Supervisor(_) => ErrorKind::Internal,
            PmError::Env(EnvError::Timeout(_)) => ErrorKind::EnvironmentTimeout,
            PmError::Env(_) => ErrorKind::EnvironmentBuildFailed,
        };
        ServiceFailure::new(kind, e.to_string())
    }
}

/// Owns live workers keyed by pid.
pub struct ProcessManager<C: Clock> {
    bus: EventBus,
    supervisor: Supervisor<C>,
    envmgr: Arc<EnvironmentManager>,
    workers: Arc<Mutex<HashMap<u64, Arc<WorkerHandle>>>>,
    states: Arc<Mutex<HashMap<u64, ProcedureState>>>,
    worker_envs: Arc<Mutex<HashMap<u64, String>>>,
    max_workers: usize,
}

impl<C: Clock> ProcessManager<C> {
    /// Build the manager and attach its statechange subscription.
    pub fn new(
        bus: EventBus,
        supervisor: Supervisor<C>,
        envmgr: Arc<EnvironmentManager>,
        max_workers: usize,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            bus: bus.clone(),
            supervisor,
            envmgr: Arc::clone(&envmgr),
            workers: Arc::new(Mutex::new(HashMap::new())),
            states: Arc::new(Mutex::new(HashMap::new())),
            worker_envs: Arc::new(Mutex::new(HashMap::new())),
            max_workers,
        });

        let states = Arc::clone(&manager.states);
        let workers = Arc::clone(&manager.workers);
        let worker_envs = Arc::clone(&manager.worker_envs);
        bus.subscribe(topics::PROCEDURE_STATECHANGE, move |envelope| {
            if let Payload::StateChange { pid, state, .. } = &envelope.payload {
                states.lock().insert(*pid, *state);
                if state.is_terminal() {
                    workers.lock().remove(pid);
                    if let Some(env_id) = worker_envs.lock().remove(pid) {
                        envmgr.release(&env_id);
                    }
                }
            }
            Ok(())
        });

        manager
    }

    /// Spawn a worker for `pid` primed with environment, load and init.
    ///
    /// Returns the script with its commit pinned to what the clone
    /// resolved. Environment builds run concurrently with worker startup;
    /// the worker observes completion through the build markers.
    pub async fn create(
        &self,
        pid: u64,
        script: ExecutableScript,
        init_args: Option<ProcedureInput>,
    ) -> Result<ExecutableScript, PmError> {
        if self.max_workers > 0 {
            let live = self.workers.lock().len();
            if live >= self.max_workers {
                return Err(PmError::TooManyWorkers { live });
            }
        }

        let mut script = script;
        self.bus.publish(&Envelope::new(
            topics::PROCEDURE_PREPARING,
            "procmgr",
            Payload::Preparing { pid, script: script.clone() },
        ));

        let mut priming = Vec::new();
        let resolved_path = match &script {
            ExecutableScript::Filesystem { path } => PathBuf::from(path),
            ExecutableScript::Git { repo, path, create_env, .. } => {
                let repo = repo.clone();
                let relative = path.clone();
                let wants_env = *create_env;
                let commit = self.envmgr.resolve_commit(&script).await?;
                script.pin_commit(&commit);
                let layout = self.envmgr.layout(&repo, &commit);
                if wants_env {
                    priming.push(WorkerRequest::Env {
                        env_id: layout.env_id.clone(),
                        env_dir: layout.env_dir.clone(),
                        site_packages: layout.site_packages.clone(),
                    });
                    self.worker_envs.lock().insert(pid, layout.env_id.clone());
                    let envmgr = Arc::clone(&self.envmgr);
                    let workers = Arc::clone(&self.workers);
                    tokio::spawn(async move {
                        match envmgr.ensure(&repo, &commit, true).await {
                            Ok(environment) => {
                                // the worker may have died while we built
                                if !workers.lock().contains_key(&pid) {
                                    envmgr.release(&environment.env_id);
                                }
                            }
                            Err(e) => warn!(pid, error = %e, "environment build failed"),
                        }
                    });
                } else {
                    // the clone is the script source; fetch it before spawn
                    self.envmgr.ensure(&repo, &commit, false).await?;
                    self.worker_envs.lock().insert(pid, layout.env_id.clone());
                }
                layout.repo_dir.join(relative)
            }
        };

        priming.push(WorkerRequest::Load { script: script.clone(), resolved_path });
        if let Some(input) = init_args {
            priming.push(WorkerRequest::Run { fn_name: INIT_FN.to_string(), input });
        }

        self.states.lock().insert(pid, ProcedureState::Creating);
        match self.supervisor.spawn(pid, priming).await {
            Ok(handle) => {
                info!(pid, "worker created");
                self.workers.lock().insert(pid, Arc::new(handle));
                Ok(script)
            }
            Err(e) => {
                self.states.lock().remove(&pid);
                if let Some(env_id) = self.worker_envs.lock().remove(&pid) {
                    self.envmgr.release(&env_id);
                }
                Err(e.into())
            }
        }
    }

    /// Enqueue a function run. Without `force` the worker must be READY.
    pub async fn run(
        &self,
        pid: u64,
        fn_name: &str,
        input: ProcedureInput,
        force: bool,
    ) -> Result<(), PmError> {
        let handle =
            self.workers.lock().get(&pid).cloned().ok_or(PmError::UnknownPid(pid))?;
        let state = self.state(pid).unwrap_or(ProcedureState::Unknown);
        if !force && state != ProcedureState::Ready {
            return Err(PmError::NotReady { pid, state });
        }
        handle.send(WorkerRequest::Run { fn_name: fn_name.to_string(), input }).await?;
        Ok(())
    }

    /// Terminate a worker with the supervisor escalation.
    pub async fn stop(&self, pid: u64) -> Result<ProcedureState, PmError> {
        let handle =
            self.workers.lock().get(&pid).cloned().ok_or(PmError::UnknownPid(pid))?;
        let state = self.supervisor.stop(&handle).await?;
        Ok(state)
    }

    pub fn state(&self, pid: u64) -> Option<ProcedureState> {
        self.states.lock().get(&pid).copied()
    }

    /// Snapshot of every tracked pid's current state.
    pub fn states(&self) -> HashMap<u64, ProcedureState> {
        self.states.lock().clone()
    }

    /// Whether a worker process is still owned for this pid.
    pub fn is_live(&self, pid: u64) -> bool {
        self.workers.lock().contains_key(&pid)
    }

    /// Stop every live worker in parallel; used on daemon shutdown.
    pub async fn stop_all(&self) {
        let handles: Vec<Arc<WorkerHandle>> =
            self.workers.lock().values().cloned().collect();
        let stops = handles.iter().map(|handle| self.supervisor.stop(handle));
        for result in futures_util::future::join_all(stops).await {
            if let Err(e) = result {
                warn!(error = %e, "worker stop failed during shutdown");
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
