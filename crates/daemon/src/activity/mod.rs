// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity service: binds Scheduling Blocks to procedures.
//!
//! An activity request names an SB and one of its activities; the service
//! resolves the referenced script, merges keyword overrides, persists the
//! SB to a file the script can read, and drives prepare/start over the bus
//! with correlated requests.

use crate::env;
use crate::error::ServiceFailure;
use crate::facade::{call_with_id, RequestIds};
use crate::oda::{ArchiveError, SbArchive};
use oet_bus::EventBus;
use oet_core::{
    topics, ActivityCmd, ActivityState, ActivitySummary, Clock, Envelope, ErrorKind,
    ExecutableScript, Payload, PrepareCmd, ScriptArgs, StartCmd, INIT_FN, MAIN_FN,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Key under which the persisted SB path is injected into `main` kwargs.
pub const SB_JSON_KWARG: &str = "sb_json";

/// Activity service tuning.
#[derive(Clone)]
pub struct ActivityConfig {
    /// Wait on the correlated prepare/start responses.
    pub api_timeout: Duration,
    /// Directory the SB documents are persisted into.
    pub sb_dir: PathBuf,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { api_timeout: env::api_timeout(), sb_dir: PathBuf::from("/tmp") }
    }
}

/// Binds SB activities to procedures over the bus.
pub struct ActivityService<C: Clock> {
    bus: EventBus,
    clock: C,
    archive: Arc<dyn SbArchive>,
    requests: RequestIds,
    activities: Arc<Mutex<BTreeMap<u64, ActivitySummary>>>,
    correlations: Arc<Mutex<HashMap<u64, u64>>>,
    next_aid: AtomicU64,
    config: ActivityConfig,
}

impl<C: Clock> ActivityService<C> {
    pub fn new(
        bus: EventBus,
        clock: C,
        archive: Arc<dyn SbArchive>,
        requests: RequestIds,
        config: ActivityConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            clock,
            archive,
            requests,
            activities: Arc::new(Mutex::new(BTreeMap::new())),
            correlations: Arc::new(Mutex::new(HashMap::new())),
            next_aid: AtomicU64::new(1),
            config,
        })
    }

    /// Register the request-topic handlers.
    pub fn attach(self: Arc<Self>) {
        for topic in [topics::REQUEST_ACTIVITY_RUN, topics::REQUEST_ACTIVITY_LIST] {
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
            Payload::ActivityRun(cmd) => (
                topics::ACTIVITY_RUNNING,
                match self.run(cmd).await {
                    Ok(activity) => Payload::ActivityRunning { activity },
                    Err(e) => Payload::ServiceError { kind: e.kind, message: e.message },
                },
            ),
            Payload::ActivityListRequest { aids } => (
                topics::ACTIVITY_POOL_LIST,
                match self.list(aids) {
                    Ok(activities) => Payload::ActivityList { activities },
                    Err(e) => Payload::ServiceError { kind: e.kind, message: e.message },
                },
            ),
            other => {
                warn!(topic = %envelope.topic, "unserviceable request payload: {:?}", other);
                return;
            }
        };
        let mut reply = Envelope::new(response_topic, "activity", payload);
        reply.request_id = envelope.request_id;
        self.bus.publish(&reply);
    }

    /// Run an SB activity: fetch, resolve, persist, prepare, and (unless
    /// `prepare_only`) start `main` with force.
    pub async fn run(&self, cmd: ActivityCmd) -> Result<ActivitySummary, ServiceFailure> {
        let sb = self.archive.fetch(&cmd.sbd_id).await.map_err(|e| match e {
            ArchiveError::NotFound(id) => {
                ServiceFailure::bad_request(format!("no scheduling block with id {}", id))
            }
            other => ServiceFailure::internal(other.to_string()),
        })?;

        let (script, mut script_args) = resolve_activity(&sb, &cmd.activity_name)?;
        merge_overrides(&mut script_args, cmd.script_args_override.as_ref())?;
        let sb_path = self.persist_sb(&cmd.sbd_id, &sb).await?;
        script_args
            .entry(MAIN_FN.to_string())
            .or_default()
            .set_kwarg(SB_JSON_KWARG, serde_json::Value::String(sb_path.display().to_string()));

        let aid = self.next_aid.fetch_add(1, Ordering::Relaxed);
        info!(aid, sbd_id = %cmd.sbd_id, activity = %cmd.activity_name, "activity run");

        // prepare, correlated so procedure events attribute to this activity
        let create_env = script.wants_env();
        let request_id = self.requests.next();
        self.correlations.lock().insert(request_id, aid);
        let response = call_with_id(
            &self.bus,
            request_id,
            "activity",
            topics::REQUEST_PROCEDURE_CREATE,
            topics::PROCEDURE_CREATED,
            Payload::Prepare(PrepareCmd {
                script,
                init_args: script_args.get(INIT_FN).cloned(),
                create_env,
            }),
            self.config.api_timeout,
        )
        .await
        .map_err(as_activity_timeout)?;
        let Payload::ProcedureCreated { procedure } = response else {
            return Err(ServiceFailure::internal("unexpected prepare response shape"));
        };
        let pid = procedure.pid;

        if !cmd.prepare_only {
            let start_id = self.requests.next();
            self.correlations.lock().insert(start_id, aid);
            // force: the worker may not have reached READY at this instant
            call_with_id(
                &self.bus,
                start_id,
                "activity",
                topics::REQUEST_PROCEDURE_START,
                topics::PROCEDURE_STARTED,
                Payload::Start(StartCmd {
                    pid,
                    fn_name: MAIN_FN.to_string(),
                    fn_args: script_args.get(MAIN_FN).cloned().unwrap_or_default(),
                    force: true,
                }),
                self.config.api_timeout,
            )
            .await
            .map_err(as_activity_timeout)?;
        }

        let summary = ActivitySummary {
            aid,
            pid,
            sbd_id: cmd.sbd_id,
            activity_name: cmd.activity_name,
            prepare_only: cmd.prepare_only,
            script_args,
            activity_states: vec![(ActivityState::Requested, self.clock.epoch_ms())],
        };
        self.activities.lock().insert(aid, summary.clone());
        Ok(summary)
    }

    /// Snapshot summaries; an explicit aid that is not retained is an error.
    pub fn list(&self, aids: Option<Vec<u64>>) -> Result<Vec<ActivitySummary>, ServiceFailure> {
        let activities = self.activities.lock();
        match aids {
            None => Ok(activities.values().cloned().collect()),
            Some(aids) => aids
                .into_iter()
                .map(|aid| {
                    activities.get(&aid).cloned().ok_or_else(|| ServiceFailure::unknown_aid(aid))
                })
                .collect(),
        }
    }

    /// Attribute a correlated procedure event to the activity that issued
    /// it; the SSE fan-out annotates streamed records through this. Events
    /// with no matching request id belong to nobody here.
    pub fn aid_for_request(&self, request_id: u64) -> Option<u64> {
        self.correlations.lock().get(&request_id).copied()
    }

    /// Persist the SB under a unique, idempotent name derived from the SB
    /// identity and fetch time.
    async fn persist_sb(
        &self,
        sbd_id: &str,
        sb: &serde_json::Value,
    ) -> Result<PathBuf, ServiceFailure> {
        let version = sb
            .pointer("/metadata/version")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let seed = format!("{}-{}-{}", sbd_id, version, self.clock.epoch_ms());
        let name = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
        let path = self.config.sb_dir.join(format!("{}.json", name));
        let body = serde_json::to_vec(sb)
            .map_err(|e| ServiceFailure::internal(format!("sb serialize: {}", e)))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ServiceFailure::internal(format!("sb persist: {}", e)))?;
        Ok(path)
    }
}

fn as_activity_timeout(failure: ServiceFailure) -> ServiceFailure {
    if failure.kind == ErrorKind::RequestTimeout {
        ServiceFailure::new(ErrorKind::ActivityTimeout, failure.message)
    } else {
        failure
    }
}

/// Locate `activities[name]` in the SB and extract the script reference
/// plus declared function arguments. The SB stays opaque otherwise.
fn resolve_activity(
    sb: &serde_json::Value,
    name: &str,
) -> Result<(ExecutableScript, ScriptArgs), ServiceFailure> {
    let activity = sb
        .pointer(&format!("/activities/{}", name))
        .ok_or_else(|| ServiceFailure::bad_request(format!("no activity named {}", name)))?;
    let script: ExecutableScript = serde_json::from_value(activity.clone()).map_err(|e| {
        ServiceFailure::bad_request(format!("activity {} has no usable script: {}", name, e))
    })?;
    let script_args: ScriptArgs = match activity.get("function_args") {
        Some(args) => serde_json::from_value(args.clone()).map_err(|e| {
            ServiceFailure::bad_request(format!("activity {} function_args: {}", name, e))
        })?,
        None => ScriptArgs::default(),
    };
    Ok((script, script_args))
}

/// Merge keyword overrides on top of the declared arguments. Positional
/// overrides are not supported.
fn merge_overrides(
    script_args: &mut ScriptArgs,
    overrides: Option<&ScriptArgs>,
) -> Result<(), ServiceFailure> {
    let Some(overrides) = overrides else { return Ok(()) };
    for (fn_name, input) in overrides {
        if !input.args.is_empty() {
            return Err(ServiceFailure::bad_request(
                "positional argument override is not supported",
            ));
        }
        let target = script_args.entry(fn_name.clone()).or_default();
        for (key, value) in &input.kwargs {
            target.kwargs.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
