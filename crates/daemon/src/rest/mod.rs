// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST surface over the bus.
//!
//! Handlers never touch the services directly: every request becomes a
//! correlated bus request, and failures carried back as `ServiceError`
//! payloads map onto HTTP statuses here.

pub mod sse;

use crate::error::ServiceFailure;
use crate::facade::{call_and_respond, RequestIds};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use oet_bus::EventBus;
use oet_core::{
    topics, ActivityCmd, ActivitySummary, ErrorKind, ExecutableScript, Payload, PrepareCmd,
    ProcedureState, ProcedureSummary, ScriptArgs, StartCmd, StopCmd, INIT_FN, MAIN_FN,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Shared handler context.
pub struct RestCtx {
    pub bus: EventBus,
    pub requests: RequestIds,
    pub api_timeout: Duration,
    pub sse: sse::SseHub,
}

/// Build the REST router.
pub fn router(ctx: Arc<RestCtx>) -> Router {
    Router::new()
        .route("/procedures", get(list_procedures).post(create_procedure))
        .route("/procedures/:pid", get(get_procedure).put(update_procedure))
        .route("/activities", get(list_activities).post(create_activity))
        .route("/activities/:aid", get(get_activity))
        .route("/stream", get(sse::stream))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx)
}

/// An engine failure rendered as an HTTP response.
#[derive(Debug)]
pub struct RestError {
    kind: ErrorKind,
    message: String,
}

impl From<ServiceFailure> for RestError {
    fn from(e: ServiceFailure) -> Self {
        Self { kind: e.kind, message: e.message }
    }
}

impl RestError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::BadRequest, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::ScriptNotFound
            | ErrorKind::InvalidWorkerCommand
            | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownPid | ErrorKind::UnknownAid => StatusCode::NOT_FOUND,
            ErrorKind::NotReady => StatusCode::CONFLICT,
            ErrorKind::TooManyWorkers => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::EnvironmentTimeout
            | ErrorKind::WorkerStartupTimeout
            | ErrorKind::RequestTimeout
            | ErrorKind::ActivityTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::EnvironmentBuildFailed
            | ErrorKind::WorkerUnreachable
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Public error type name; unknown resources share one name.
    fn type_name(&self) -> String {
        match self.kind {
            ErrorKind::UnknownPid | ErrorKind::UnknownAid => "ResourceNotFound".to_string(),
            kind => kind.to_string(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("")),
            "type": self.type_name(),
            "message": self.message,
        });
        (status, Json(body)).into_response()
    }
}

async fn call(ctx: &RestCtx, request: &str, response: &str, payload: Payload) -> Result<Payload, RestError> {
    Ok(call_and_respond(&ctx.bus, &ctx.requests, "rest", request, response, payload, ctx.api_timeout)
        .await?)
}

async fn fetch_procedures(
    ctx: &RestCtx,
    pids: Option<Vec<u64>>,
) -> Result<Vec<ProcedureSummary>, RestError> {
    match call(
        ctx,
        topics::REQUEST_PROCEDURE_LIST,
        topics::PROCEDURE_POOL_LIST,
        Payload::ProcedureListRequest { pids },
    )
    .await?
    {
        Payload::ProcedureList { procedures } => Ok(procedures),
        other => Err(unexpected(other)),
    }
}

fn unexpected(payload: Payload) -> RestError {
    RestError {
        kind: ErrorKind::Internal,
        message: format!("unexpected response payload: {:?}", payload),
    }
}

async fn list_procedures(
    State(ctx): State<Arc<RestCtx>>,
) -> Result<Json<Vec<ProcedureSummary>>, RestError> {
    Ok(Json(fetch_procedures(&ctx, None).await?))
}

async fn get_procedure(
    State(ctx): State<Arc<RestCtx>>,
    Path(pid): Path<u64>,
) -> Result<Json<ProcedureSummary>, RestError> {
    let mut procedures = fetch_procedures(&ctx, Some(vec![pid])).await?;
    procedures.pop().ok_or_else(|| RestError {
        kind: ErrorKind::UnknownPid,
        message: format!("no retained procedure with pid {}", pid),
    })
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct CreateProcedureBody {
    script: ExecutableScript,
    #[serde(default)]
    script_args: ScriptArgs,
}

async fn create_procedure(
    State(ctx): State<Arc<RestCtx>>,
    Json(body): Json<CreateProcedureBody>,
) -> Result<(StatusCode, Json<ProcedureSummary>), RestError> {
    let create_env = body.script.wants_env();
    let cmd = PrepareCmd {
        init_args: body.script_args.get(INIT_FN).cloned(),
        script: body.script,
        create_env,
    };
    match call(
        &ctx,
        topics::REQUEST_PROCEDURE_CREATE,
        topics::PROCEDURE_CREATED,
        Payload::Prepare(cmd),
    )
    .await?
    {
        Payload::ProcedureCreated { procedure } => Ok((StatusCode::CREATED, Json(procedure))),
        other => Err(unexpected(other)),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateProcedureBody {
    state: ProcedureState,
    #[serde(default)]
    script_args: ScriptArgs,
    #[serde(default)]
    abort: bool,
}

async fn update_procedure(
    State(ctx): State<Arc<RestCtx>>,
    Path(pid): Path<u64>,
    Json(body): Json<UpdateProcedureBody>,
) -> Result<Json<serde_json::Value>, RestError> {
    match body.state {
        ProcedureState::Running => {
            let cmd = StartCmd {
                pid,
                fn_name: MAIN_FN.to_string(),
                fn_args: body.script_args.get(MAIN_FN).cloned().unwrap_or_default(),
                force: false,
            };
            match call(
                &ctx,
                topics::REQUEST_PROCEDURE_START,
                topics::PROCEDURE_STARTED,
                Payload::Start(cmd),
            )
            .await?
            {
                Payload::ProcedureStarted { procedure } => {
                    Ok(Json(serde_json::to_value(procedure).unwrap_or_default()))
                }
                other => Err(unexpected(other)),
            }
        }
        ProcedureState::Stopped => {
            let cmd = StopCmd { pid, run_abort: body.abort };
            match call(
                &ctx,
                topics::REQUEST_PROCEDURE_STOP,
                topics::PROCEDURE_STOPPED,
                Payload::Stop(cmd),
            )
            .await?
            {
                Payload::ProcedureStopped { procedures } => {
                    Ok(Json(serde_json::to_value(procedures).unwrap_or_default()))
                }
                other => Err(unexpected(other)),
            }
        }
        other => Err(RestError::bad_request(format!(
            "state must be RUNNING or STOPPED, not {}",
            other
        ))),
    }
}

async fn fetch_activities(
    ctx: &RestCtx,
    aids: Option<Vec<u64>>,
) -> Result<Vec<ActivitySummary>, RestError> {
    match call(
        ctx,
        topics::REQUEST_ACTIVITY_LIST,
        topics::ACTIVITY_POOL_LIST,
        Payload::ActivityListRequest { aids },
    )
    .await?
    {
        Payload::ActivityList { activities } => Ok(activities),
        other => Err(unexpected(other)),
    }
}

async fn list_activities(
    State(ctx): State<Arc<RestCtx>>,
) -> Result<Json<Vec<ActivitySummary>>, RestError> {
    Ok(Json(fetch_activities(&ctx, None).await?))
}

async fn get_activity(
    State(ctx): State<Arc<RestCtx>>,
    Path(aid): Path<u64>,
) -> Result<Json<ActivitySummary>, RestError> {
    let mut activities = fetch_activities(&ctx, Some(vec![aid])).await?;
    activities.pop().ok_or_else(|| RestError {
        kind: ErrorKind::UnknownAid,
        message: format!("no retained activity with aid {}", aid),
    })
    .map(Json)
}

async fn create_activity(
    State(ctx): State<Arc<RestCtx>>,
    Json(cmd): Json<ActivityCmd>,
) -> Result<(StatusCode, Json<ActivitySummary>), RestError> {
    match call(
        &ctx,
        topics::REQUEST_ACTIVITY_RUN,
        topics::ACTIVITY_RUNNING,
        Payload::ActivityRun(cmd),
    )
    .await?
    {
        Payload::ActivityRunning { activity } => Ok((StatusCode::CREATED, Json(activity))),
        other => Err(unexpected(other)),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
