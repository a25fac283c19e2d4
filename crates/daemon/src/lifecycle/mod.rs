// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly and shutdown.
//!
//! Wires the bus, services, SSE hub and REST listener together, installs
//! the signal handler, and drains all workers on the way out.

use crate::activity::{ActivityConfig, ActivityService};
use crate::env;
use crate::envmgr::EnvironmentManager;
use crate::facade::RequestIds;
use crate::oda::HttpArchive;
use crate::procmgr::ProcessManager;
use crate::rest::sse::SseHub;
use crate::rest::{self, RestCtx};
use crate::ses::{ExecutionService, SesConfig};
use crate::supervisor::{signal, Supervisor, SupervisorConfig};
use oet_bus::EventBus;
use oet_core::SystemClock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code when startup fails (bind, config).
pub const EXIT_STARTUP: i32 = 1;
/// Exit code when the serving loop fails at runtime.
pub const EXIT_BUS: i32 = 2;
/// Exit code when a termination signal ended the daemon.
pub const EXIT_SIGNAL: i32 = 130;

/// Run the daemon until shutdown; returns the process exit code.
pub async fn serve() -> i32 {
    let bus = EventBus::new();
    let clock = SystemClock;
    let shutdown = CancellationToken::new();
    let signal_task = signal::watch_signals(shutdown.clone());

    let supervisor = Supervisor::new(bus.clone(), clock.clone(), SupervisorConfig::default());
    let envmgr = Arc::new(EnvironmentManager::from_env());
    let manager = ProcessManager::new(bus.clone(), supervisor, envmgr, env::max_workers());

    let ses = ExecutionService::new(
        bus.clone(),
        clock.clone(),
        Arc::clone(&manager),
        SesConfig::default(),
    );
    ses.attach();

    let requests = RequestIds::new();
    let activity = ActivityService::new(
        bus.clone(),
        clock,
        Arc::new(HttpArchive::from_env()),
        requests.clone(),
        ActivityConfig::default(),
    );
    Arc::clone(&activity).attach();

    // streamed records carry the aid of the activity that issued them
    let sse = SseHub::new(env::sse_queue_len())
        .with_aid_resolver(Arc::new(move |request_id| activity.aid_for_request(request_id)));
    sse.attach(&bus);

    let ctx = Arc::new(RestCtx {
        bus: bus.clone(),
        requests,
        api_timeout: env::api_timeout(),
        sse,
    });
    let app = rest::router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], env::http_port()));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "cannot bind REST listener");
            return EXIT_STARTUP;
        }
    };
    info!(%addr, "oetd serving");

    let outcome = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    info!("draining workers");
    manager.stop_all().await;

    let signal_name = signal_task.await.unwrap_or("none");
    match outcome {
        Err(e) => {
            error!(error = %e, "serve loop failed");
            EXIT_BUS
        }
        Ok(()) if signal_name != "none" => EXIT_SIGNAL,
        Ok(()) => EXIT_OK,
    }
}
