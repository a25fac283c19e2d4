// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::supervisor::{SupervisorConfig, WorkerLauncher};
use oet_core::FakeClock;
use std::time::Duration;
use tokio::process::Command;

fn statechange_line(pid: u64, state: &str) -> String {
    format!(
        r#"{{"topic":"procedure.lifecycle.statechange","msg_src":"worker-{pid}","payload":{{"type":"state_change","pid":{pid},"state":"{state}","at_ms":1}}}}"#
    )
}

/// A worker stand-in that answers each work frame kind with the canonical
/// transitions and ignores bridged pubsub traffic.
fn scripted_launcher() -> WorkerLauncher {
    Arc::new(|pid| {
        let script = format!(
            r#"echo '{idle}'
while read line; do
  case "$line" in
    *'"type":"env"'*) echo '{prep_env}'; echo '{idle}';;
    *'"type":"load"'*) echo '{loading}'; echo '{idle}';;
    *'"type":"run"'*) echo '{running}'; echo '{ready}';;
    *'"type":"shutdown"'*) exit 0;;
  esac
done
exit 0
"#,
            idle = statechange_line(pid, "IDLE"),
            prep_env = statechange_line(pid, "PREP_ENV"),
            loading = statechange_line(pid, "LOADING"),
            running = statechange_line(pid, "RUNNING"),
            ready = statechange_line(pid, "READY"),
        );
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        Ok(cmd)
    })
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        startup: Duration::from_millis(500),
        soft_stop: Duration::from_millis(300),
        hard_stop: Duration::from_millis(300),
        relay_timeout: Duration::from_millis(100),
    }
}

fn manager(bus: &EventBus, max_workers: usize) -> Arc<ProcessManager<FakeClock>> {
    let supervisor = Supervisor::new(bus.clone(), FakeClock::new(), test_config())
        .with_launcher(scripted_launcher());
    let envmgr = Arc::new(EnvironmentManager::new(
        std::env::temp_dir().join("oet-pm-tests-envs"),
        Duration::from_secs(5),
    ));
    ProcessManager::new(bus.clone(), supervisor, envmgr, max_workers)
}

fn fs_script() -> ExecutableScript {
    ExecutableScript::Filesystem { path: "/tmp/scripts/hello.py".into() }
}

async fn wait_for_state(
    manager: &ProcessManager<FakeClock>,
    pid: u64,
    state: ProcedureState,
) -> bool {
    for _ in 0..100 {
        if manager.state(pid) == Some(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn create_primes_load_and_init_to_ready() {
    let bus = EventBus::new();
    let preparing = {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topics::PROCEDURE_PREPARING, move |envelope| {
            if let Payload::Preparing { pid, .. } = &envelope.payload {
                sink.lock().push(*pid);
            }
            Ok(())
        });
        seen
    };
    let manager = manager(&bus, 0);

    let script =
        manager.create(1, fs_script(), Some(ProcedureInput::default())).await.unwrap();
    assert_eq!(script, fs_script());
    assert_eq!(*preparing.lock(), vec![1]);
    assert!(wait_for_state(&manager, 1, ProcedureState::Ready).await);
    assert!(manager.is_live(1));
}

#[tokio::test]
async fn run_requires_ready_unless_forced() {
    let bus = EventBus::new();
    let manager = manager(&bus, 0);

    // no init primed: the worker parks at IDLE after the load
    manager.create(2, fs_script(), None).await.unwrap();
    assert!(wait_for_state(&manager, 2, ProcedureState::Idle).await);

    let err = manager.run(2, "main", ProcedureInput::default(), false).await.unwrap_err();
    match err {
        PmError::NotReady { pid, state } => {
            assert_eq!(pid, 2);
            assert_eq!(state, ProcedureState::Idle);
        }
        other => panic!("expected NotReady, got {:?}", other),
    }

    manager.run(2, "main", ProcedureInput::default(), true).await.unwrap();
    assert!(wait_for_state(&manager, 2, ProcedureState::Ready).await);
}

#[tokio::test]
async fn run_on_unknown_pid_is_rejected() {
    let bus = EventBus::new();
    let manager = manager(&bus, 0);
    let err = manager.run(99, "main", ProcedureInput::default(), false).await.unwrap_err();
    assert!(matches!(err, PmError::UnknownPid(99)));
}

#[tokio::test]
async fn stop_releases_the_worker() {
    let bus = EventBus::new();
    let manager = manager(&bus, 0);

    manager.create(3, fs_script(), Some(ProcedureInput::default())).await.unwrap();
    assert!(wait_for_state(&manager, 3, ProcedureState::Ready).await);

    let state = manager.stop(3).await.unwrap();
    assert_eq!(state, ProcedureState::Stopped);
    assert!(wait_for_state(&manager, 3, ProcedureState::Stopped).await);
    assert!(!manager.is_live(3));
}

#[tokio::test]
async fn worker_cap_rejects_further_prepares() {
    let bus = EventBus::new();
    let manager = manager(&bus, 1);

    manager.create(4, fs_script(), None).await.unwrap();
    let err = manager.create(5, fs_script(), None).await.unwrap_err();
    assert!(matches!(err, PmError::TooManyWorkers { live: 1 }));
    assert_eq!(
        ServiceFailure::from(err).kind,
        ErrorKind::TooManyWorkers,
    );
}

#[tokio::test]
async fn states_snapshot_tracks_every_pid() {
    let bus = EventBus::new();
    let manager = manager(&bus, 0);

    manager.create(6, fs_script(), None).await.unwrap();
    manager.create(7, fs_script(), None).await.unwrap();
    assert!(wait_for_state(&manager, 6, ProcedureState::Idle).await);
    assert!(wait_for_state(&manager, 7, ProcedureState::Idle).await);

    let states = manager.states();
    assert_eq!(states.get(&6), Some(&ProcedureState::Idle));
    assert_eq!(states.get(&7), Some(&ProcedureState::Idle));
}
