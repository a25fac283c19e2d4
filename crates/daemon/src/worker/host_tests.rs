// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::io::Write;
use tempfile::TempDir;

/// Write a shell script acting as a script host.
fn host_script(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("host.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", body).unwrap();
    path
}

fn events() -> (mpsc::Sender<(String, serde_json::Value)>, mpsc::Receiver<(String, serde_json::Value)>)
{
    mpsc::channel(16)
}

const HELLO: &str = r#"echo '{"hello": {"functions": ["init", "main"]}}'"#;

#[tokio::test]
async fn handshake_reports_functions() {
    let dir = TempDir::new().unwrap();
    let script = host_script(&dir, &format!("{HELLO}\nwhile read line; do echo '{{\"ok\": true}}'; done"));
    let (tx, _rx) = events();

    let host = ScriptHost::spawn("sh", &script, None, tx, Duration::from_secs(5)).await.unwrap();
    assert_eq!(host.functions(), ["init", "main"]);
    host.shutdown().await;
}

#[tokio::test]
async fn missing_script_is_script_not_found() {
    let (tx, _rx) = events();
    let err = ScriptHost::spawn(
        "sh",
        Path::new("/tmp/definitely-not-here.py"),
        None,
        tx,
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, HostError::NotFound(_)));
    assert!(err.to_string().starts_with("ScriptNotFound: "));
}

#[tokio::test]
async fn silent_script_times_out_the_handshake() {
    let dir = TempDir::new().unwrap();
    let script = host_script(&dir, "sleep 5");
    let (tx, _rx) = events();
    let err =
        ScriptHost::spawn("sh", &script, None, tx, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, HostError::HandshakeTimeout(_)));
}

#[tokio::test]
async fn invoke_returns_ok_result() {
    let dir = TempDir::new().unwrap();
    let script = host_script(&dir, &format!("{HELLO}\nwhile read line; do echo '{{\"ok\": true}}'; done"));
    let (tx, _rx) = events();
    let mut host = ScriptHost::spawn("sh", &script, None, tx, Duration::from_secs(5)).await.unwrap();

    assert!(host.invoke("init", &ProcedureInput::default()).await.is_ok());
    assert!(host.invoke("main", &ProcedureInput::default()).await.is_ok());
    host.shutdown().await;
}

#[tokio::test]
async fn invoke_surfaces_the_traceback() {
    let dir = TempDir::new().unwrap();
    let script = host_script(
        &dir,
        &format!(
            "{HELLO}\nread line; echo '{{\"ok\": false, \"traceback\": \"Traceback: kaboom\"}}'"
        ),
    );
    let (tx, _rx) = events();
    let mut host = ScriptHost::spawn("sh", &script, None, tx, Duration::from_secs(5)).await.unwrap();

    let err = host.invoke("main", &ProcedureInput::default()).await.unwrap_err();
    assert_eq!(err, "Traceback: kaboom");
    host.shutdown().await;
}

#[tokio::test]
async fn event_lines_are_forwarded() {
    let dir = TempDir::new().unwrap();
    let script = host_script(
        &dir,
        &format!(
            "{HELLO}\nread line; echo '{{\"event\": \"user.script.announce\", \"payload\": {{\"msg\": \"hi\"}}}}'; echo '{{\"ok\": true}}'"
        ),
    );
    let (tx, mut rx) = events();
    let mut host = ScriptHost::spawn("sh", &script, None, tx, Duration::from_secs(5)).await.unwrap();

    host.invoke("main", &ProcedureInput::default()).await.unwrap();
    let (topic, payload) = rx.recv().await.unwrap();
    assert_eq!(topic, "user.script.announce");
    assert_eq!(payload, json!({"msg": "hi"}));
    host.shutdown().await;
}

#[tokio::test]
async fn dead_host_fails_the_invoke() {
    let dir = TempDir::new().unwrap();
    let script = host_script(&dir, &format!("{HELLO}\nexit 0"));
    let (tx, _rx) = events();
    let mut host = ScriptHost::spawn("sh", &script, None, tx, Duration::from_secs(5)).await.unwrap();

    let err = host.invoke("main", &ProcedureInput::default()).await.unwrap_err();
    assert!(err.contains("exited") || err.contains("closed"), "got: {err}");
}
