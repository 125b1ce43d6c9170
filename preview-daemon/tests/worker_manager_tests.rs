//! Worker manager against `sh` stand-in workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use preview_core::{BuildResult, BuildTask, GeneratorConfig, RepositoryIdentity};
use preview_daemon::{ProcessLauncher, WorkerError, WorkerManager};
use tempfile::TempDir;

const READY: &str = r#"echo '::preview::{"type":"ready"}'"#;

fn task(dir: &Path) -> BuildTask {
    BuildTask {
        identity: RepositoryIdentity::new("ownerX", "repoY").unwrap(),
        working_copy: dir.to_path_buf(),
        template_path: Some("index.html".into()),
        permalink: Some("/".into()),
        extra_variables: Default::default(),
    }
}

fn manager(script: &str, timeout_secs: u64) -> WorkerManager<ProcessLauncher> {
    WorkerManager::new(
        ProcessLauncher::new("sh", vec!["-c".into(), script.into()]),
        GeneratorConfig::default(),
        Duration::from_secs(timeout_secs),
    )
}

#[tokio::test]
async fn content_response_is_success() {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "{READY}; read request; echo building; {}",
        r#"echo '::preview::{"type":"response","status":200,"content":"<p>ok</p>"}'"#
    );
    let result = manager(&script, 10).run(task(dir.path())).await.unwrap();
    assert_eq!(result, BuildResult::Success { content: "<p>ok</p>".into() });
}

#[tokio::test]
async fn request_reaches_worker_and_logs_are_attached_to_failures() {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "{READY}; read request; echo \"$request\" >&2; echo '[gen] scanning'; {}",
        r#"echo '::preview::{"type":"response","status":404,"error":"nope"}'"#
    );
    let result = manager(&script, 10).run(task(dir.path())).await.unwrap();
    match result {
        BuildResult::Failure { status, error, logs } => {
            assert_eq!(status, 404);
            assert_eq!(error, "nope");
            assert_eq!(logs.stdout, vec!["[gen] scanning".to_string()]);
            assert_eq!(logs.stderr.len(), 1);
            assert!(logs.stderr[0].contains(r#""permalink":"/""#));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn nonzero_exit_keeps_stderr_in_order() {
    let dir = TempDir::new().unwrap();
    let script =
        format!("{READY}; read request; echo one >&2; echo two >&2; echo three >&2; exit 3");
    let err = manager(&script, 10).run(task(dir.path())).await.unwrap_err();
    match err {
        WorkerError::WorkerExit { code, logs } => {
            assert_eq!(code, Some(3));
            assert_eq!(logs.stderr, vec!["one", "two", "three"]);
            assert_eq!(logs.display_stderr(), "one\ntwo\nthree");
        }
        other => panic!("expected WorkerExit, got {other:?}"),
    }
}

#[tokio::test]
async fn exit_before_ready_is_worker_exit() {
    let dir = TempDir::new().unwrap();
    let err = manager("echo fatal >&2; exit 1", 10)
        .run(task(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::WorkerExit { code: Some(1), .. }));
}

#[tokio::test]
async fn unknown_message_is_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "{READY}; read request; {}",
        r#"echo '::preview::{"type":"progress","percent":50}'"#
    );
    let err = manager(&script, 10).run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProtocolViolation { .. }), "{err:?}");
}

#[tokio::test]
async fn response_without_payload_is_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "{READY}; read request; {}",
        r#"echo '::preview::{"type":"response","status":200}'"#
    );
    let err = manager(&script, 10).run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProtocolViolation { .. }), "{err:?}");
}

#[tokio::test]
async fn response_before_request_is_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let script = r#"echo '::preview::{"type":"response","status":200,"content":"x"}'"#;
    let err = manager(script, 10).run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProtocolViolation { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_working_copy_is_rejected_without_spawning() {
    let manager = WorkerManager::new(
        ProcessLauncher::new("/nonexistent/preview-worker", vec![]),
        GeneratorConfig::default(),
        Duration::from_secs(5),
    );
    let err = manager.run(task(Path::new(""))).await.unwrap_err();
    assert!(matches!(err, WorkerError::MissingParameters("working copy")));
}

#[tokio::test]
async fn unlaunchable_worker_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let manager = WorkerManager::new(
        ProcessLauncher::new("/nonexistent/preview-worker", vec![]),
        GeneratorConfig::default(),
        Duration::from_secs(5),
    );
    let err = manager.run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::WorkerSpawn { .. }));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn silent_worker_times_out_and_is_killed() {
    let dir = TempDir::new().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pidfile.display());

    let started = std::time::Instant::now();
    let err = manager(&script, 1).run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::Timeout { secs: 1, .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pidfile).unwrap();
    let proc_entry = PathBuf::from(format!("/proc/{}", pid.trim()));
    assert!(!proc_entry.exists(), "worker {} still running", pid.trim());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn worker_hanging_after_request_is_killed() {
    let dir = TempDir::new().unwrap();
    let pidfile = dir.path().join("worker.pid");
    let script = format!(
        "{READY}; read request; echo $$ > '{}'; exec sleep 30",
        pidfile.display()
    );

    let err = manager(&script, 1).run(task(dir.path())).await.unwrap_err();
    assert!(matches!(err, WorkerError::Timeout { .. }));

    let pid = std::fs::read_to_string(&pidfile).unwrap();
    assert!(!PathBuf::from(format!("/proc/{}", pid.trim())).exists());
}
