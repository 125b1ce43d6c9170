//! Binary-level tests: help output, daemon-less commands and the hidden
//! `worker` subcommand speaking the protocol over real pipes.

use std::collections::BTreeMap;

use assert_cmd::Command;
use predicates::prelude::*;
use preview_core::{BuildTask, GeneratorConfig, RepositoryIdentity};
use preview_generator::{protocol, WorkerMessage, WorkerRequest, WorkerResponse};
use tempfile::TempDir;

fn preview(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("preview").unwrap();
    cmd.env("HOME", home.path()).env_remove("RUST_LOG");
    cmd
}

fn request(working_copy: &TempDir, permalink: Option<&str>, script: &str) -> String {
    let request = WorkerRequest {
        task: BuildTask {
            identity: RepositoryIdentity::new("ownerX", "repoY").unwrap(),
            working_copy: working_copy.path().to_path_buf(),
            template_path: Some("/index.html".into()),
            permalink: permalink.map(str::to_string),
            extra_variables: BTreeMap::new(),
        },
        generator: GeneratorConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            config_file: ".eleventy.js".into(),
            timeout_secs: 10,
        },
    };
    format!("{}\n", serde_json::to_string(&request).unwrap())
}

fn messages(stdout: &[u8]) -> Vec<WorkerMessage> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(protocol::decode)
        .map(Result::unwrap)
        .collect()
}

#[test]
fn help_lists_public_commands_only() {
    let home = TempDir::new().unwrap();
    preview(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn status_without_daemon_reports_not_running() {
    let home = TempDir::new().unwrap();
    preview(&home)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""running": false"#));
}

#[test]
fn stop_without_daemon_is_not_an_error() {
    let home = TempDir::new().unwrap();
    preview(&home)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn build_without_daemon_fails() {
    let home = TempDir::new().unwrap();
    preview(&home)
        .args(["build", "ownerX", "repoY", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("build request failed"));
}

#[test]
fn worker_renders_requested_page() {
    let site = TempDir::new().unwrap();
    let script = r#"echo "generator chatter"; printf '[{"url":"/","inputPath":"./index.html","content":"<h1>home</h1>"}]'"#;
    let output = Command::cargo_bin("preview")
        .unwrap()
        .arg("worker")
        .write_stdin(request(&site, Some("/"), script))
        .output()
        .unwrap();

    assert!(output.status.success());
    let messages = messages(&output.stdout);
    assert_eq!(
        messages,
        vec![
            WorkerMessage::Ready,
            WorkerMessage::Response(WorkerResponse::content("<h1>home</h1>")),
        ]
    );
}

#[test]
fn worker_reports_missing_page_as_404() {
    let site = TempDir::new().unwrap();
    let script = r#"printf '[{"url":"/","inputPath":"./index.html","content":"x"}]'"#;
    let output = Command::cargo_bin("preview")
        .unwrap()
        .arg("worker")
        .write_stdin(request(&site, Some("/zzz/"), script))
        .output()
        .unwrap();

    let messages = messages(&output.stdout);
    match messages.last() {
        Some(WorkerMessage::Response(response)) => assert_eq!(response.status, 404),
        other => panic!("expected a response, got {other:?}"),
    }
}

#[test]
fn worker_without_request_exits_nonzero() {
    Command::cargo_bin("preview")
        .unwrap()
        .arg("worker")
        .write_stdin("")
        .assert()
        .failure()
        .stdout(predicate::str::contains("::preview::"));
}

#[test]
fn failed_generator_stdout_reaches_worker_stderr() {
    let site = TempDir::new().unwrap();
    let script = r#"echo "Error: template syntax at line 3"; exit 3"#;
    let output = Command::cargo_bin("preview")
        .unwrap()
        .arg("worker")
        .write_stdin(request(&site, Some("/"), script))
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: template syntax at line 3"), "stderr: {stderr}");
    match messages(&output.stdout).last() {
        Some(WorkerMessage::Response(response)) => assert_eq!(response.status, 500),
        other => panic!("expected a response, got {other:?}"),
    }
}
