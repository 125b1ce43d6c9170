//! Sync a real local repository, then build pages through worker processes
//! spawned from the `preview` binary. Skipped when `git` is not installed.

use std::path::Path;
use std::process::Command;

use preview_core::{BuildRequest, BuildResult, GeneratorConfig, PreviewConfig, SyncTrigger};
use preview_daemon::{BuildOrchestrator, PreviewError, SyncAck};
use preview_sync::SyncOutcome;
use tempfile::TempDir;

const PAGES: &str = r#"[
  {"url": "/", "inputPath": "./index.html", "content": "<h1>synced home</h1>"},
  {"url": "/about/", "inputPath": "./about.html", "content": "<h1>about</h1>"}
]"#;

fn git(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args([
            "-c",
            "user.name=Preview",
            "-c",
            "user.email=preview@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn origin(tmp: &TempDir) -> Option<()> {
    let origin = tmp.path().join("origin/ownerX/repoY");
    std::fs::create_dir_all(&origin).unwrap();
    if !git(&origin, &["init", "-q"]) {
        eprintln!("git not available, skipping");
        return None;
    }
    assert!(git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]));
    std::fs::write(origin.join("pages.json"), PAGES).unwrap();
    std::fs::write(origin.join("index.html"), "{{ content }}").unwrap();
    assert!(git(&origin, &["add", "-A"]));
    assert!(git(&origin, &["commit", "-q", "-m", "site"]));
    Some(())
}

fn config(tmp: &TempDir) -> PreviewConfig {
    PreviewConfig {
        repos_root: tmp.path().join("repos"),
        remote_url: format!("{}/origin/{{owner}}/{{name}}", tmp.path().display()),
        branch: "main".into(),
        concurrency: 2,
        install_command: vec!["true".into()],
        generator: GeneratorConfig {
            command: vec!["sh".into(), "-c".into(), "cat pages.json".into()],
            config_file: ".eleventy.js".into(),
            timeout_secs: 30,
        },
        worker_program: Some(env!("CARGO_BIN_EXE_preview").into()),
        ..PreviewConfig::default()
    }
}

fn build(permalink: &str) -> BuildRequest {
    BuildRequest {
        owner: "ownerX".into(),
        name: "repoY".into(),
        permalink: permalink.into(),
        template_path: None,
        working_copy: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn synced_repository_builds_pages_through_worker_processes() {
    let tmp = TempDir::new().unwrap();
    if origin(&tmp).is_none() {
        return;
    }
    let preview = BuildOrchestrator::from_config(config(&tmp)).unwrap();

    let trigger = SyncTrigger {
        owner: "ownerX".into(),
        name: "repoY".into(),
        discover: None,
    };
    match preview.sync(trigger, true).await.unwrap() {
        SyncAck::Completed { outcome } => assert!(matches!(outcome, SyncOutcome::Cloned { .. })),
        other => panic!("expected a completed sync, got {other:?}"),
    }

    let home = preview.build(build("/")).await.unwrap();
    assert_eq!(
        home,
        BuildResult::Success {
            content: "<h1>synced home</h1>".into()
        }
    );

    let about = preview.build(build("/about")).await.unwrap();
    assert_eq!(about.status(), 200);

    match preview.build(build("/zzz")).await {
        Err(err @ PreviewError::NotFound { .. }) => {
            assert_eq!(err.status(), 404);
            assert!(err.to_string().contains("/zzz"));
        }
        other => panic!("expected not found, got {other:?}"),
    }
}
