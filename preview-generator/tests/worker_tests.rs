//! Worker-side exchange tests. A small `sh` script stands in for the site
//! generator; each test gets an isolated `TempDir` working copy.

use std::collections::BTreeMap;
use std::fs;

use preview_core::{BuildTask, GeneratorConfig, RepositoryIdentity};
use preview_generator::{
    invoke, protocol, worker, WorkerMessage, WorkerRequest, WorkerResponse,
};
use rstest::rstest;
use tempfile::TempDir;

const SITE: &str = r#"printf '[{"url":"/","inputPath":"./index.html","content":"<h1>%s</h1>"},{"url":"/a/","inputPath":"./a.html","content":"<p>a</p>"},{"url":"/draft/","inputPath":"./draft.html"}]' "$PREVIEW_BASE_URL""#;

fn generator(script: &str, timeout_secs: u64) -> GeneratorConfig {
    GeneratorConfig {
        command: vec!["sh".into(), "-c".into(), script.into()],
        config_file: ".eleventy.js".into(),
        timeout_secs,
    }
}

fn task(dir: &TempDir, permalink: Option<&str>) -> BuildTask {
    BuildTask {
        identity: RepositoryIdentity::new("ownerX", "repoY").expect("identity"),
        working_copy: dir.path().to_path_buf(),
        template_path: None,
        permalink: permalink.map(str::to_string),
        extra_variables: BTreeMap::new(),
    }
}

async fn exchange(request_line: &str) -> Vec<WorkerMessage> {
    let input = format!("{request_line}\n");
    let mut output = Vec::new();
    worker::serve(input.as_bytes(), &mut output)
        .await
        .expect("serve");
    String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| protocol::decode(line).expect("protocol line").expect("valid message"))
        .collect()
}

#[tokio::test]
async fn serve_announces_ready_then_answers_once() {
    let dir = TempDir::new().expect("working copy");
    let request = WorkerRequest {
        task: task(&dir, Some("/")),
        generator: generator(SITE, 10),
    };
    let messages = exchange(&serde_json::to_string(&request).expect("encode")).await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], WorkerMessage::Ready);
    assert_eq!(
        messages[1],
        WorkerMessage::Response(WorkerResponse::content("<h1>ownerX/repoY</h1>"))
    );
}

#[tokio::test]
async fn malformed_request_gets_500() {
    let messages = exchange("{\"not\":\"a request\"}").await;
    match &messages[1] {
        WorkerMessage::Response(response) => {
            assert_eq!(response.status, 500);
            assert!(response.error.as_deref().unwrap_or("").contains(worker::MISSING_PARAMETERS));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn list_mode_returns_descriptors() {
    let dir = TempDir::new().expect("working copy");
    let response = worker::handle(WorkerRequest {
        task: task(&dir, None),
        generator: generator(SITE, 10),
    })
    .await;

    let pages = response.pages.expect("pages");
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[1].url, "/a/");
    assert_eq!(pages[1].template_path, "/a.html");
}

#[rstest]
#[case("/a", 200)]
#[case("/a/", 200)]
#[case("/draft/", 404)]
#[case("/zzz", 404)]
#[tokio::test]
async fn permalink_selection_statuses(#[case] permalink: &str, #[case] status: u16) {
    let dir = TempDir::new().expect("working copy");
    let response = worker::handle(WorkerRequest {
        task: task(&dir, Some(permalink)),
        generator: generator(SITE, 10),
    })
    .await;
    assert_eq!(response.status, status);
    if status == 404 {
        assert!(response.error.expect("error").contains(permalink));
    }
}

#[tokio::test]
async fn failing_generator_yields_500() {
    let dir = TempDir::new().expect("working copy");
    let response = worker::handle(WorkerRequest {
        task: task(&dir, Some("/")),
        generator: generator("echo boom >&2; exit 7", 10),
    })
    .await;
    assert_eq!(response.status, 500);
    let error = response.error.expect("error");
    assert!(error.starts_with(worker::BUILD_FAILED));
    assert!(error.contains('7'), "exit code should be reported: {error}");
}

#[tokio::test]
async fn hung_generator_times_out() {
    let dir = TempDir::new().expect("working copy");
    let response = worker::handle(WorkerRequest {
        task: task(&dir, Some("/")),
        generator: generator("sleep 30", 1),
    })
    .await;
    assert_eq!(response.status, 500);
    assert!(response.error.expect("error").contains("did not finish"));
}

#[tokio::test]
async fn environment_layers_env_files_and_extra_variables() {
    let dir = TempDir::new().expect("working copy");
    fs::write(
        dir.path().join(".env"),
        "CMS_URL=https://cms.example.org\nBASE_URL=overridden-later\nLANG=en\n",
    )
    .expect("write .env");
    fs::write(
        dir.path().join("preview.env"),
        "API=${CMS_URL}/api\nTHEME=${PREVIEW_TEST_THEME:-light}\n",
    )
    .expect("write preview.env");

    let mut task = task(&dir, Some("/"));
    task.template_path = Some("/index.html".into());
    task.extra_variables.insert("LANG".into(), "fr".into());

    let vars = invoke::environment(&task, &generator(SITE, 10))
        .await
        .expect("environment");
    assert_eq!(vars["API"], "https://cms.example.org/api");
    assert_eq!(vars["THEME"], "light");
    assert_eq!(vars["BASE_URL"], "ownerX/repoY", "preview override beats .env");
    assert_eq!(vars["LANG"], "fr", "extra variables win");
    assert_eq!(
        vars["PREVIEW_INPUT"],
        format!("{}/index.html", dir.path().display())
    );
}
