//! Running the external site generator.
//!
//! The generator is a black box: it is started in the working copy with a set
//! of `PREVIEW_*` variables, prints a JSON array of `{url, inputPath, content?}`
//! on stdout and exits. Its stderr is inherited so the worker manager captures
//! it alongside the worker's own diagnostics; on a failed run its stdout is
//! forwarded there too.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use preview_core::{permalink, BuildTask, GeneratorConfig, PageDescriptor};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::env::{self, EnvVars};
use crate::error::GeneratorError;

/// Markers some generator setups print around the page list.
const LIST_START: char = '\u{27a1}';
const LIST_END: char = '\u{2b05}';

/// One entry of the generator's page list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedPage {
    pub url: String,
    #[serde(rename = "inputPath")]
    pub input_path: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl GeneratedPage {
    pub fn descriptor(&self) -> PageDescriptor {
        PageDescriptor::from_generated(self.url.clone(), &self.input_path)
    }
}

/// Generator input: the template joined onto the working copy, or the whole
/// working copy when no template is given.
pub fn input_path(task: &BuildTask) -> String {
    let root = task.working_copy.display().to_string();
    match task.template_path.as_deref() {
        Some(template) if template.starts_with('/') => format!("{root}{template}"),
        Some(template) => format!("{root}/{template}"),
        None => root,
    }
}

/// Build the generator environment, later layers overriding earlier ones:
/// base `PREVIEW_*` variables, `.env`, preview overrides, `preview.env`,
/// then the task's extra variables.
pub async fn environment(
    task: &BuildTask,
    generator: &GeneratorConfig,
) -> Result<EnvVars, GeneratorError> {
    let root = task.working_copy.as_path();
    let input = input_path(task);
    let base_url = task.identity.to_string();

    let mut vars = EnvVars::new();
    vars.insert("PREVIEW_PROJECT_PATH".into(), root.display().to_string());
    vars.insert("PREVIEW_INPUT".into(), input.clone());
    vars.insert(
        "PREVIEW_CONFIG_PATH".into(),
        root.join(&generator.config_file).display().to_string(),
    );
    vars.insert("PREVIEW_BASE_URL".into(), base_url.clone());
    vars.insert(
        "PREVIEW_PERMALINK".into(),
        task.permalink.clone().unwrap_or_default(),
    );

    env::load_file(&root.join(".env"), &mut vars).await?;
    vars.insert("SILEX_FS_HOSTING_ROOT".into(), input);
    vars.insert("BASE_URL".into(), base_url);
    env::load_file(&root.join("preview.env"), &mut vars).await?;

    vars.extend(task.extra_variables.clone());
    Ok(vars)
}

/// Replace `$NAME` occurrences of known variables in each argument.
///
/// Longer names are substituted first so `$PREVIEW_INPUT_DIR` is never
/// clobbered by `$PREVIEW_INPUT`.
pub fn resolve_args(args: &[String], vars: &EnvVars) -> Vec<String> {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort_by_key(|key| std::cmp::Reverse(key.len()));
    args.iter()
        .map(|arg| {
            let mut result = arg.clone();
            for key in &keys {
                let pattern = format!("${key}");
                if result.contains(&pattern) {
                    result = result.replace(&pattern, &vars[*key]);
                }
            }
            result
        })
        .collect()
}

/// Run the generator for `task` and return every page it reports.
pub async fn run(
    task: &BuildTask,
    generator: &GeneratorConfig,
) -> Result<Vec<GeneratedPage>, GeneratorError> {
    let vars = environment(task, generator).await?;
    let argv = resolve_args(&generator.command, &vars);
    let Some((program, args)) = argv.split_first() else {
        return Err(GeneratorError::Spawn {
            program: String::new(),
            source: std::io::Error::other("empty generator command"),
        });
    };

    tracing::info!(
        repository = %task.identity,
        program = %program,
        input = %vars["PREVIEW_INPUT"],
        "running generator",
    );

    let child = Command::new(program)
        .args(args)
        .current_dir(&task.working_copy)
        .envs(&vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| GeneratorError::Spawn {
            program: program.clone(),
            source,
        })?;

    let limit = Duration::from_secs(generator.timeout_secs);
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map_err(GeneratorError::Channel)?,
        // Dropping the future drops the child, which kills it.
        Err(_) => {
            return Err(GeneratorError::Timeout {
                secs: generator.timeout_secs,
            })
        }
    };

    if !output.status.success() {
        // no page list is coming; what it printed is diagnostics
        let mut stderr = tokio::io::stderr();
        let _ = stderr.write_all(&output.stdout).await;
        let _ = stderr.flush().await;
        return Err(GeneratorError::Exit {
            code: output.status.code(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pages = parse_pages(&stdout)?;
    if pages.is_empty() {
        return Err(GeneratorError::NoPages);
    }
    Ok(pages)
}

/// Extract the page list from generator stdout.
///
/// A list framed by `➡ … ⬅` wins; otherwise the outermost `[` … `]` span
/// is parsed.
pub fn parse_pages(stdout: &str) -> Result<Vec<GeneratedPage>, GeneratorError> {
    let framed = stdout.find(LIST_START).and_then(|start| {
        let body = &stdout[start + LIST_START.len_utf8()..];
        body.find(LIST_END).map(|end| &body[..end])
    });
    let json = match framed {
        Some(body) => body.trim(),
        None => {
            let start = stdout.find('[').ok_or(GeneratorError::NoPageList)?;
            let end = stdout.rfind(']').ok_or(GeneratorError::NoPageList)?;
            if end < start {
                return Err(GeneratorError::NoPageList);
            }
            &stdout[start..=end]
        }
    };
    Ok(serde_json::from_str(json)?)
}

/// Pick the page served at `wanted`: an exact url match first, then a match
/// ignoring the trailing slash.
pub fn select<'a>(pages: &'a [GeneratedPage], wanted: &str) -> Option<&'a GeneratedPage> {
    pages.iter().find(|page| page.url == wanted).or_else(|| {
        let wanted = permalink::normalize(wanted);
        pages
            .iter()
            .find(|page| permalink::normalize(&page.url) == wanted)
    })
}

/// Does `path` look like a template worth rediscovering?
pub fn is_template(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("html")
}
