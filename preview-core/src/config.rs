//! Daemon configuration.
//!
//! Loaded from `~/.preview/config.yaml` when present, every field defaulted,
//! then overridden from the environment:
//!
//! | variable                  | field                  |
//! |---------------------------|------------------------|
//! | `LOCAL_REPO_PATH`         | `repos_root`           |
//! | `PREVIEW_REMOTE_URL`      | `remote_url`           |
//! | `GITLAB_URL`              | host part of the default `remote_url` |
//! | `PREVIEW_BRANCH`          | `branch`               |
//! | `CONCURRENT_OPERATIONS`   | `concurrency`          |
//! | `PREVIEW_TASK_TIMEOUT`    | `task_timeout_secs`    |
//! | `PREVIEW_BUILD_TIMEOUT`   | `build_timeout_secs`   |
//! | `PREVIEW_COMMAND_TIMEOUT` | `command_timeout_secs` |
//! | `PREVIEW_WORKER`          | `worker_program`       |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;
use crate::types::RepositoryIdentity;

/// How the external site generator is invoked inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Program and arguments. `$PREVIEW_*` placeholders are substituted.
    pub command: Vec<String>,
    /// Generator config file, relative to the working copy.
    pub config_file: String,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".into(),
                "@11ty/eleventy".into(),
                "--to=json".into(),
                "--input=$PREVIEW_INPUT".into(),
                "--config=$PREVIEW_CONFIG_PATH".into(),
            ],
            config_file: ".eleventy.js".into(),
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub repos_root: PathBuf,
    /// Clone URL template; `{owner}` and `{name}` are substituted.
    pub remote_url: String,
    pub branch: String,
    /// Process-wide limit on concurrently running builds and syncs.
    pub concurrency: usize,
    pub task_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub install_command: Vec<String>,
    /// Files whose content change between two commits triggers a reinstall.
    pub dependency_manifests: Vec<String>,
    pub generator: GeneratorConfig,
    /// Worker executable. `None` re-executes the current binary as `worker`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            repos_root: PathBuf::from("/tmp/previews"),
            remote_url: remote_url_for_host("gitlab.com"),
            branch: "main".into(),
            concurrency: 2,
            task_timeout_secs: 300,
            build_timeout_secs: 120,
            command_timeout_secs: 240,
            install_command: vec!["npm".into(), "install".into()],
            dependency_manifests: vec!["package.json".into(), "package-lock.json".into()],
            generator: GeneratorConfig::default(),
            worker_program: None,
        }
    }
}

fn remote_url_for_host(host: &str) -> String {
    format!("git@{host}:{{owner}}/{{name}}.git")
}

impl PreviewConfig {
    /// Load `<home>/.preview/config.yaml` (if any) and apply process env overrides.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        let path = paths::config_path(home);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file and apply process env overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("LOCAL_REPO_PATH") {
            self.repos_root = PathBuf::from(root);
        }
        if let Some(host) = lookup("GITLAB_URL") {
            self.remote_url = remote_url_for_host(&host);
        }
        if let Some(url) = lookup("PREVIEW_REMOTE_URL") {
            self.remote_url = url;
        }
        if let Some(branch) = lookup("PREVIEW_BRANCH") {
            self.branch = branch;
        }
        if let Some(worker) = lookup("PREVIEW_WORKER") {
            self.worker_program = Some(PathBuf::from(worker));
        }
        parse_env(&lookup, "CONCURRENT_OPERATIONS", &mut self.concurrency)?;
        parse_env(&lookup, "PREVIEW_TASK_TIMEOUT", &mut self.task_timeout_secs)?;
        parse_env(&lookup, "PREVIEW_BUILD_TIMEOUT", &mut self.build_timeout_secs)?;
        parse_env(&lookup, "PREVIEW_COMMAND_TIMEOUT", &mut self.command_timeout_secs)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.install_command.is_empty() {
            return Err(ConfigError::Invalid("install_command is empty".into()));
        }
        if self.generator.command.is_empty() {
            return Err(ConfigError::Invalid("generator.command is empty".into()));
        }
        if !self.remote_url.contains("{owner}") || !self.remote_url.contains("{name}") {
            return Err(ConfigError::Invalid(format!(
                "remote_url {:?} must contain {{owner}} and {{name}}",
                self.remote_url
            )));
        }
        Ok(())
    }

    pub fn remote_url_for(&self, identity: &RepositoryIdentity) -> String {
        self.remote_url
            .replace("{owner}", identity.owner())
            .replace("{name}", identity.name())
    }

    pub fn working_copy(&self, identity: &RepositoryIdentity) -> PathBuf {
        paths::working_copy_path(&self.repos_root, identity)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn parse_env<F, T>(lookup: &F, var: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(var) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}
