//! Domain types shared by the orchestrator, the sync coordinator and the worker.
//!
//! All working-copy locations use `PathBuf`; template paths and permalinks are
//! URL-like strings and stay `String`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::permalink;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// `(owner, name)` pair identifying one working copy and its cache entries.
///
/// Both parts are validated on construction so they can be joined onto a
/// filesystem root without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    owner: String,
    name: String,
}

impl RepositoryIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, InputError> {
        let owner = owner.into();
        let name = name.into();
        validate_segment("owner", &owner)?;
        validate_segment("name", &name)?;
        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), InputError> {
    if value.trim().is_empty() {
        return Err(InputError::Missing(field));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(InputError::Invalid {
            field,
            reason: format!("{value:?} is not a single path segment"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One page the generator can produce: output url and the template behind it.
///
/// `url` keeps the generator's original form; lookups go through
/// [`PageDescriptor::normalized_url`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub url: String,
    pub template_path: String,
}

impl PageDescriptor {
    /// Build a descriptor from generator output, dropping the leading `.`
    /// the generator puts in front of relative input paths.
    pub fn from_generated(url: impl Into<String>, input_path: &str) -> Self {
        Self {
            url: url.into(),
            template_path: input_path.strip_prefix('.').unwrap_or(input_path).to_string(),
        }
    }

    pub fn normalized_url(&self) -> &str {
        permalink::normalize(&self.url)
    }
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

/// Build request as produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub owner: String,
    pub name: String,
    pub permalink: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    /// Defaults to the working copy derived from the identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_copy: Option<PathBuf>,
}

/// A build admitted for execution. Immutable once submitted.
///
/// `permalink == None` together with any template means "list every page".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTask {
    pub identity: RepositoryIdentity,
    pub working_copy: PathBuf,
    pub template_path: Option<String>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub extra_variables: BTreeMap<String, String>,
}

impl BuildTask {
    /// Discovery task: run the generator over the whole working copy (or a
    /// single template) and return every page it produces.
    pub fn list(
        identity: RepositoryIdentity,
        working_copy: PathBuf,
        template_path: Option<String>,
    ) -> Self {
        Self {
            identity,
            working_copy,
            template_path,
            permalink: None,
            extra_variables: BTreeMap::new(),
        }
    }

    pub fn is_list(&self) -> bool {
        self.permalink.is_none()
    }
}

/// Diagnostic output captured from a worker, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedLogs {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedLogs {
    pub fn display_stdout(&self) -> String {
        display_lines(&self.stdout)
    }

    pub fn display_stderr(&self) -> String {
        display_lines(&self.stderr)
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Separator substituted for newlines embedded inside a single captured line.
pub const EMBEDDED_NEWLINE: &str = " \u{23ce} ";

fn display_lines(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| {
            line.replace("\r\n", "\n")
                .replace('\r', "\n")
                .trim_end_matches('\n')
                .replace('\n', EMBEDDED_NEWLINE)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildResult {
    Success {
        content: String,
    },
    PageList {
        pages: Vec<PageDescriptor>,
    },
    Failure {
        status: u16,
        error: String,
        #[serde(default)]
        logs: CapturedLogs,
    },
}

impl BuildResult {
    pub fn status(&self) -> u16 {
        match self {
            BuildResult::Success { .. } | BuildResult::PageList { .. } => 200,
            BuildResult::Failure { status, .. } => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, BuildResult::Failure { .. })
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Sync trigger as produced by the webhook layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTrigger {
    pub owner: String,
    pub name: String,
    /// Directory (relative to the working copy) whose `*.html` templates are
    /// rediscovered once the sync succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover: Option<String>,
}

impl SyncTrigger {
    pub fn identity(&self) -> Result<RepositoryIdentity, InputError> {
        RepositoryIdentity::new(self.owner.clone(), self.name.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
