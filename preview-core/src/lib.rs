//! Preview core library: domain types, configuration, filesystem layout, errors.
//!
//! - [`types`]: repository identity, page descriptors, build/sync requests and results
//! - [`permalink`]: permalink normalization and embedded variable extraction
//! - [`config`]: [`PreviewConfig`] loading (YAML file + environment overrides)
//! - [`paths`]: deterministic on-disk locations
//! - [`error`]: [`ConfigError`], [`InputError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod permalink;
pub mod types;

pub use config::{GeneratorConfig, PreviewConfig};
pub use error::{ConfigError, InputError};
pub use types::{
    BuildRequest, BuildResult, BuildTask, CapturedLogs, PageDescriptor, RepositoryIdentity,
    SyncTrigger,
};
