//! # preview-generator
//!
//! Everything that happens on the far side of the isolation boundary:
//!
//! - [`protocol`]: the one-request / one-response message exchange between
//!   the orchestrator and a worker process
//! - [`invoke`]: running the external site generator and reading its page list
//! - [`env`]: `.env` / `preview.env` loading with `${VAR}` expansion
//! - [`worker`]: the worker entry point ([`worker::serve`])

pub mod env;
pub mod error;
pub mod invoke;
pub mod protocol;
pub mod worker;

pub use error::GeneratorError;
pub use invoke::GeneratedPage;
pub use protocol::{WorkerMessage, WorkerRequest, WorkerResponse, MESSAGE_PREFIX};
