//! Preview daemon: task queue, worker process manager, discovery cache and
//! build orchestrator, served over a Unix socket.

pub mod discovery;
mod error;
pub mod orchestrator;
pub mod protocol;
pub mod queue;
mod runtime;
pub mod worker;

pub use discovery::{CacheSummary, DiscoveryCache, PageSource};
pub use error::{DaemonError, PreviewError};
pub use orchestrator::{BuildOrchestrator, BuildResponse, StatusSnapshot, SyncAck};
pub use protocol::{
    request_build, request_status, request_stop, request_sync, send_request, DaemonRequest,
    DaemonResponse,
};
pub use queue::{QueueError, QueueStats, TaskQueue};
pub use runtime::{init_tracing, run, start_blocking};
pub use worker::{
    IsolatedUnit, ProcessLauncher, ProcessUnit, UnitEvent, UnitLauncher, WorkerError,
    WorkerManager,
};
