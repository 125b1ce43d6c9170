//! Worker Process Manager.
//!
//! Every build runs in a fresh isolated unit (by default a child process of
//! `preview worker`). The manager waits for the unit's ready message, sends
//! exactly one request, accepts exactly one response and then terminates the
//! unit, whichever way the exchange ended.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use preview_core::{BuildResult, BuildTask, CapturedLogs, GeneratorConfig, PreviewConfig};
use preview_generator::protocol::{self, WorkerMessage, WorkerRequest, WorkerResponse};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{io_err, DaemonError};

/// How long to keep draining output pipes after the unit is gone. A
/// grandchild that inherited the pipes must not hold the caller hostage.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("missing required build parameter: {0}")]
    MissingParameters(&'static str),

    #[error("worker protocol violation: {message}")]
    ProtocolViolation { message: String, logs: CapturedLogs },

    #[error("worker exited with status {} before responding", display_code(.code))]
    WorkerExit {
        code: Option<i32>,
        logs: CapturedLogs,
    },

    #[error("failed to start worker `{program}`: {source}")]
    WorkerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker did not respond within {secs}s")]
    Timeout { secs: u64, logs: CapturedLogs },
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

/// One thing a unit can report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Message(WorkerMessage),
    /// A protocol-framed line that did not decode.
    Malformed(String),
    /// The unit finished without (further) messages.
    Exited(Option<i32>),
}

/// An isolated, killable execution unit speaking the worker protocol.
pub trait IsolatedUnit: Send {
    /// Deliver the single request.
    fn send(
        &mut self,
        request: &WorkerRequest,
    ) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Next event from the unit.
    fn receive(&mut self) -> impl Future<Output = UnitEvent> + Send;

    /// Stop the unit if it is still running and hand back what it logged.
    fn terminate(&mut self) -> impl Future<Output = CapturedLogs> + Send;
}

/// Starts fresh units.
pub trait UnitLauncher: Send + Sync + 'static {
    type Unit: IsolatedUnit;

    fn start(&self) -> Result<Self::Unit, WorkerError>;
}

// ---------------------------------------------------------------------------
// Child-process units
// ---------------------------------------------------------------------------

/// Launches `program args…` as a child process per build.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `<worker_program> worker`, defaulting to the running executable.
    pub fn from_config(config: &PreviewConfig) -> Result<Self, DaemonError> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| io_err("current executable", e))?,
        };
        Ok(Self::new(program, vec!["worker".to_string()]))
    }
}

impl UnitLauncher for ProcessLauncher {
    type Unit = ProcessUnit;

    fn start(&self) -> Result<ProcessUnit, WorkerError> {
        let spawn_err = |source| WorkerError::WorkerSpawn {
            program: self.program.display().to_string(),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let missing = || spawn_err(std::io::Error::other("child stdio was not piped"));
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let logs = Arc::new(Mutex::new(CapturedLogs::default()));
        let (events_tx, events) = mpsc::unbounded_channel();

        let stdout_reader = {
            let logs = logs.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let event = match protocol::decode(&line) {
                        None => {
                            record(&logs, |l| l.stdout.push(line));
                            continue;
                        }
                        Some(Ok(message)) => UnitEvent::Message(message),
                        Some(Err(_)) => UnitEvent::Malformed(line),
                    };
                    if events_tx.send(event).is_err() {
                        break;
                    }
                }
            })
        };
        let stderr_reader = {
            let logs = logs.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    record(&logs, |l| l.stderr.push(line));
                }
            })
        };

        tracing::debug!(pid = ?child.id(), program = %self.program.display(), "worker started");
        Ok(ProcessUnit {
            child,
            stdin: Some(stdin),
            events,
            logs,
            readers: vec![stdout_reader, stderr_reader],
            terminated: false,
        })
    }
}

fn record(logs: &Mutex<CapturedLogs>, f: impl FnOnce(&mut CapturedLogs)) {
    f(&mut logs.lock().unwrap_or_else(PoisonError::into_inner));
}

/// A running worker child process.
pub struct ProcessUnit {
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<UnitEvent>,
    logs: Arc<Mutex<CapturedLogs>>,
    readers: Vec<JoinHandle<()>>,
    terminated: bool,
}

impl ProcessUnit {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl IsolatedUnit for ProcessUnit {
    async fn send(&mut self, request: &WorkerRequest) -> std::io::Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let Some(mut stdin) = self.stdin.take() else {
            return Err(std::io::Error::other("request already sent"));
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
        // stdin is dropped here so the worker sees EOF after the request
    }

    async fn receive(&mut self) -> UnitEvent {
        if let Some(event) = self.events.recv().await {
            return event;
        }
        // stdout closed: whatever comes next is the exit
        match self.child.wait().await {
            Ok(status) => UnitEvent::Exited(status.code()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to wait for worker");
                UnitEvent::Exited(None)
            }
        }
    }

    async fn terminate(&mut self) -> CapturedLogs {
        if !self.terminated {
            self.terminated = true;
            self.stdin = None;
            match self.child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    if let Err(err) = self.child.kill().await {
                        tracing::warn!(error = %err, "failed to kill worker");
                    }
                }
            }
            for reader in self.readers.drain(..) {
                let abort = reader.abort_handle();
                if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                    abort.abort();
                }
            }
        }
        std::mem::take(&mut *self.logs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct WorkerManager<L> {
    launcher: L,
    generator: GeneratorConfig,
    timeout: Duration,
}

/// How the exchange ended before the unit was terminated.
enum Exchange {
    Responded(WorkerResponse),
    Violation(String),
    Exited(Option<i32>),
}

impl<L: UnitLauncher> WorkerManager<L> {
    pub fn new(launcher: L, generator: GeneratorConfig, timeout: Duration) -> Self {
        Self {
            launcher,
            generator,
            timeout,
        }
    }

    /// Run one build in a fresh unit and always terminate it afterwards.
    pub async fn run(&self, task: BuildTask) -> Result<BuildResult, WorkerError> {
        if task.working_copy.as_os_str().is_empty() {
            return Err(WorkerError::MissingParameters("working copy"));
        }
        if task.permalink.is_some() && task.template_path.is_none() {
            return Err(WorkerError::MissingParameters("template path"));
        }

        let request = WorkerRequest {
            task,
            generator: self.generator.clone(),
        };
        let mut unit = self.launcher.start()?;
        let exchanged = tokio::time::timeout(self.timeout, exchange(&mut unit, &request)).await;
        let logs = unit.terminate().await;

        match exchanged {
            Err(_) => {
                tracing::warn!(
                    repo = %request.task.identity,
                    secs = self.timeout.as_secs(),
                    "worker timed out"
                );
                Err(WorkerError::Timeout {
                    secs: self.timeout.as_secs(),
                    logs,
                })
            }
            Ok(Exchange::Exited(code)) => Err(WorkerError::WorkerExit { code, logs }),
            Ok(Exchange::Violation(message)) => Err(WorkerError::ProtocolViolation { message, logs }),
            Ok(Exchange::Responded(response)) => {
                response.into_result(logs.clone()).map_err(|rejected| {
                    WorkerError::ProtocolViolation {
                        message: format!(
                            "response with status {} does not carry exactly one of content, pages or error",
                            rejected.status
                        ),
                        logs,
                    }
                })
            }
        }
    }
}

async fn exchange<U: IsolatedUnit>(unit: &mut U, request: &WorkerRequest) -> Exchange {
    match unit.receive().await {
        UnitEvent::Message(WorkerMessage::Ready) => {}
        UnitEvent::Message(WorkerMessage::Response(_)) => {
            return Exchange::Violation("response received before request".into())
        }
        UnitEvent::Malformed(line) => return Exchange::Violation(format!("unrecognized message: {line}")),
        UnitEvent::Exited(code) => return Exchange::Exited(code),
    }

    if let Err(err) = unit.send(request).await {
        // the unit most likely died; its exit status is the better report
        tracing::debug!(error = %err, "failed to deliver worker request");
    }

    match unit.receive().await {
        UnitEvent::Message(WorkerMessage::Response(response)) => Exchange::Responded(response),
        UnitEvent::Message(WorkerMessage::Ready) => Exchange::Violation("duplicate ready message".into()),
        UnitEvent::Malformed(line) => Exchange::Violation(format!("unrecognized message: {line}")),
        UnitEvent::Exited(code) => Exchange::Exited(code),
    }
}
