use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use preview_core::paths::{preview_root, socket_path};
use preview_core::PreviewConfig;
use preview_sync::WorkingCopySync;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{io_err, DaemonError};
use crate::orchestrator::{BuildOrchestrator, BuildResponse};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::worker::UnitLauncher;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: PreviewConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async {
        let preview = BuildOrchestrator::from_config(config)?;
        run(home.to_path_buf(), preview).await
    })
}

/// Serve `preview` on the daemon socket under `home` until stopped.
pub async fn run<L, S>(home: PathBuf, preview: BuildOrchestrator<L, S>) -> Result<(), DaemonError>
where
    L: UnitLauncher,
    S: WorkingCopySync,
{
    let root = preview_root(&home);
    fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    tracing::info!(
        repos_root = %preview.config().repos_root.display(),
        concurrency = preview.config().concurrency,
        "preview daemon starting"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let socket = socket_path(&home);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(socket, preview, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("preview daemon stopped");
    Ok(())
}

async fn socket_server_task<L, S>(
    socket: PathBuf,
    preview: BuildOrchestrator<L, S>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    L: UnitLauncher,
    S: WorkingCopySync,
{
    claim_socket(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let preview = preview.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, preview, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client<L, S>(
    stream: UnixStream,
    preview: BuildOrchestrator<L, S>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError>
where
    L: UnitLauncher,
    S: WorkingCopySync,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = handle_request(&preview, request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

pub(crate) async fn handle_request<L, S>(
    preview: &BuildOrchestrator<L, S>,
    request: DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse
where
    L: UnitLauncher,
    S: WorkingCopySync,
{
    let encoded = match request.cmd.as_str() {
        "status" => build_status_payload(preview),
        "build" => match request.build_request() {
            Ok(build) => {
                let outcome = preview.build(build).await;
                serde_json::to_value(BuildResponse::from_outcome(outcome))
            }
            Err(err) => return DaemonResponse::error(err.to_string()),
        },
        "sync" => {
            let trigger = match request.sync_trigger() {
                Ok(trigger) => trigger,
                Err(err) => return DaemonResponse::error(err.to_string()),
            };
            match preview.sync(trigger, request.wait).await {
                Ok(ack) => serde_json::to_value(ack),
                Err(err) => return DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    match encoded {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(format!("failed to encode response: {err}")),
    }
}

fn build_status_payload<L, S>(preview: &BuildOrchestrator<L, S>) -> serde_json::Result<Value>
where
    L: UnitLauncher,
    S: WorkingCopySync,
{
    let mut payload = serde_json::to_value(preview.status())?;
    if let Value::Object(map) = &mut payload {
        map.insert("running".into(), json!(true));
        map.insert("pid".into(), json!(std::process::id()));
        map.insert(
            "repos_root".into(),
            json!(preview.config().repos_root.display().to_string()),
        );
    }
    Ok(payload)
}

fn claim_socket(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "replacing stale daemon socket",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the daemon's tracing subscriber: `RUST_LOG` filter (default
/// `info`), JSON lines when `PREVIEW_LOG_FORMAT=json`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PREVIEW_LOG_FORMAT").is_ok_and(|format| format == "json");
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
