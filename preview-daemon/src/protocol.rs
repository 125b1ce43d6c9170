use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use preview_core::{paths::socket_path, BuildRequest, InputError, SyncTrigger};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::orchestrator::BuildResponse;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_copy: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait: bool,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }

    pub fn build(request: &BuildRequest) -> Self {
        Self {
            owner: Some(request.owner.clone()),
            name: Some(request.name.clone()),
            permalink: Some(request.permalink.clone()),
            template: request.template_path.clone(),
            working_copy: request.working_copy.clone(),
            ..Self::command("build")
        }
    }

    pub fn sync(trigger: &SyncTrigger, wait: bool) -> Self {
        Self {
            owner: Some(trigger.owner.clone()),
            name: Some(trigger.name.clone()),
            discover: trigger.discover.clone(),
            wait,
            ..Self::command("sync")
        }
    }

    pub fn build_request(&self) -> Result<BuildRequest, InputError> {
        Ok(BuildRequest {
            owner: required(&self.owner, "owner")?,
            name: required(&self.name, "name")?,
            permalink: required(&self.permalink, "permalink")?,
            template_path: self.template.clone(),
            working_copy: self.working_copy.clone(),
        })
    }

    pub fn sync_trigger(&self) -> Result<SyncTrigger, InputError> {
        Ok(SyncTrigger {
            owner: required(&self.owner, "owner")?,
            name: required(&self.name, "name")?,
            discover: self.discover.clone(),
        })
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, InputError> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or(InputError::Missing(field))
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket)?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    use std::io::ErrorKind;

    UnixStream::connect(socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        }
        _ => io_err(socket, err),
    })
}

/// Status payload, retrying briefly while a just-started daemon binds.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    const ATTEMPTS: u32 = 5;

    let request = DaemonRequest::command("status");
    let mut attempt = 1;
    loop {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < ATTEMPTS => {
                attempt += 1;
                sleep(Duration::from_millis(100));
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn request_build(home: &Path, request: &BuildRequest) -> Result<BuildResponse, DaemonError> {
    let response = send_request(home, &DaemonRequest::build(request))?;
    Ok(serde_json::from_value(response_into_data(response)?)?)
}

pub fn request_sync(home: &Path, trigger: &SyncTrigger, wait: bool) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::sync(trigger, wait))?;
    response_into_data(response)
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
