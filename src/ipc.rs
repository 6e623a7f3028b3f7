//! Client/daemon control channel.
//!
//! Requests and responses are single-line JSON messages over a Unix domain
//! socket under `$HOME/.local/share/convoy`. The daemon PID file in the same
//! directory doubles as a liveness lock: the daemon holds an exclusive
//! advisory lock on it for its whole lifetime, so a stale file left by a
//! crashed daemon never blocks a new one.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::PathBuf,
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{definition::RawDefinition, error::ErrorKind, registry::ServiceSnapshot};

/// Directory under `$HOME` where runtime artifacts (PID/socket files) live.
pub fn runtime_dir() -> Result<PathBuf, IpcError> {
    let home = std::env::var("HOME").map_err(|_| IpcError::MissingHome)?;
    let path = PathBuf::from(home).join(".local/share/convoy");
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Unix socket the daemon listens on.
pub fn socket_path() -> Result<PathBuf, IpcError> {
    Ok(runtime_dir()?.join("control.sock"))
}

/// File recording the daemon PID.
pub fn daemon_pid_path() -> Result<PathBuf, IpcError> {
    Ok(runtime_dir()?.join("convoyd.pid"))
}

/// Message sent from a client invocation to the resident daemon.
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    /// Deploy (or redeploy) a single service definition.
    Deploy {
        /// Unvalidated definition document; the daemon validates it.
        definition: RawDefinition,
    },
    /// Fetch the record of one service.
    Status {
        /// Service name.
        name: String,
    },
    /// Stop one service.
    Stop {
        /// Service name.
        name: String,
    },
    /// List all known services.
    List,
    /// Stop all services and exit the daemon.
    Shutdown,
}

/// Response sent by the daemon.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// Deploy accepted; `pid` is present while the process is supervised and
    /// absent when a one-shot service already completed.
    Deployed {
        /// Service name.
        name: String,
        /// PID of the supervised process, if still running.
        pid: Option<u32>,
        /// Successful launches recorded for this name.
        run_count: u32,
    },
    /// Current record of the requested service.
    Status(ServiceSnapshot),
    /// The service was stopped.
    Stopped {
        /// Service name.
        name: String,
    },
    /// Records of all known services, ordered by name.
    List(Vec<ServiceSnapshot>),
    /// The daemon acknowledged a shutdown request.
    ShuttingDown,
    /// The request failed.
    Error {
        /// Machine-readable category.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

/// Errors raised by the control channel helpers.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Socket or file I/O failed.
    #[error("control socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("failed to serialise control message: {0}")]
    Serde(#[from] serde_json::Error),

    /// `$HOME` is not set, so the runtime directory cannot be resolved.
    #[error("HOME environment variable not set")]
    MissingHome,

    /// The daemon returned an error response.
    #[error("daemon reported {} error: {message}", .kind.as_ref())]
    Server {
        /// Machine-readable category from the daemon.
        kind: ErrorKind,
        /// Daemon-provided description.
        message: String,
    },

    /// No daemon is listening on the control socket.
    #[error("daemon not available; is `convoy daemon` running?")]
    NotAvailable,

    /// Another daemon instance already holds the PID lock.
    #[error("another daemon instance is already running")]
    AlreadyRunning,
}

/// Sends a request to the daemon and waits for its response.
///
/// Daemon-side failures come back as [`IpcError::Server`] so callers handle
/// transport and application errors through one type.
pub fn send_request(request: &Request) -> Result<Response, IpcError> {
    let path = socket_path()?;
    if !path.exists() {
        return Err(IpcError::NotAvailable);
    }

    let mut stream = UnixStream::connect(path).map_err(|err| {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            IpcError::NotAvailable
        } else {
            IpcError::Io(err)
        }
    })?;
    let payload = serde_json::to_vec(request)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    if response_line.trim().is_empty() {
        return Err(IpcError::NotAvailable);
    }

    let response: Response = serde_json::from_str(response_line.trim())?;
    if let Response::Error { kind, message } = response {
        return Err(IpcError::Server { kind, message });
    }

    Ok(response)
}

/// Reads one request from a connected client. Used by the daemon event loop.
pub fn read_request(stream: &mut UnixStream) -> Result<Request, IpcError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    if line.trim().is_empty() {
        return Err(IpcError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty control request",
        )));
    }

    Ok(serde_json::from_str(line.trim())?)
}

/// Writes one response back to a connected client.
pub fn write_response(stream: &mut UnixStream, response: &Response) -> Result<(), IpcError> {
    let payload = serde_json::to_vec(response)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Records the daemon PID and takes the exclusive daemon lock.
///
/// The returned file must stay open for the daemon's lifetime; dropping it
/// releases the lock.
pub fn acquire_daemon_lock() -> Result<File, IpcError> {
    let path = daemon_pid_path()?;
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    file.try_lock_exclusive()
        .map_err(|_| IpcError::AlreadyRunning)?;

    file.set_len(0)?;
    let mut writer = &file;
    writer.write_all(std::process::id().to_string().as_bytes())?;
    writer.flush()?;
    Ok(file)
}

/// Reads the daemon PID if one has been recorded.
pub fn read_daemon_pid() -> Result<Option<libc::pid_t>, IpcError> {
    let path = daemon_pid_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    contents
        .trim()
        .parse::<libc::pid_t>()
        .map(Some)
        .map_err(|e| IpcError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Removes the socket and PID files. Called on daemon exit.
pub fn cleanup_runtime() {
    if let Ok(path) = socket_path()
        && path.exists()
    {
        let _ = fs::remove_file(path);
    }

    if let Ok(pid_path) = daemon_pid_path()
        && pid_path.exists()
    {
        let _ = fs::remove_file(pid_path);
    }
}
