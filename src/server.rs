//! Resident daemon: owns the registry, the supervisor loop and the control
//! socket.
use std::{
    fs, io,
    os::unix::net::{UnixListener, UnixStream},
    sync::Arc,
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config,
    definition::Definition,
    error::DaemonError,
    ipc::{self, IpcError, Request, Response},
    monitor::Monitor,
    registry::{DeployOutcome, Registry},
};

/// Errors emitted by the resident daemon runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A registry operation failed during startup.
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    /// The control channel could not be set up.
    #[error(transparent)]
    Control(#[from] IpcError),
    /// Listener I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Long-lived daemon that reacts to client requests over the control socket.
pub struct Server {
    registry: Arc<Registry>,
    monitor: Monitor,
    initial_definitions: Vec<Definition>,
}

impl Server {
    /// Creates a daemon, optionally pre-loading a definitions file whose
    /// services are deployed before the socket starts accepting requests.
    pub fn new(definitions_file: Option<&str>) -> Result<Self, ServerError> {
        let initial_definitions = match definitions_file {
            Some(path) => config::load_validated(Some(path))?,
            None => Vec::new(),
        };

        let registry = Arc::new(Registry::new());
        let monitor = Monitor::new(Arc::clone(&registry));
        Ok(Self {
            registry,
            monitor,
            initial_definitions,
        })
    }

    /// Runs the daemon event loop until a shutdown request arrives.
    ///
    /// Takes the exclusive daemon lock, binds the control socket, deploys any
    /// pre-loaded definitions and then serves requests, one thread per
    /// connection so a slow deploy never blocks status queries.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let _lock = ipc::acquire_daemon_lock()?;

        let socket_path = ipc::socket_path()?;
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;

        self.monitor.start();

        for definition in std::mem::take(&mut self.initial_definitions) {
            let name = definition.name.clone();
            if let Err(err) = self.registry.deploy(definition) {
                warn!("Failed to deploy service '{name}' at startup: {err}");
            }
        }

        info!("convoy daemon listening on {:?}", socket_path);

        let mut shutdown_requested = false;
        while !shutdown_requested {
            match listener.accept() {
                Ok((mut stream, _addr)) => match ipc::read_request(&mut stream) {
                    Ok(Request::Shutdown) => {
                        debug!("Daemon received shutdown request");
                        let _ = ipc::write_response(&mut stream, &Response::ShuttingDown);
                        shutdown_requested = true;
                    }
                    Ok(request) => {
                        debug!("Daemon received request: {request:?}");
                        let registry = Arc::clone(&self.registry);
                        thread::spawn(move || {
                            let response = handle_request(&registry, request);
                            if let Err(err) = ipc::write_response(&mut stream, &response)
                            {
                                warn!("Failed to respond to client: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        warn!("Invalid daemon request: {err}");
                        let _ = ipc::write_response(
                            &mut stream,
                            &Response::Error {
                                kind: crate::error::ErrorKind::Internal,
                                message: err.to_string(),
                            },
                        );
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Daemon listener error: {err}");
                    shutdown_requested = true;
                }
            }
        }

        self.shutdown_runtime();
        Ok(())
    }

    /// Stops all services, halts the supervisor loop and removes the runtime
    /// files. Also used by the signal handler path.
    pub fn shutdown_runtime(&self) {
        info!("Daemon shutting down; stopping all services");
        self.registry.stop_all();
        self.monitor.shutdown();
        ipc::cleanup_runtime();
        thread::sleep(Duration::from_millis(100));
    }

    /// Registry shared with the event loop. Exposed for in-process embedding.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

/// Maps one request to one response, converting registry errors into the
/// protocol's error envelope.
fn handle_request(registry: &Registry, request: Request) -> Response {
    let result = match request {
        Request::Deploy { definition } => Definition::try_from_raw(definition)
            .map_err(DaemonError::from)
            .and_then(|definition| {
                let name = definition.name.clone();
                registry.deploy(definition).map(|outcome| {
                    let pid = match outcome {
                        DeployOutcome::Running { pid } => Some(pid),
                        DeployOutcome::Completed { .. } => None,
                    };
                    let run_count = registry
                        .snapshot(&name)
                        .map(|snap| snap.run_count)
                        .unwrap_or_default();
                    Response::Deployed {
                        name,
                        pid,
                        run_count,
                    }
                })
            }),
        Request::Status { name } => registry.snapshot(&name).map(Response::Status),
        Request::Stop { name } => registry
            .stop(&name)
            .map(|()| Response::Stopped { name }),
        Request::List => Ok(Response::List(registry.list())),
        Request::Shutdown => Ok(Response::ShuttingDown),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            debug!("Request failed: {err}");
            Response::Error {
                kind: err.kind(),
                message: err.to_string(),
            }
        }
    }
}

/// Serves requests on an already-bound listener until a shutdown request.
///
/// Test seam used by the integration suite to run a daemon on an isolated
/// socket without touching the real runtime directory.
pub fn serve_on(listener: UnixListener, registry: Arc<Registry>) {
    loop {
        match listener.accept() {
            Ok((mut stream, _addr)) => match ipc::read_request(&mut stream) {
                Ok(Request::Shutdown) => {
                    let _ = ipc::write_response(&mut stream, &Response::ShuttingDown);
                    break;
                }
                Ok(request) => {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || {
                        let response = handle_request(&registry, request);
                        let _ = ipc::write_response(&mut stream, &response);
                    });
                }
                Err(err) => {
                    let _ = ipc::write_response(
                        &mut stream,
                        &Response::Error {
                            kind: crate::error::ErrorKind::Internal,
                            message: err.to_string(),
                        },
                    );
                }
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    registry.stop_all();
}

/// Client helper mirroring [`ipc::send_request`] against an explicit socket.
/// Test seam only; production clients resolve the socket from the runtime
/// directory.
pub fn request_on(
    socket: &std::path::Path,
    request: &Request,
) -> Result<Response, IpcError> {
    use std::io::{BufRead, BufReader, Write};

    let mut stream = UnixStream::connect(socket)?;
    let payload = serde_json::to_vec(request)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let response: Response = serde_json::from_str(line.trim())?;
    if let Response::Error { kind, message } = response {
        return Err(IpcError::Server { kind, message });
    }
    Ok(response)
}
