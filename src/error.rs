//! Error handling for convoy.
use thiserror::Error;

/// Raised while validating a parsed service definition, before any process
/// touches the operating system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("definition is missing required field '{0}'")]
    MissingField(&'static str),

    /// Neither `command` nor `shell` was provided.
    #[error("service '{0}' must declare either 'command' or 'shell'")]
    NoExecDirective(String),

    /// Both `command` and `shell` were provided.
    #[error(
        "service '{0}' declares both 'command' and 'shell'; they are mutually exclusive"
    )]
    AmbiguousExecDirective(String),

    /// The `command` field was present but contained no argv entries.
    #[error("service '{0}' declares an empty 'command'")]
    EmptyCommand(String),

    /// An unsupported document kind was encountered.
    #[error("unsupported definition kind '{kind}' for '{name}'")]
    UnsupportedKind {
        /// Name of the offending document.
        name: String,
        /// The declared kind.
        kind: String,
    },
}

/// Raised when the OS-level launch of a service process fails. Spawn is
/// all-or-nothing: none of these leave a partially started process behind.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The requested working directory does not exist or is not a directory.
    #[error("working directory '{path}' for service '{service}' is not usable")]
    WorkingDirUnavailable {
        /// The service being launched.
        service: String,
        /// The configured working directory.
        path: String,
    },

    /// The log file could not be opened for appending.
    #[error("failed to open log file '{path}' for service '{service}': {source}")]
    LogFileUnavailable {
        /// The service being launched.
        service: String,
        /// The configured log file path.
        path: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The executable could not be started.
    #[error("failed to start service '{service}': {source}")]
    StartFailed {
        /// The service being launched.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The process exited with a failure status before it was confirmed running.
    #[error("service '{service}' exited during startup: {reason}")]
    ExitedDuringStartup {
        /// The service being launched.
        service: String,
        /// Human-readable exit description.
        reason: String,
    },
}

/// Top-level error for daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A definition was rejected before launch.
    #[error("invalid definition: {0}")]
    Validation(#[from] ValidationError),

    /// A launch failed at the OS boundary.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// An operation referenced an unknown service name.
    #[error("service '{0}' not found")]
    NotFound(String),

    /// Error stopping a service process.
    #[error("failed to stop service '{service}': {source}")]
    StopFailed {
        /// The service name that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error reading or accessing a definitions file.
    #[error("failed to read definitions file: {0}")]
    DefinitionsRead(#[from] std::io::Error),

    /// Error parsing YAML definitions.
    #[error("invalid YAML definitions: {0}")]
    DefinitionsParse(#[from] serde_yaml::Error),

    /// Error for poisoned mutex.
    #[error("mutex is poisoned: {0}")]
    MutexPoison(String),
}

impl<T> From<std::sync::PoisonError<T>> for DaemonError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DaemonError::MutexPoison(err.to_string())
    }
}

/// Machine-readable error category carried across the client/daemon protocol.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Definition rejected before launch.
    Validation,
    /// OS-level launch failure.
    Spawn,
    /// Unknown service name.
    NotFound,
    /// Anything else (IO, serialization, poisoned locks).
    Internal,
}

impl DaemonError {
    /// Protocol-level category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::Validation(_) => ErrorKind::Validation,
            DaemonError::Spawn(_) => ErrorKind::Spawn,
            DaemonError::NotFound(_) => ErrorKind::NotFound,
            DaemonError::StopFailed { .. }
            | DaemonError::DefinitionsRead(_)
            | DaemonError::DefinitionsParse(_)
            | DaemonError::MutexPoison(_) => ErrorKind::Internal,
        }
    }
}
