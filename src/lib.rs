//! Convoy is a lightweight service deployment daemon for Unix-like operating
//! systems. A resident daemon accepts service definitions over a control
//! socket, launches one OS process per service with a declared environment,
//! working directory and log file, tracks each service's lifecycle state, and
//! reports it back to client invocations.

/// CLI interface.
pub mod cli;

/// Definitions file loading.
pub mod config;

/// Validated service definitions.
pub mod definition;

/// Error handling.
pub mod error;

/// IPC helpers for communicating with the resident daemon.
pub mod ipc;

/// Process launching and termination.
pub mod launcher;

/// Log file reading.
pub mod logs;

/// Background supervision of running services.
pub mod monitor;

/// Service state registry.
pub mod registry;

/// Daemon runtime that serves the control socket.
pub mod server;

/// Rendering of service state for display.
pub mod status;

/// Shared helpers for unit and integration tests.
#[doc(hidden)]
pub mod test_utils;
