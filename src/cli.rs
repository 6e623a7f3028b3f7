//! Command-line interface for Convoy.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for Convoy.
#[derive(Parser)]
#[command(name = "convoy", version, author)]
#[command(about = "A service deployment daemon", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for convoy.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the resident daemon, optionally deploying a definitions file.
    Daemon {
        /// Path to a definitions file deployed at startup.
        #[arg(short, long)]
        file: Option<String>,

        /// Detach from the terminal and run in the background.
        #[arg(long)]
        daemonize: bool,
    },

    /// Deploy services from a definitions file to the running daemon.
    Deploy {
        /// Path to the definitions file (defaults to `convoy.yaml`).
        #[arg(short, long)]
        file: Option<String>,

        /// Deploy only the named services; all documents when empty.
        names: Vec<String>,
    },

    /// Show a table of all known services.
    Ps,

    /// Show the detailed record of one service.
    Status {
        /// Service name.
        name: String,
    },

    /// Stop one or more services.
    Stop {
        /// Names of the services to stop.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show the last lines of a service's log file.
    Logs {
        /// Service name.
        name: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Stop all services and shut the daemon down.
    Shutdown,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
