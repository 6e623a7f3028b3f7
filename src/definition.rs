//! Validated, in-memory representation of a deployable service.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How the service's process is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecSpec {
    /// Argv-style invocation with no shell interpretation.
    Command(Vec<String>),
    /// A string evaluated by `sh -c`, allowing pipes and expansion.
    Shell(String),
}

impl ExecSpec {
    /// Short human-readable rendering used in status output.
    pub fn display(&self) -> String {
        match self {
            ExecSpec::Command(argv) => argv.join(" "),
            ExecSpec::Shell(line) => line.clone(),
        }
    }
}

/// The `command` field as it appears in a definitions document: either a
/// ready-made argv sequence or a single line that is split on whitespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandField {
    /// `command: ["redis-server", "--port", "6700"]`
    Argv(Vec<String>),
    /// `command: redis-server --port 6700`
    Line(String),
}

impl CommandField {
    fn into_argv(self) -> Vec<String> {
        match self {
            CommandField::Argv(argv) => argv,
            CommandField::Line(line) => {
                line.split_whitespace().map(str::to_string).collect()
            }
        }
    }
}

/// A single unvalidated document from a definitions file. Field shape follows
/// the wire format; [`Definition::try_from_raw`] enforces the contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDefinition {
    /// Document kind; only `Service` is currently supported.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Unique service name.
    #[serde(default)]
    pub name: String,
    /// Argv-style invocation. Mutually exclusive with `shell`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandField>,
    /// Shell line evaluated through `sh -c`. Mutually exclusive with `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Environment variables overlaid on the daemon's own environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Working directory for the spawned process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// File that receives the process's stdout and stderr, appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,
}

fn default_kind() -> String {
    "Service".to_string()
}

/// A validated service definition, immutable once accepted for a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique key within the registry.
    pub name: String,
    /// Exactly one execution directive.
    pub exec: ExecSpec,
    /// Environment overlay; definition keys win over inherited ones.
    pub environment: HashMap<String, String>,
    /// Optional working directory; daemon's own when absent.
    pub working_dir: Option<String>,
    /// Optional log redirection target for both stdout and stderr.
    pub log_file_path: Option<String>,
}

impl Definition {
    /// Validates a raw document into a [`Definition`].
    ///
    /// Rejects documents with a missing name, an unsupported kind, neither or
    /// both of `command`/`shell`, or an empty argv.
    pub fn try_from_raw(raw: RawDefinition) -> Result<Self, ValidationError> {
        if raw.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }

        if raw.kind != "Service" {
            return Err(ValidationError::UnsupportedKind {
                name: raw.name,
                kind: raw.kind,
            });
        }

        let exec = match (raw.command, raw.shell) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::AmbiguousExecDirective(raw.name));
            }
            (None, None) => return Err(ValidationError::NoExecDirective(raw.name)),
            (Some(command), None) => {
                let argv = command.into_argv();
                if argv.is_empty() || argv[0].trim().is_empty() {
                    return Err(ValidationError::EmptyCommand(raw.name));
                }
                ExecSpec::Command(argv)
            }
            (None, Some(shell)) => {
                if shell.trim().is_empty() {
                    return Err(ValidationError::MissingField("shell"));
                }
                ExecSpec::Shell(shell)
            }
        };

        Ok(Definition {
            name: raw.name,
            exec,
            environment: raw.environment,
            working_dir: raw.working_dir,
            log_file_path: raw.log_file_path,
        })
    }
}
