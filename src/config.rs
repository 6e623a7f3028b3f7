//! Loading of service definitions files.
//!
//! A definitions file is a multi-document YAML stream, one `kind: Service`
//! document per service. Parsing produces raw documents; validation into
//! [`Definition`]s happens in the daemon so the client and daemon agree on a
//! single contract.
use std::{env, fs, path::Path};

use regex::Regex;
use serde::Deserialize;

use crate::{
    definition::{Definition, RawDefinition},
    error::DaemonError,
};

/// Default definitions file names probed in the working directory.
pub const DEFAULT_FILE_NAMES: [&str; 2] = ["convoy.yaml", "services.yaml"];

/// Expands `$VAR` / `${VAR}` references against the current process
/// environment. Unknown variables are left untouched so shim commands with
/// deferred expansion survive the round trip.
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").unwrap();
    re.replace_all(input, |caps: &regex::Captures| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => caps[0].to_string(),
    })
    .to_string()
}

/// Parses a multi-document YAML string into raw definitions.
pub fn parse_definitions(content: &str) -> Result<Vec<RawDefinition>, DaemonError> {
    let expanded = expand_env_vars(content);

    let mut raw_definitions = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&expanded) {
        raw_definitions.push(RawDefinition::deserialize(document)?);
    }

    Ok(raw_definitions)
}

/// Loads and parses a definitions file, expanding environment variables.
pub fn load_definitions(path: Option<&str>) -> Result<Vec<RawDefinition>, DaemonError> {
    let path = path.map(Path::new).unwrap_or_else(|| {
        if Path::new(DEFAULT_FILE_NAMES[0]).exists() {
            Path::new(DEFAULT_FILE_NAMES[0])
        } else {
            Path::new(DEFAULT_FILE_NAMES[1])
        }
    });

    let content = fs::read_to_string(path).map_err(|e| {
        DaemonError::DefinitionsRead(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    parse_definitions(&content)
}

/// Loads a definitions file and validates every document, returning the
/// definitions keyed in file order.
pub fn load_validated(path: Option<&str>) -> Result<Vec<Definition>, DaemonError> {
    load_definitions(path)?
        .into_iter()
        .map(|raw| Definition::try_from_raw(raw).map_err(DaemonError::from))
        .collect()
}
