//! The per-job context bundle handed to the remote task through the secret
//! broker: command, timeout, short-lived credentials, and the service's
//! configuration files, serialized as JSON and base64 encoded so the secret
//! store never has to interpret nested structures.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Everything the remote wrapper needs to execute one bake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    /// The bake command as one shell line.
    pub job_command: String,
    /// Timeout handed to the wrapper, e.g. `30m`.
    pub command_timeout: String,
    /// Environment variables carrying the assumed-role credentials.
    pub credentials: BTreeMap<String, String>,
    /// Where the wrapper materializes the configuration files.
    pub config_dir: String,
    /// Filename → contents of the service configuration directory.
    pub config_files: BTreeMap<String, String>,
}

impl JobContext {
    /// Encode the context to its wire form (JSON → base64).
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Decode a wire-form context.
    pub fn decode(encoded: &str) -> Result<Self> {
        let json = STANDARD
            .decode(encoded)
            .map_err(|e| Error::configuration(format!("invalid job context encoding: {e}")))?;
        Ok(serde_json::from_slice(&json)?)
    }
}
