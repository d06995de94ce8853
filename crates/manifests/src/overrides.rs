//! Override-map encoding shared by the helm-family builders.
//!
//! A flat map of string keys to arbitrary JSON values serializes to
//! `key=value,key=value`. Two encodings exist because the renderer treats
//! numeric-looking literals differently in each mode: "raw" embeds values
//! untouched (`--set`), "string-typed" coerces them to strings first
//! (`--set-string`). Payloads at or above the configured byte threshold are
//! written to a generated values file instead, to stay clear of
//! command-line length limits.

use std::collections::BTreeMap;

use kiln_core::Result;
use serde_json::Value;
use uuid::Uuid;

use crate::env::StagingEnvironment;

const OVERRIDES_FILE_PREFIX: &str = "overrides_";
const YML_FILE_EXTENSION: &str = ".yml";

/// Serialize overrides to the renderer's `key=value,key=value` form.
#[must_use]
pub fn overrides_as_string(overrides: &BTreeMap<String, Value>) -> String {
    overrides
        .iter()
        .map(|(key, value)| format!("{key}={}", render_value(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// A value's command-line form: strings bare, everything else as JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write overrides to a generated values file in the staging environment.
///
/// With `raw_overrides` unset, values are coerced to their string form
/// before writing, matching the `--set-string` inline encoding.
pub fn write_overrides_file(
    env: &StagingEnvironment,
    overrides: &BTreeMap<String, Value>,
    raw_overrides: bool,
) -> Result<std::path::PathBuf> {
    let file_name = format!("{OVERRIDES_FILE_PREFIX}{}{YML_FILE_EXTENSION}", Uuid::new_v4());
    let path = env.resolve_path(&file_name)?;

    let yaml = if raw_overrides {
        serde_yaml::to_string(overrides)?
    } else {
        let coerced: BTreeMap<&String, String> = overrides
            .iter()
            .map(|(key, value)| (key, render_value(value)))
            .collect();
        serde_yaml::to_string(&coerced)?
    };

    std::fs::write(&path, yaml)
        .map_err(|e| kiln_core::Error::file_system(&path, "write overrides file", e))?;
    Ok(path)
}

/// Append the override tokens to a command: the inline flag below the
/// threshold (or always, when the threshold is 0), a generated values file
/// otherwise.
pub fn append_override_tokens(
    command: &mut Vec<String>,
    env: &StagingEnvironment,
    overrides: &BTreeMap<String, Value>,
    raw_overrides: bool,
    file_threshold_bytes: usize,
) -> Result<()> {
    if overrides.is_empty() {
        return Ok(());
    }

    let serialized = overrides_as_string(overrides);
    if serialized.len() < file_threshold_bytes || file_threshold_bytes == 0 {
        let flag = if raw_overrides { "--set" } else { "--set-string" };
        command.push(flag.to_string());
        command.push(serialized);
    } else {
        let overrides_file = write_overrides_file(env, overrides, raw_overrides)?;
        command.push("--values".to_string());
        command.push(overrides_file.to_string_lossy().into_owned());
    }
    Ok(())
}
