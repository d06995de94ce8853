//! Shared-configuration snapshotting for the remote backends.
//!
//! Both the cluster-job and remote-task backends ship the service's local
//! configuration directory to the job: the cluster backend as a read-only
//! config volume created once at startup, the remote backend inside the
//! per-job context bundle.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_core::{Error, Result};
use walkdir::WalkDir;

/// Read every regular file directly under `config_dir` into a
/// filename → contents map. Files must be UTF-8 text.
pub fn read_config_files(config_dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();

    for entry in WalkDir::new(config_dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            Error::configuration(format!(
                "failed to walk configuration directory '{}': {e}",
                config_dir.display()
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let contents = std::fs::read_to_string(entry.path()).map_err(|e| {
            Error::configuration(format!(
                "failed to read configuration file '{}' as UTF-8 text: {e}",
                entry.path().display()
            ))
        })?;
        files.insert(name, contents);
    }

    Ok(files)
}
