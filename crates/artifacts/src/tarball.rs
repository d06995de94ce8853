//! Safe extraction of gzip tarballs into a staging directory.

use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use kiln_core::{Error, Result};
use tar::Archive;

/// Extract a gzip-compressed tarball into `destination_root`.
///
/// Relative entry paths are preserved. Entries with absolute paths or with
/// parent-directory segments that would resolve outside the root are
/// rejected with [`Error::PathEscape`]; nothing is written for them.
pub fn extract_gzip_tarball(bytes: &[u8], destination_root: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let entries = archive
        .entries()
        .map_err(|e| Error::file_system(destination_root, "read tarball", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::file_system(destination_root, "read tarball", e))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::file_system(destination_root, "read tarball entry path", e))?
            .into_owned();

        let relative = sanitize_entry_path(&entry_path, destination_root)?;
        let target = destination_root.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::file_system(parent, "create directory", e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| Error::file_system(&target, "unpack tarball entry", e))?;
    }

    Ok(())
}

/// Reject absolute entry paths and any path whose normal form escapes the
/// extraction root.
fn sanitize_entry_path(entry_path: &Path, root: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(Error::path_escape(entry_path, root));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::path_escape(entry_path, root));
            }
        }
    }
    Ok(normalized)
}
