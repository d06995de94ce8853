//! The per-bake staging environment: an isolated, ephemeral filesystem
//! scope owning every file created while building one recipe.

use std::path::{Component, Path, PathBuf};

use kiln_core::{Error, Result};
use tempfile::TempDir;

/// One unique staging directory per bake.
///
/// All path resolution funnels through [`resolve_path`], which rejects
/// anything escaping the root. The root is recursively deleted exactly once
/// when the environment is dropped, on every exit path; deletion failures
/// are logged and never override the bake outcome.
///
/// [`resolve_path`]: StagingEnvironment::resolve_path
pub struct StagingEnvironment {
    path: PathBuf,
    root: Option<TempDir>,
}

impl StagingEnvironment {
    /// Create a fresh staging directory under the system temp root.
    pub fn new() -> Result<Self> {
        let root = TempDir::with_prefix("kiln-bake-")
            .map_err(|e| Error::file_system(std::env::temp_dir(), "create staging root", e))?;
        Ok(StagingEnvironment {
            path: root.path().to_path_buf(),
            root: Some(root),
        })
    }

    /// The staging root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a relative path to an absolute location inside the root.
    ///
    /// Absolute paths and paths whose normal form escapes the root (leading
    /// parent-directory segments) are rejected with [`Error::PathEscape`];
    /// nothing is written for them.
    pub fn resolve_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(Error::path_escape(relative, &self.path));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::path_escape(relative, &self.path));
                }
            }
        }
        Ok(self.path.join(normalized))
    }

    /// Resolve a relative path and create its parent directories.
    pub fn prepare_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let target = self.resolve_path(relative)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::file_system(parent, "create directory", e))?;
        }
        Ok(target)
    }
}

impl Drop for StagingEnvironment {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            if let Err(error) = root.close() {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to clean up staging environment",
                );
            }
        }
    }
}
