//! Recursive overlay dependency resolution.
//!
//! An overlay descriptor can reference sibling files directly or point at
//! other descriptors in parent or child directories, transitively. Given
//! the root descriptor artifact, the resolver computes the complete, minimal
//! set of files to stage before the build tool runs, each expressed as a
//! path relative to the artifact's reference root so directory structure is
//! preserved during staging. The root descriptor itself is not part of the
//! result; the builder stages it separately.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use kiln_core::{Artifact, Error, Result};

use super::reader::KustomizationFileReader;

/// Bound on descriptor recursion; together with the visited set this turns
/// descriptor cycles into errors instead of unbounded recursion.
pub const MAX_OVERLAY_DEPTH: usize = 10;

pub struct DependencyResolver {
    reader: KustomizationFileReader,
}

impl DependencyResolver {
    #[must_use]
    pub fn new(reader: KustomizationFileReader) -> Self {
        DependencyResolver { reader }
    }

    /// Resolve the full download set for the root overlay descriptor.
    ///
    /// The artifact's `name` is the descriptor's path relative to the
    /// reference root; its `reference` minus the name is the reference base
    /// URL. The artifact itself is never modified: the recursion threads
    /// the current base directory and accumulators explicitly.
    pub async fn resolve(&self, artifact: &Artifact) -> Result<BTreeSet<String>> {
        let name = artifact
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::invalid_request(
                    "the overlay artifact needs a 'name' locating its descriptor in the repository",
                )
            })?;
        let reference = artifact.reference.as_deref().ok_or_else(|| {
            Error::invalid_request("input artifact has an empty 'reference' field")
        })?;

        let reference_root = reference.replace(name, "");
        let preferred_name = file_name_of(name);
        let base = parent_dir_of(name);

        let mut files = BTreeSet::new();
        let mut visited = BTreeSet::new();
        self.visit(
            artifact,
            &reference_root,
            base,
            preferred_name,
            0,
            false,
            &mut visited,
            &mut files,
        )
        .await?;
        Ok(files)
    }

    /// One directory's worth of resolution. `include_self` adds the located
    /// descriptor to the result set — true for every directory except the
    /// root, whose descriptor the caller already has.
    #[allow(clippy::too_many_arguments)]
    fn visit<'a>(
        &'a self,
        artifact: &'a Artifact,
        reference_root: &'a str,
        base: String,
        preferred_name: &'a str,
        depth: usize,
        include_self: bool,
        visited: &'a mut BTreeSet<String>,
        files: &'a mut BTreeSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_OVERLAY_DEPTH {
                return Err(Error::resolve_manifest(
                    &base,
                    format!("overlay nesting exceeds {MAX_OVERLAY_DEPTH} levels"),
                ));
            }
            if !visited.insert(base.clone()) {
                return Err(Error::resolve_manifest(
                    &base,
                    "overlay descriptors form a cycle",
                ));
            }

            let reference_base = join_reference(reference_root, &base);
            let (descriptor_name, kustomization) = self
                .reader
                .read(artifact, &reference_base, preferred_name)
                .await?;

            if include_self {
                files.insert(normalize_relative(&join_relative(&base, &descriptor_name))?);
            }

            for file in kustomization.files_to_download() {
                files.insert(normalize_relative(&join_relative(&base, file))?);
            }

            for entry in kustomization.files_to_evaluate() {
                // Entries that look like directories reference descriptors
                // above or below this one; anything else is a plain file.
                // The extension heuristic is best-effort: a file with no
                // extension classifies as a directory.
                if is_directory_reference(entry) {
                    let next_base = normalize_relative(&join_relative(&base, entry))?;
                    self.visit(
                        artifact,
                        reference_root,
                        next_base,
                        preferred_name,
                        depth + 1,
                        true,
                        visited,
                        files,
                    )
                    .await?;
                } else {
                    files.insert(normalize_relative(&join_relative(&base, entry))?);
                }
            }

            Ok(())
        })
    }
}

/// A reference is directory-like when it has no extension-shaped suffix, or
/// when the suffix after its last dot is itself followed by another path
/// separator (`../base`, `./v1.2/overlay`).
fn is_directory_reference(entry: &str) -> bool {
    match entry.rfind('.') {
        Some(index) => entry[index + 1..].contains('/'),
        None => true,
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_dir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => String::new(),
    }
}

fn join_relative(base: &str, entry: &str) -> String {
    if base.is_empty() {
        entry.to_string()
    } else {
        format!("{base}/{entry}")
    }
}

fn join_reference(reference_root: &str, base: &str) -> String {
    let root = reference_root.trim_end_matches('/');
    if base.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{base}")
    }
}

/// Normalize a `/`-separated relative path, resolving `.` and `..`
/// segments. Escaping above the reference root is a hard error.
fn normalize_relative(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::resolve_manifest(
                        path,
                        "path escapes the reference root",
                    ));
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kiln_artifacts::FakeArtifactFetcher;

    use super::*;

    fn overlay_artifact() -> Artifact {
        Artifact {
            name: Some("overlay/kustomization.yaml".to_string()),
            reference: Some("https://repo/contents/overlay/kustomization.yaml".to_string()),
            ..Artifact::default()
        }
    }

    fn resolver(fetcher: FakeArtifactFetcher) -> DependencyResolver {
        DependencyResolver::new(KustomizationFileReader::new(Arc::new(fetcher)))
    }

    #[tokio::test]
    async fn resolves_siblings_and_parent_bases() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"resources:\n- deployment.yaml\nbases:\n- ../base\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/kustomization.yaml",
            &b"resources:\n- service.yaml\n"[..],
        );

        let files = resolver(fetcher).resolve(&overlay_artifact()).await.unwrap();
        let expected: BTreeSet<String> = [
            "overlay/deployment.yaml",
            "base/kustomization.yaml",
            "base/service.yaml",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(files, expected);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"resources:\n- deployment.yaml\nbases:\n- ../base\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/kustomization.yaml",
            &b"resources:\n- service.yaml\npatchesStrategicMerge:\n- limits.yaml\n"[..],
        );

        let resolver = resolver(fetcher);
        let first = resolver.resolve(&overlay_artifact()).await.unwrap();
        let second = resolver.resolve(&overlay_artifact()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn nested_child_overlays_recurse() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"resources:\n- components/logging\n"[..],
        );
        fetcher.put(
            "https://repo/contents/overlay/components/logging/kustomization.yaml",
            &b"resources:\n- sidecar.yaml\n"[..],
        );

        let files = resolver(fetcher).resolve(&overlay_artifact()).await.unwrap();
        assert!(files.contains("overlay/components/logging/kustomization.yaml"));
        assert!(files.contains("overlay/components/logging/sidecar.yaml"));
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn descriptor_cycles_are_fatal() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"bases:\n- ../base\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/kustomization.yaml",
            &b"bases:\n- ../overlay\n"[..],
        );

        let err = resolver(fetcher)
            .resolve(&overlay_artifact())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolveManifest { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn escaping_the_reference_root_is_fatal() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"bases:\n- ../../outside\n"[..],
        );

        let err = resolver(fetcher)
            .resolve(&overlay_artifact())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolveManifest { .. }));
    }

    #[tokio::test]
    async fn malformed_nested_descriptor_fails_the_whole_resolution() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"resources:\n- deployment.yaml\nbases:\n- ../base\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/kustomization.yaml",
            &b"resources: {broken: [\n"[..],
        );

        let err = resolver(fetcher)
            .resolve(&overlay_artifact())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolveManifest { .. }));
    }

    #[test]
    fn directory_heuristic_matches_the_documented_cases() {
        assert!(is_directory_reference("../base"));
        assert!(is_directory_reference("components/logging"));
        assert!(is_directory_reference("./v1.2/overlay"));
        assert!(!is_directory_reference("deployment.yaml"));
        assert!(!is_directory_reference("../base/service.yaml"));
    }
}
