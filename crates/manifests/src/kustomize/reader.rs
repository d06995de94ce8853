//! Locating and parsing overlay descriptors.

use std::sync::Arc;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{Artifact, Error, Result};

use super::kustomization::Kustomization;

/// Conventional descriptor filenames, tried in order after the preferred
/// name.
const KUSTOMIZATION_FILENAMES: &[&str] = &["kustomization.yaml", "kustomization.yml", "kustomization"];

/// Fetches and parses the overlay descriptor for a directory.
pub struct KustomizationFileReader {
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl KustomizationFileReader {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        KustomizationFileReader { fetcher }
    }

    /// Locate the descriptor under `reference_base` (the directory's
    /// reference URL), trying `preferred_name` first, then the conventional
    /// alternatives. A candidate that cannot be fetched moves on to the
    /// next name; one that fetches but fails to parse is a hard error — a
    /// malformed descriptor must never silently produce a partial
    /// resolution. Returns the winning filename and the parsed document.
    pub async fn read(
        &self,
        template: &Artifact,
        reference_base: &str,
        preferred_name: &str,
    ) -> Result<(String, Kustomization)> {
        let mut names: Vec<&str> = KUSTOMIZATION_FILENAMES.to_vec();
        names.sort_by(|a, b| {
            if *a == preferred_name {
                std::cmp::Ordering::Less
            } else if *b == preferred_name {
                std::cmp::Ordering::Greater
            } else {
                a.cmp(b)
            }
        });

        for name in names {
            let reference = format!("{}/{name}", reference_base.trim_end_matches('/'));
            let candidate = template.with_reference(&reference);
            let bytes = match self.fetcher.fetch(&candidate).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::debug!(%reference, %error, "descriptor candidate not fetchable");
                    continue;
                }
            };
            let kustomization = serde_yaml::from_slice(&bytes).map_err(|e| {
                Error::resolve_manifest(
                    &reference,
                    format!("unable to parse overlay descriptor: {e}"),
                )
            })?;
            return Ok((name.to_string(), kustomization));
        }

        Err(Error::resolve_manifest(
            reference_base,
            "no overlay descriptor found under any conventional name",
        ))
    }
}

#[cfg(test)]
mod tests {
    use kiln_artifacts::FakeArtifactFetcher;

    use super::*;

    #[tokio::test]
    async fn preferred_name_wins_over_alternatives() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put("https://repo/base/kustomization.yml", &b"resources: [a.yaml]\n"[..]);
        fetcher.put("https://repo/base/kustomization.yaml", &b"resources: [b.yaml]\n"[..]);
        let reader = KustomizationFileReader::new(Arc::new(fetcher));

        let (name, kustomization) = reader
            .read(&Artifact::default(), "https://repo/base", "kustomization.yml")
            .await
            .unwrap();
        assert_eq!(name, "kustomization.yml");
        assert_eq!(kustomization.files_to_evaluate(), vec!["a.yaml"]);
    }

    #[tokio::test]
    async fn falls_back_through_conventional_names() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put("https://repo/base/kustomization", &b"resources: [c.yaml]\n"[..]);
        let reader = KustomizationFileReader::new(Arc::new(fetcher));

        let (name, _) = reader
            .read(&Artifact::default(), "https://repo/base", "kustomization.yaml")
            .await
            .unwrap();
        assert_eq!(name, "kustomization");
    }

    #[tokio::test]
    async fn malformed_descriptor_is_a_hard_error() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/base/kustomization.yaml",
            &b"resources: {not: [valid\n"[..],
        );
        let reader = KustomizationFileReader::new(Arc::new(fetcher));

        let err = reader
            .read(&Artifact::default(), "https://repo/base", "kustomization.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolveManifest { .. }));
    }

    #[tokio::test]
    async fn missing_descriptor_everywhere_is_an_error() {
        let reader = KustomizationFileReader::new(Arc::new(FakeArtifactFetcher::new()));
        let err = reader
            .read(&Artifact::default(), "https://repo/empty", "kustomization.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolveManifest { .. }));
    }
}
