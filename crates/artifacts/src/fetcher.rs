use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::{Artifact, Error, Result, FETCH_RETRY_ATTEMPTS, FETCH_RETRY_DELAY};
use tokio::time::sleep;

use crate::tarball;

/// Trait for fetching bake input artifacts.
///
/// Implementations are expected to apply the bounded retry policy (see
/// [`retry_fetch`]) so that callers observe either bytes or a terminal
/// [`Error::Fetch`].
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the artifact's content as one in-memory byte buffer.
    async fn fetch(&self, artifact: &Artifact) -> Result<Bytes>;

    /// Fetch the artifact and write it to `target`.
    async fn fetch_to_file(&self, artifact: &Artifact, target: &Path) -> Result<()> {
        let bytes = self.fetch(artifact).await?;
        tokio::fs::write(target, &bytes)
            .await
            .map_err(|e| Error::file_system(target, "write", e))
    }

    /// Fetch the artifact as a gzip tarball and extract it under
    /// `destination_root`, preserving relative paths. Entries that would
    /// land outside the root are a fatal error.
    async fn fetch_tarball_and_extract(
        &self,
        artifact: &Artifact,
        destination_root: &Path,
    ) -> Result<()> {
        let bytes = self.fetch(artifact).await?;
        tarball::extract_gzip_tarball(&bytes, destination_root)
    }
}

/// Run one fetch operation under the fixed retry policy.
///
/// Every attempt that fails is logged; exhausting the budget converts the
/// last cause into a terminal [`Error::Fetch`] carrying the artifact
/// reference.
pub async fn retry_fetch<F, Fut, T, E>(reference: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut last_error = None;

    for attempt in 1..=FETCH_RETRY_ATTEMPTS {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(reference, attempt, "artifact fetch succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt < FETCH_RETRY_ATTEMPTS {
                    tracing::warn!(
                        reference,
                        attempt,
                        max_attempts = FETCH_RETRY_ATTEMPTS,
                        %error,
                        "artifact fetch failed, retrying",
                    );
                    sleep(FETCH_RETRY_DELAY).await;
                }
                last_error = Some(error);
            }
        }
    }

    let message = last_error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "no attempt was made".to_string());
    match last_error {
        Some(source) => Err(Error::fetch_with_source(
            reference,
            FETCH_RETRY_ATTEMPTS,
            message,
            source,
        )),
        None => Err(Error::fetch(reference, FETCH_RETRY_ATTEMPTS, message)),
    }
}
