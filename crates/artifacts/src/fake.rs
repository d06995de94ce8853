//! In-memory fetcher and fixtures for tests.
//!
//! Lives in the library (not behind `cfg(test)`) so downstream crates can
//! drive their builders against canned artifact content.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::{Artifact, Error, Result};

use crate::fetcher::ArtifactFetcher;

/// An [`ArtifactFetcher`] serving canned bytes keyed by artifact reference.
///
/// Unknown references fail immediately with a terminal fetch error; the
/// retry policy is pointless against deterministic content.
#[derive(Default)]
pub struct FakeArtifactFetcher {
    contents: Mutex<HashMap<String, Bytes>>,
}

impl FakeArtifactFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bytes served for `reference`.
    pub fn put(&self, reference: impl Into<String>, bytes: impl Into<Bytes>) {
        if let Ok(mut contents) = self.contents.lock() {
            contents.insert(reference.into(), bytes.into());
        }
    }

    /// Register a gzip tarball built from `(path, contents)` pairs.
    pub fn put_tarball(&self, reference: impl Into<String>, entries: &[(&str, &str)]) {
        self.put(reference, build_gzip_tarball(entries));
    }
}

#[async_trait]
impl ArtifactFetcher for FakeArtifactFetcher {
    async fn fetch(&self, artifact: &Artifact) -> Result<Bytes> {
        let reference = artifact
            .reference
            .as_deref()
            .ok_or_else(|| Error::invalid_request("input artifact has an empty 'reference' field"))?;
        let contents = self
            .contents
            .lock()
            .map_err(|e| Error::configuration(format!("failed to lock canned content: {e}")))?;
        contents
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::fetch(reference, 1, "no canned content registered"))
    }
}

/// Build a gzip tarball from `(path, contents)` pairs.
#[must_use]
pub fn build_gzip_tarball(entries: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        // Write the path directly into the header name field. `append_data`
        // (and `Header::set_path`) reject `..`, but these fixtures intentionally
        // carry `..` segments to exercise the extractor's traversal checks.
        let name = path.as_bytes();
        let gnu = header.as_gnu_mut().expect("gnu header");
        gnu.name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        builder
            .append(&header, contents.as_bytes())
            .expect("append tar entry");
    }
    let encoder = builder.into_inner().expect("finish tar");
    encoder.finish().expect("finish gzip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_registered_bytes() {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put("ref-1", &b"hello"[..]);

        let artifact = Artifact::default().with_reference("ref-1");
        let bytes = fetcher.fetch(&artifact).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn unknown_reference_is_a_fetch_error() {
        let fetcher = FakeArtifactFetcher::new();
        let artifact = Artifact::default().with_reference("missing");
        let err = fetcher.fetch(&artifact).await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn missing_reference_is_invalid_request() {
        let fetcher = FakeArtifactFetcher::new();
        let err = fetcher.fetch(&Artifact::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
