use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::{Artifact, Error, Result};

use crate::fetcher::{retry_fetch, ArtifactFetcher};

/// HTTP client for the artifact resolver service.
///
/// The resolver exposes one endpoint, `POST {base_url}/artifacts/fetch`,
/// taking the artifact as a JSON body and answering with the raw content
/// bytes. Every fetch goes through the fixed retry policy.
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactFetcher {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpArtifactFetcher {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_once(&self, artifact: &Artifact) -> std::result::Result<Bytes, reqwest::Error> {
        let response = self
            .client
            .post(format!("{}/artifacts/fetch", self.base_url))
            .json(artifact)
            .send()
            .await?
            .error_for_status()?;
        response.bytes().await
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, artifact: &Artifact) -> Result<Bytes> {
        let reference = artifact
            .reference
            .as_deref()
            .ok_or_else(|| Error::invalid_request("input artifact has an empty 'reference' field"))?;
        retry_fetch(reference, || self.fetch_once(artifact)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let fetcher = HttpArtifactFetcher::new("http://resolver:7002/");
        assert_eq!(fetcher.base_url, "http://resolver:7002");
    }
}
