//! Artifact fetching for kiln.
//!
//! Template builders never talk to artifact stores directly; they go through
//! the [`ArtifactFetcher`] trait, which hides the transport and applies the
//! fixed retry policy (5 attempts, 1000 ms apart). The production
//! implementation is [`HttpArtifactFetcher`], a thin client for the artifact
//! resolver service. [`fake::FakeArtifactFetcher`] backs tests.

pub mod fake;
pub mod fetcher;
pub mod http;
pub mod tarball;

pub use fake::FakeArtifactFetcher;
pub use fetcher::{retry_fetch, ArtifactFetcher};
pub use http::HttpArtifactFetcher;
