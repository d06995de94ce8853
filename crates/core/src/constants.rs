//! Shared constants for the kiln workspace.

use std::time::Duration;

/// Number of attempts made for each artifact fetch before giving up.
pub const FETCH_RETRY_ATTEMPTS: u32 = 5;

/// Fixed delay between artifact fetch attempts.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Cadence of the bake orchestrator's job poll loop.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Artifact type whose reference is fetched as a gzip tarball and extracted
/// into the staging root instead of being staged as a single file.
pub const GIT_REPO_ARTIFACT_TYPE: &str = "git/repo";

/// Artifact type used for rendered output embedded in the response.
pub const EMBEDDED_BASE64_ARTIFACT_TYPE: &str = "embedded/base64";
