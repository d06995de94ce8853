//! Staging helpers shared by the builders.

use std::path::PathBuf;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{Artifact, Result, GIT_REPO_ARTIFACT_TYPE};
use uuid::Uuid;

use crate::env::StagingEnvironment;

/// Stage an artifact as a single file under a random unique name.
pub(crate) async fn stage_artifact_file(
    fetcher: &dyn ArtifactFetcher,
    env: &StagingEnvironment,
    artifact: &Artifact,
) -> Result<PathBuf> {
    let target = env.resolve_path(Uuid::new_v4().to_string())?;
    fetcher.fetch_to_file(artifact, &target).await?;
    Ok(target)
}

/// Stage each values artifact as its own file.
pub(crate) async fn stage_value_files(
    fetcher: &dyn ArtifactFetcher,
    env: &StagingEnvironment,
    artifacts: &[Artifact],
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        paths.push(stage_artifact_file(fetcher, env, artifact).await?);
    }
    Ok(paths)
}

/// Stage the template artifact and return the effective template root.
///
/// `git/repo` artifacts are fetched as gzip tarballs and extracted wholesale
/// into the staging root, preserving relative paths; the effective root is
/// then `sub_path` within the extracted tree. Anything else is staged as a
/// single file.
pub(crate) async fn stage_template_root(
    fetcher: &dyn ArtifactFetcher,
    env: &StagingEnvironment,
    artifact: &Artifact,
    sub_path: Option<&str>,
) -> Result<PathBuf> {
    if artifact.type_or_default() == GIT_REPO_ARTIFACT_TYPE {
        fetcher.fetch_tarball_and_extract(artifact, env.path()).await?;
        env.resolve_path(sub_path.unwrap_or(""))
    } else {
        stage_artifact_file(fetcher, env, artifact).await
    }
}
