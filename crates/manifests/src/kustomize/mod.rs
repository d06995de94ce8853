//! Kustomize template builder and its overlay dependency resolution.

pub mod kustomization;
pub mod reader;
pub mod resolver;

use std::sync::Arc;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{BakeRecipe, Error, KustomizeBakeRequest, Result, TemplateRenderer};

use crate::config::KustomizeConfig;
use crate::env::StagingEnvironment;
use reader::KustomizationFileReader;
use resolver::DependencyResolver;

/// Builds `kustomize build` command lines from bake requests.
///
/// Unlike the helm family, kustomize needs the overlay's whole dependency
/// tree staged with its directory structure intact before the tool runs.
pub struct KustomizeTemplateBuilder {
    fetcher: Arc<dyn ArtifactFetcher>,
    resolver: DependencyResolver,
    config: KustomizeConfig,
}

impl KustomizeTemplateBuilder {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, config: KustomizeConfig) -> Self {
        let resolver = DependencyResolver::new(KustomizationFileReader::new(Arc::clone(&fetcher)));
        KustomizeTemplateBuilder {
            fetcher,
            resolver,
            config,
        }
    }

    fn executable_for(&self, request: &KustomizeBakeRequest) -> &str {
        if request.template_renderer == TemplateRenderer::Kustomize4 {
            &self.config.v4_executable_path
        } else {
            &self.config.executable_path
        }
    }

    pub async fn build_bake_recipe(
        &self,
        env: &StagingEnvironment,
        request: &KustomizeBakeRequest,
    ) -> Result<BakeRecipe> {
        let artifact = request.input_artifact.as_ref().ok_or_else(|| {
            Error::invalid_request("exactly one input artifact must be provided to bake")
        })?;
        let reference = artifact.reference.as_deref().ok_or_else(|| {
            Error::invalid_request("input artifact has an empty 'reference' field")
        })?;
        let name = artifact
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::invalid_request(
                    "the overlay artifact needs a 'name' locating its descriptor in the repository",
                )
            })?;

        let descriptor_filename = reference.rsplit('/').next().unwrap_or(reference);
        if !descriptor_filename.to_uppercase().contains("KUSTOMIZATION") {
            return Err(Error::invalid_request(
                "the input artifact should be a valid kustomization file",
            ));
        }

        let reference_root = reference.replace(name, "");

        let files = self.resolver.resolve(artifact).await?;
        for file in &files {
            let target = env.prepare_path(file)?;
            let file_reference = format!("{}/{file}", reference_root.trim_end_matches('/'));
            self.fetcher
                .fetch_to_file(&artifact.with_reference(file_reference), &target)
                .await?;
        }

        // The resolver's set covers everything the root descriptor needs
        // except the root descriptor itself
        let root_descriptor = env.prepare_path(name)?;
        self.fetcher.fetch_to_file(artifact, &root_descriptor).await?;

        let overlay_dir = match name.rfind('/') {
            Some(index) => env.resolve_path(&name[..index])?,
            None => env.path().to_path_buf(),
        };

        let command = vec![
            self.executable_for(request).to_string(),
            "build".to_string(),
            overlay_dir.to_string_lossy().into_owned(),
        ];
        Ok(BakeRecipe::new(&request.output_name, command))
    }
}

#[cfg(test)]
mod tests {
    use kiln_artifacts::FakeArtifactFetcher;
    use kiln_core::Artifact;

    use super::*;

    fn overlay_artifact() -> Artifact {
        Artifact {
            name: Some("overlay/kustomization.yaml".to_string()),
            reference: Some("https://repo/contents/overlay/kustomization.yaml".to_string()),
            ..Artifact::default()
        }
    }

    fn builder() -> KustomizeTemplateBuilder {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put(
            "https://repo/contents/overlay/kustomization.yaml",
            &b"resources:\n- deployment.yaml\nbases:\n- ../base\n"[..],
        );
        fetcher.put(
            "https://repo/contents/overlay/deployment.yaml",
            &b"kind: Deployment\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/kustomization.yaml",
            &b"resources:\n- service.yaml\n"[..],
        );
        fetcher.put(
            "https://repo/contents/base/service.yaml",
            &b"kind: Service\n"[..],
        );
        KustomizeTemplateBuilder::new(Arc::new(fetcher), KustomizeConfig::default())
    }

    fn request() -> KustomizeBakeRequest {
        KustomizeBakeRequest {
            output_name: "demo".to_string(),
            output_artifact_name: "demo-manifest".to_string(),
            input_artifact: Some(overlay_artifact()),
            ..KustomizeBakeRequest::default()
        }
    }

    #[tokio::test]
    async fn stages_the_dependency_tree_preserving_structure() {
        let env = StagingEnvironment::new().unwrap();
        let recipe = builder().build_bake_recipe(&env, &request()).await.unwrap();

        assert!(env.path().join("overlay/kustomization.yaml").exists());
        assert!(env.path().join("overlay/deployment.yaml").exists());
        assert!(env.path().join("base/kustomization.yaml").exists());
        assert!(env.path().join("base/service.yaml").exists());

        assert_eq!(recipe.command[0], "kustomize");
        assert_eq!(recipe.command[1], "build");
        assert_eq!(
            recipe.command[2],
            env.path().join("overlay").to_string_lossy().as_ref()
        );
    }

    #[tokio::test]
    async fn newer_tool_version_selects_the_other_executable() {
        let env = StagingEnvironment::new().unwrap();
        let mut request = request();
        request.template_renderer = TemplateRenderer::Kustomize4;
        let recipe = builder().build_bake_recipe(&env, &request).await.unwrap();
        assert_eq!(recipe.command[0], "kustomize4");
    }

    #[tokio::test]
    async fn missing_input_artifact_is_invalid() {
        let env = StagingEnvironment::new().unwrap();
        let mut request = request();
        request.input_artifact = None;
        let err = builder().build_bake_recipe(&env, &request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn non_kustomization_reference_is_invalid() {
        let env = StagingEnvironment::new().unwrap();
        let mut request = request();
        request.input_artifact = Some(Artifact {
            name: Some("overlay/deployment.yaml".to_string()),
            reference: Some("https://repo/contents/overlay/deployment.yaml".to_string()),
            ..Artifact::default()
        });
        let err = builder().build_bake_recipe(&env, &request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
