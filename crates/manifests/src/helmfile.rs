//! Helmfile template builder.

use std::sync::Arc;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{BakeRecipe, Error, HelmfileBakeRequest, Result};

use crate::config::{HelmConfig, HelmfileConfig};
use crate::env::StagingEnvironment;
use crate::overrides;
use crate::stage;

/// Builds `helmfile template` command lines from bake requests.
///
/// Helmfile always renders through helm 3, so the helm executable location
/// rides along in the configuration.
pub struct HelmfileTemplateBuilder {
    fetcher: Arc<dyn ArtifactFetcher>,
    config: HelmfileConfig,
    helm_config: HelmConfig,
}

impl HelmfileTemplateBuilder {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        config: HelmfileConfig,
        helm_config: HelmConfig,
    ) -> Self {
        HelmfileTemplateBuilder {
            fetcher,
            config,
            helm_config,
        }
    }

    pub async fn build_bake_recipe(
        &self,
        env: &StagingEnvironment,
        request: &HelmfileBakeRequest,
    ) -> Result<BakeRecipe> {
        let (helmfile, value_artifacts) = request.input_artifacts.split_first().ok_or_else(|| {
            Error::invalid_request("at least one input artifact must be provided to bake")
        })?;

        let helmfile_path = stage::stage_template_root(
            self.fetcher.as_ref(),
            env,
            helmfile,
            request.helmfile_file_path.as_deref(),
        )
        .await?;
        tracing::debug!(helmfile = %helmfile_path.display(), "staged helmfile");

        let value_paths =
            stage::stage_value_files(self.fetcher.as_ref(), env, value_artifacts).await?;

        let mut command = vec![
            self.config.executable_path.clone(),
            "template".to_string(),
            "--file".to_string(),
            helmfile_path.to_string_lossy().into_owned(),
            "--helm-binary".to_string(),
            self.helm_config.v3_executable_path.clone(),
        ];

        if let Some(environment) = request.environment.as_deref().filter(|e| !e.is_empty()) {
            command.push("--environment".to_string());
            command.push(environment.to_string());
        }

        if let Some(namespace) = request.namespace.as_deref().filter(|n| !n.is_empty()) {
            command.push("--namespace".to_string());
            command.push(namespace.to_string());
        }

        if request.include_crds {
            command.push("--include-crds".to_string());
        }

        if !request.overrides.is_empty() {
            command.push("--set".to_string());
            command.push(overrides::overrides_as_string(&request.overrides));
        }

        if !value_paths.is_empty() {
            command.push("--values".to_string());
            command.push(
                value_paths
                    .iter()
                    .map(|path| path.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        Ok(BakeRecipe::new(&request.output_name, command))
    }
}
