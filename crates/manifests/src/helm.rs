//! Helm template builder.

use std::sync::Arc;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{BakeRecipe, Error, HelmBakeRequest, Result, TemplateRenderer};

use crate::config::HelmConfig;
use crate::env::StagingEnvironment;
use crate::overrides;
use crate::stage;

/// Builds `helm template` command lines from bake requests.
pub struct HelmTemplateBuilder {
    fetcher: Arc<dyn ArtifactFetcher>,
    config: HelmConfig,
}

impl HelmTemplateBuilder {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, config: HelmConfig) -> Self {
        HelmTemplateBuilder { fetcher, config }
    }

    fn executable_for(&self, request: &HelmBakeRequest) -> &str {
        if request.template_renderer == TemplateRenderer::Helm2 {
            &self.config.v2_executable_path
        } else {
            &self.config.v3_executable_path
        }
    }

    /// Stage the request's artifacts and derive the command line.
    pub async fn build_bake_recipe(
        &self,
        env: &StagingEnvironment,
        request: &HelmBakeRequest,
    ) -> Result<BakeRecipe> {
        let (chart, value_artifacts) = request.input_artifacts.split_first().ok_or_else(|| {
            Error::invalid_request("at least one input artifact must be provided to bake")
        })?;

        let template_path = stage::stage_template_root(
            self.fetcher.as_ref(),
            env,
            chart,
            request.helm_chart_file_path.as_deref(),
        )
        .await?;
        tracing::debug!(chart = %template_path.display(), "staged helm chart");

        let value_paths =
            stage::stage_value_files(self.fetcher.as_ref(), env, value_artifacts).await?;

        let mut command = vec![self.executable_for(request).to_string(), "template".to_string()];

        // The template subcommands differ between major versions:
        //   helm 2: helm template <chart> --name <release name>
        //   helm 3: helm template <release name> <chart>
        if request.template_renderer == TemplateRenderer::Helm2 {
            command.push(template_path.to_string_lossy().into_owned());
            command.push("--name".to_string());
            command.push(request.output_name.clone());
        } else {
            command.push(request.output_name.clone());
            command.push(template_path.to_string_lossy().into_owned());
        }

        if let Some(namespace) = request.namespace.as_deref().filter(|n| !n.is_empty()) {
            command.push("--namespace".to_string());
            command.push(namespace.to_string());
        }

        if request.include_crds && request.template_renderer == TemplateRenderer::Helm3 {
            command.push("--include-crds".to_string());
        }

        if let Some(api_versions) = request.api_versions.as_deref().filter(|v| !v.is_empty()) {
            command.push("--api-versions".to_string());
            command.push(api_versions.to_string());
        }

        if let Some(kube_version) = request.kube_version.as_deref().filter(|v| !v.is_empty()) {
            command.push("--kube-version".to_string());
            command.push(kube_version.to_string());
        }

        overrides::append_override_tokens(
            &mut command,
            env,
            &request.overrides,
            request.raw_overrides,
            self.config.overrides_file_threshold,
        )?;

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
