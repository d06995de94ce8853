//! Jinja template builder.

use std::sync::Arc;

use kiln_artifacts::ArtifactFetcher;
use kiln_core::{BakeRecipe, Error, JinjaBakeRequest, Result};

use crate::config::JinjaConfig;
use crate::env::StagingEnvironment;
use crate::stage;

/// Builds `jinja2` command lines from bake requests.
pub struct JinjaTemplateBuilder {
    fetcher: Arc<dyn ArtifactFetcher>,
    config: JinjaConfig,
}

impl JinjaTemplateBuilder {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, config: JinjaConfig) -> Self {
        JinjaTemplateBuilder { fetcher, config }
    }

    pub async fn build_bake_recipe(
        &self,
        env: &StagingEnvironment,
        request: &JinjaBakeRequest,
    ) -> Result<BakeRecipe> {
        let (template, value_artifacts) = request.input_artifacts.split_first().ok_or_else(|| {
            Error::invalid_request("at least one input artifact must be provided to bake")
        })?;

        let template_path = stage::stage_artifact_file(self.fetcher.as_ref(), env, template).await?;
        let value_paths =
            stage::stage_value_files(self.fetcher.as_ref(), env, value_artifacts).await?;

        let mut command = vec![
            self.config.executable_path.clone(),
            template_path.to_string_lossy().into_owned(),
        ];
        for path in &value_paths {
            command.push(path.to_string_lossy().into_owned());
        }

        for (key, value) in &request.overrides {
            command.push("-D".to_string());
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            command.push(format!("{key}={value}"));
        }

        command.push("--format".to_string());
        command.push(request.input_format.clone());

        Ok(BakeRecipe::new(&request.output_name, command))
    }
}

#[cfg(test)]
mod tests {
    use kiln_artifacts::FakeArtifactFetcher;
    use kiln_core::Artifact;
    use serde_json::json;

    use super::*;

    fn builder() -> JinjaTemplateBuilder {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put("https://files.example/app.yaml.j2", &b"name: {{ name }}\n"[..]);
        fetcher.put("https://files.example/vars.yaml", &b"name: demo\n"[..]);
        JinjaTemplateBuilder::new(Arc::new(fetcher), JinjaConfig::default())
    }

    #[tokio::test]
    async fn builds_positional_template_values_and_defines() {
        let env = StagingEnvironment::new().unwrap();
        let mut request = JinjaBakeRequest {
            output_name: "demo".to_string(),
            input_artifacts: vec![
                Artifact::default().with_reference("https://files.example/app.yaml.j2"),
                Artifact::default().with_reference("https://files.example/vars.yaml"),
            ],
            input_format: "yaml".to_string(),
            ..JinjaBakeRequest::default()
        };
        request.overrides.insert("region".to_string(), json!("us-east-1"));

        let recipe = builder().build_bake_recipe(&env, &request).await.unwrap();
        assert_eq!(recipe.command[0], "jinja2");
        assert!(std::path::Path::new(&recipe.command[1]).starts_with(env.path()));
        assert!(std::path::Path::new(&recipe.command[2]).starts_with(env.path()));
        let command = recipe.command.join(" ");
        assert!(command.contains("-D region=us-east-1"));
        assert!(command.ends_with("--format yaml"));
    }

    #[tokio::test]
    async fn empty_input_artifacts_fail_fast() {
        let env = StagingEnvironment::new().unwrap();
        let request = JinjaBakeRequest::default();
        let err = builder().build_bake_recipe(&env, &request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
