//! Cloud Foundry manifest baking.
//!
//! The only renderer that bakes in-process: the manifest template's
//! `((key))` tokens are substituted with values merged from the vars
//! artifacts, no external tool involved.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_artifacts::ArtifactFetcher;
use kiln_core::{Artifact, CloudFoundryBakeRequest, Error, Result};

/// Renders Cloud Foundry manifests by variable substitution.
pub struct CloudFoundryBaker {
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl CloudFoundryBaker {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        CloudFoundryBaker { fetcher }
    }

    pub async fn bake(&self, request: &CloudFoundryBakeRequest) -> Result<Artifact> {
        let template_artifact = request.manifest_template.as_ref().ok_or_else(|| {
            Error::invalid_request("a manifest template artifact must be provided to bake")
        })?;

        let template_bytes = self.fetcher.fetch(template_artifact).await?;
        let mut manifest = String::from_utf8(template_bytes.to_vec())
            .map_err(|e| Error::invalid_request(format!("manifest template is not UTF-8: {e}")))?;

        let mut vars = serde_yaml::Mapping::new();
        for artifact in &request.vars_artifacts {
            let bytes = self.fetcher.fetch(artifact).await?;
            let parsed: serde_yaml::Value = serde_yaml::from_slice(&bytes)?;
            match parsed {
                serde_yaml::Value::Mapping(mapping) => vars.extend(mapping),
                other => {
                    return Err(Error::invalid_request(format!(
                        "vars artifact must contain a mapping, got {}",
                        yaml_kind(&other)
                    )))
                }
            }
        }

        for (key, value) in flatten(&vars, "") {
            manifest = manifest.replace(&format!("(({key}))"), &value);
        }

        Ok(Artifact::embedded_base64(
            &request.output_artifact_name,
            STANDARD.encode(manifest),
        ))
    }
}

/// Flatten nested mappings into dotted keys, rendering leaves to their
/// string form.
fn flatten(mapping: &serde_yaml::Mapping, prefix: &str) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else { continue };
        let key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            serde_yaml::Value::Mapping(nested) => flat.extend(flatten(nested, &key)),
            leaf => {
                flat.insert(key, render_yaml_value(leaf));
            }
        }
    }
    flat
}

fn render_yaml_value(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use kiln_artifacts::FakeArtifactFetcher;

    use super::*;

    fn baker(template: &str, vars: &[&str]) -> (CloudFoundryBaker, CloudFoundryBakeRequest) {
        let fetcher = FakeArtifactFetcher::new();
        fetcher.put("template", template.as_bytes().to_vec());
        let mut vars_artifacts = Vec::new();
        for (i, contents) in vars.iter().enumerate() {
            let reference = format!("vars-{i}");
            fetcher.put(reference.clone(), contents.as_bytes().to_vec());
            vars_artifacts.push(Artifact::default().with_reference(reference));
        }

        let request = CloudFoundryBakeRequest {
            output_name: "cf-app".to_string(),
            output_artifact_name: "cf-manifest".to_string(),
            manifest_template: Some(Artifact::default().with_reference("template")),
            vars_artifacts,
        };
        (CloudFoundryBaker::new(Arc::new(fetcher)), request)
    }

    fn decode(artifact: &Artifact) -> String {
        let bytes = STANDARD.decode(artifact.reference.as_deref().unwrap()).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn substitutes_flat_and_nested_vars() {
        let (baker, request) = baker(
            "applications:\n- name: ((app.name))\n  instances: ((instances))\n",
            &["app:\n  name: demo\n", "instances: 2\n"],
        );

        let artifact = baker.bake(&request).await.unwrap();
        assert_eq!(artifact.artifact_type.as_deref(), Some("embedded/base64"));
        let manifest = decode(&artifact);
        assert!(manifest.contains("name: demo"));
        assert!(manifest.contains("instances: 2"));
    }

    #[tokio::test]
    async fn later_vars_files_win() {
        let (baker, request) = baker(
            "name: ((name))\n",
            &["name: first\n", "name: second\n"],
        );
        let manifest = decode(&baker.bake(&request).await.unwrap());
        assert!(manifest.contains("name: second"));
    }

    #[tokio::test]
    async fn missing_template_is_invalid() {
        let (baker, mut request) = baker("x", &[]);
        request.manifest_template = None;
        let err = baker.bake(&request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn non_mapping_vars_artifact_is_invalid() {
        let (baker, request) = baker("x: ((y))\n", &["- just\n- a list\n"]);
        let err = baker.bake(&request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
