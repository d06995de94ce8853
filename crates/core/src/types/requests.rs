use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;

/// Renderer family (and, where relevant, major version) requested by a bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateRenderer {
    Helm2,
    Helm3,
    Helmfile,
    Kustomize,
    Kustomize4,
    Cf,
}

fn default_helm_renderer() -> TemplateRenderer {
    TemplateRenderer::Helm3
}

fn default_kustomize_renderer() -> TemplateRenderer {
    TemplateRenderer::Kustomize
}

/// Bake request for the Helm renderer.
///
/// The 0th input artifact is (or contains) the chart; the rest, possibly
/// none, are values files. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmBakeRequest {
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub output_artifact_name: String,
    #[serde(default)]
    pub input_artifacts: Vec<Artifact>,
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
    /// `true` embeds override values untouched (`--set`); `false` coerces
    /// them to strings first (`--set-string`).
    #[serde(default)]
    pub raw_overrides: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, rename = "includeCRDs")]
    pub include_crds: bool,
    #[serde(default)]
    pub api_versions: Option<String>,
    #[serde(default)]
    pub kube_version: Option<String>,
    /// Chart root within a `git/repo` input artifact's extracted tree.
    #[serde(default)]
    pub helm_chart_file_path: Option<String>,
    #[serde(default = "default_helm_renderer")]
    pub template_renderer: TemplateRenderer,
}

impl Default for HelmBakeRequest {
    fn default() -> Self {
        HelmBakeRequest {
            output_name: String::new(),
            output_artifact_name: String::new(),
            input_artifacts: Vec::new(),
            overrides: BTreeMap::new(),
            raw_overrides: false,
            namespace: None,
            include_crds: false,
            api_versions: None,
            kube_version: None,
            helm_chart_file_path: None,
            template_renderer: default_helm_renderer(),
        }
    }
}

/// Bake request for the helmfile renderer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmfileBakeRequest {
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub output_artifact_name: String,
    #[serde(default)]
    pub input_artifacts: Vec<Artifact>,
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
    /// Helmfile environment to render for.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, rename = "includeCRDs")]
    pub include_crds: bool,
    /// Helmfile location within a `git/repo` input artifact's extracted tree.
    #[serde(default)]
    pub helmfile_file_path: Option<String>,
}

/// Bake request for the kustomize renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeBakeRequest {
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub output_artifact_name: String,
    /// The overlay descriptor (kustomization file) artifact.
    #[serde(default)]
    pub input_artifact: Option<Artifact>,
    #[serde(default = "default_kustomize_renderer")]
    pub template_renderer: TemplateRenderer,
}

impl Default for KustomizeBakeRequest {
    fn default() -> Self {
        KustomizeBakeRequest {
            output_name: String::new(),
            output_artifact_name: String::new(),
            input_artifact: None,
            template_renderer: default_kustomize_renderer(),
        }
    }
}

/// Bake request for the Jinja renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JinjaBakeRequest {
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub output_artifact_name: String,
    /// The 0th artifact is the template; the rest are values files.
    #[serde(default)]
    pub input_artifacts: Vec<Artifact>,
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_jinja_format")]
    pub input_format: String,
}

fn default_jinja_format() -> String {
    "yaml".to_string()
}

impl Default for JinjaBakeRequest {
    fn default() -> Self {
        JinjaBakeRequest {
            output_name: String::new(),
            output_artifact_name: String::new(),
            input_artifacts: Vec::new(),
            overrides: BTreeMap::new(),
            input_format: default_jinja_format(),
        }
    }
}

/// Bake request for Cloud Foundry manifest variable substitution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFoundryBakeRequest {
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub output_artifact_name: String,
    #[serde(default)]
    pub manifest_template: Option<Artifact>,
    #[serde(default)]
    pub vars_artifacts: Vec<Artifact>,
}
