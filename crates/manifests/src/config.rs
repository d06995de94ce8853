//! Renderer configuration: executable locations per tool major version and
//! the override-payload size threshold.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub v2_executable_path: String,
    pub v3_executable_path: String,
    /// Serialized override payloads at or above this many bytes are written
    /// to a generated values file instead of an inline flag. 0 disables the
    /// size check.
    pub overrides_file_threshold: usize,
}

impl Default for HelmConfig {
    fn default() -> Self {
        HelmConfig {
            v2_executable_path: "helm2".to_string(),
            v3_executable_path: "helm3".to_string(),
            overrides_file_threshold: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmfileConfig {
    pub executable_path: String,
}

impl Default for HelmfileConfig {
    fn default() -> Self {
        HelmfileConfig {
            executable_path: "helmfile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KustomizeConfig {
    pub executable_path: String,
    pub v4_executable_path: String,
}

impl Default for KustomizeConfig {
    fn default() -> Self {
        KustomizeConfig {
            executable_path: "kustomize".to_string(),
            v4_executable_path: "kustomize4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JinjaConfig {
    pub executable_path: String,
}

impl Default for JinjaConfig {
    fn default() -> Self {
        JinjaConfig {
            executable_path: "jinja2".to_string(),
        }
    }
}

/// Configuration for every renderer family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub helm: HelmConfig,
    pub helmfile: HelmfileConfig,
    pub kustomize: KustomizeConfig,
    pub jinja: JinjaConfig,
}
