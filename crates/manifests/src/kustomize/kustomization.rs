//! The overlay descriptor document (a kustomization file), read-only once
//! parsed.

use serde::Deserialize;

/// A JSON-6902 patch entry; only its target file matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Json6902Patch {
    #[serde(default)]
    pub path: Option<String>,
}

/// The subset of a kustomization document the dependency resolver needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Kustomization {
    pub resources: Vec<String>,
    pub bases: Vec<String>,
    pub components: Vec<String>,
    #[serde(rename = "patchesStrategicMerge")]
    pub patches_strategic_merge: Vec<String>,
    #[serde(rename = "patchesJson6902")]
    pub patches_json6902: Vec<Json6902Patch>,
    pub configurations: Vec<String>,
    pub crds: Vec<String>,
    pub generators: Vec<String>,
    pub transformers: Vec<String>,
}

impl Kustomization {
    /// Entries that are known to be concrete leaf files, collected for
    /// download directly.
    #[must_use]
    pub fn files_to_download(&self) -> Vec<&str> {
        self.patches_strategic_merge
            .iter()
            .map(String::as_str)
            .chain(self.patches_json6902.iter().filter_map(|p| p.path.as_deref()))
            .chain(self.configurations.iter().map(String::as_str))
            .chain(self.crds.iter().map(String::as_str))
            .chain(self.generators.iter().map(String::as_str))
            .chain(self.transformers.iter().map(String::as_str))
            .collect()
    }

    /// Entries that may point at further overlay descriptors and must be
    /// classified before downloading.
    #[must_use]
    pub fn files_to_evaluate(&self) -> Vec<&str> {
        self.resources
            .iter()
            .chain(self.bases.iter())
            .chain(self.components.iter())
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_overlay() {
        let kustomization: Kustomization = serde_yaml::from_str(
            "resources:\n\
             - deployment.yaml\n\
             bases:\n\
             - ../base\n\
             patchesStrategicMerge:\n\
             - cpu-limits.yaml\n\
             patchesJson6902:\n\
             - target:\n    kind: Deployment\n    name: demo\n  path: replica-patch.yaml\n",
        )
        .unwrap();

        assert_eq!(kustomization.files_to_evaluate(), vec!["deployment.yaml", "../base"]);
        assert_eq!(
            kustomization.files_to_download(),
            vec!["cpu-limits.yaml", "replica-patch.yaml"]
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let kustomization: Kustomization = serde_yaml::from_str(
            "apiVersion: kustomize.config.k8s.io/v1beta1\n\
             kind: Kustomization\n\
             namePrefix: dev-\n\
             resources:\n\
             - service.yaml\n",
        )
        .unwrap();
        assert_eq!(kustomization.files_to_evaluate(), vec!["service.yaml"]);
    }
}
