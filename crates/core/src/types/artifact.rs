use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::EMBEDDED_BASE64_ARTIFACT_TYPE;

/// A reference to an input or output of a bake.
///
/// `reference` is a location string (URL or path) whose interpretation
/// depends on `artifact_type`; for `git/repo` artifacts it names a tarball.
/// Identity is structural: two artifacts with equal fields are the same
/// artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    /// An artifact whose reference embeds the payload itself, base64 encoded.
    #[must_use]
    pub fn embedded_base64(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Artifact {
            artifact_type: Some(EMBEDDED_BASE64_ARTIFACT_TYPE.to_string()),
            name: Some(name.into()),
            reference: Some(reference.into()),
            ..Artifact::default()
        }
    }

    /// A copy of this artifact pointing at a different reference, keeping the
    /// account and type so the fetcher resolves it the same way.
    #[must_use]
    pub fn with_reference(&self, reference: impl Into<String>) -> Self {
        Artifact {
            reference: Some(reference.into()),
            name: self.name.clone(),
            artifact_type: self.artifact_type.clone(),
            artifact_account: self.artifact_account.clone(),
            location: self.location.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// The artifact type, or the empty string when unset.
    #[must_use]
    pub fn type_or_default(&self) -> &str {
        self.artifact_type.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        let artifact = Artifact {
            artifact_type: Some("git/repo".to_string()),
            name: Some("org/repo".to_string()),
            reference: Some("https://api.github.com/repos/org/repo/tarball".to_string()),
            ..Artifact::default()
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "git/repo");
        assert_eq!(json["name"], "org/repo");
        assert!(json.get("artifactAccount").is_none());
    }

    #[test]
    fn identity_is_structural() {
        let a = Artifact::embedded_base64("out", "aGVsbG8=");
        let b = Artifact::embedded_base64("out", "aGVsbG8=");
        assert_eq!(a, b);
    }
}
