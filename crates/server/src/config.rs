//! Service configuration: a `kiln.toml` file with serde defaults for every
//! field, so an empty file (or none at all) yields a runnable local setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_core::{Error, Result};
use kiln_manifests::RendererConfig;
use serde::{Deserialize, Serialize};

/// Which job execution backend bakes run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Cluster,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP server binds.
    pub listen_address: String,
    /// Base URL of the artifact resolver service.
    pub artifact_resolver_url: String,
    pub renderers: RendererConfig,
    pub execution: ExecutionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_address: "0.0.0.0:8087".to_string(),
            artifact_resolver_url: "http://localhost:7002".to_string(),
            renderers: RendererConfig::default(),
            execution: ExecutionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub backend: BackendKind,
    /// Local directory of configuration files shipped to remote jobs.
    pub config_dir: PathBuf,
    pub local: LocalSettings,
    pub cluster: ClusterSettings,
    pub remote: RemoteSettings,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        ExecutionSettings {
            backend: BackendKind::Local,
            config_dir: PathBuf::from("/opt/kiln/config"),
            local: LocalSettings::default(),
            cluster: ClusterSettings::default(),
            remote: RemoteSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub timeout_minutes: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings { timeout_minutes: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Base URL of the cluster API server.
    pub api_url: String,
    pub api_token: Option<String>,
    pub namespace: String,
    pub job_image: String,
    /// Where the config volume is mounted inside job containers.
    pub config_mount_path: String,
    pub timeout_minutes: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            api_url: "https://kubernetes.default.svc".to_string(),
            api_token: None,
            namespace: "kiln-jobs".to_string(),
            job_image: "kiln/bake-job:latest".to_string(),
            config_mount_path: "/opt/kiln/config".to_string(),
            timeout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub cluster: Option<String>,
    pub subnets: Vec<String>,
    pub job_image: String,
    pub container_name: String,
    pub log_group: String,
    pub log_prefix: String,
    pub cpu: String,
    pub memory: String,
    pub timeout_minutes: u64,
    /// Role assumed per bake for the target account.
    pub bake_role: Option<String>,
    pub bake_role_external_id: Option<String>,
    /// Execution role for tasks; derived from the caller identity when
    /// unset.
    pub execution_role: Option<String>,
    pub region: Option<String>,
    pub secret_broker_address: Option<String>,
    pub secret_broker_token: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            cluster: None,
            subnets: Vec::new(),
            job_image: "kiln/remote-bake-job:latest".to_string(),
            container_name: "bake-job".to_string(),
            log_group: "kiln-jobs".to_string(),
            log_prefix: "kiln".to_string(),
            cpu: ".25 vCPU".to_string(),
            memory: "0.5 GB".to_string(),
            timeout_minutes: 30,
            bake_role: None,
            bake_role_external_id: None,
            execution_role: None,
            region: None,
            secret_broker_address: None,
            secret_broker_token: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, or fall back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read configuration", e))?;
        toml::from_str(&contents).map_err(|e| {
            Error::configuration(format!("failed to parse '{}': {e}", path.display()))
        })
    }

    /// A serializable snapshot of the effective configuration with secret
    /// fields removed, for startup logging.
    #[must_use]
    pub fn redacted_summary(&self) -> BTreeMap<String, String> {
        let mut summary = BTreeMap::new();
        summary.insert("listenAddress".to_string(), self.listen_address.clone());
        summary.insert(
            "artifactResolverUrl".to_string(),
            self.artifact_resolver_url.clone(),
        );
        summary.insert(
            "backend".to_string(),
            format!("{:?}", self.execution.backend).to_lowercase(),
        );
        summary
    }
}
