//! Collaborator interface for the cluster-job backend: a
//! container-orchestration API exposing job create/read/delete, config
//! volume creation, and pod log reads by label selector.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Error from the cluster API, carrying the response status when one was
/// received. These are transient from the poll loop's point of view.
#[derive(Debug, thiserror::Error)]
#[error("{}", format_api_error(.code, .message))]
pub struct ClusterApiError {
    pub code: Option<u16>,
    pub message: String,
}

impl ClusterApiError {
    #[must_use]
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        ClusterApiError {
            code,
            message: message.into(),
        }
    }
}

fn format_api_error(code: &Option<u16>, message: &str) -> String {
    match code {
        Some(code) => format!("cluster API responded with status {code}: {message}"),
        None => format!("cluster API request failed: {message}"),
    }
}

pub type ApiResult<T> = std::result::Result<T, ClusterApiError>;

/// One job resource to be scheduled on the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterJobSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Name of the shared configuration volume to mount read-only.
    pub config_volume: String,
    /// Where the configuration volume is mounted inside the container.
    pub config_mount_path: String,
    pub active_deadline: Duration,
}

/// The status fields of a job resource that the poll loop cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterJobState {
    /// Set once the job has run to successful completion.
    pub completion_time: Option<String>,
    /// Number of failed pod attempts.
    pub failed: u32,
}

/// Container-orchestration API consumed by the cluster-job backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterJobApi: Send + Sync {
    /// Create a read-only configuration volume from a filename → contents
    /// map; returns the generated volume name.
    async fn create_config_volume(
        &self,
        name_prefix: &str,
        data: &BTreeMap<String, String>,
    ) -> ApiResult<String>;

    async fn create_job(&self, spec: ClusterJobSpec) -> ApiResult<()>;

    /// Read a job's status fields; `None` when the resource does not exist.
    async fn read_job(&self, name: &str) -> ApiResult<Option<ClusterJobState>>;

    async fn delete_job(&self, name: &str) -> ApiResult<()>;

    /// Whether any job matches the given label selector.
    async fn has_job_with_label(&self, label_selector: &str) -> ApiResult<bool>;

    /// Logs of the job's single pod; `None` while the pod does not exist
    /// yet.
    async fn pod_logs(&self, job_name: &str) -> ApiResult<Option<String>>;
}
