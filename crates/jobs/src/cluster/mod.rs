//! Cluster-job backend: schedules each bake as a one-off job resource on a
//! container cluster, with the service's configuration directory mounted
//! from a shared read-only volume.

pub mod api;
pub mod http;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_core::{BakeResult, BakeState, BakeStatus, Error, JobRequest, Result};

use crate::config_files::read_config_files;
use crate::executor::JobExecutor;
use api::{ClusterJobApi, ClusterJobSpec};

pub use http::{HttpClusterJobApi, HttpClusterJobApiConfig};

const BACKEND: &str = "cluster-job";
const JOB_NAME_PREFIX: &str = "kiln-job-";
const CONFIG_VOLUME_PREFIX: &str = "kiln-config";

/// Command-line parameters that must also be visible to the job as
/// environment variables, so credentials don't have to be spelled out in
/// user templates. Keeping them out of the raw command also avoids
/// command-line length limits on large session tokens.
const PARAMETERS_TO_ENV_VARS: &[(&str, &str)] = &[
    ("aws_access_key", "AWS_ACCESS_KEY_ID"),
    ("aws_secret_key", "AWS_SECRET_ACCESS_KEY"),
    ("aws_session_token", "AWS_SESSION_TOKEN"),
    ("aws_region", "AWS_DEFAULT_REGION"),
];

/// Configuration for the cluster-job backend.
#[derive(Debug, Clone)]
pub struct ClusterJobConfig {
    /// Image the bake job container runs.
    pub job_image: String,
    /// Local directory whose files seed the shared config volume.
    pub config_dir: PathBuf,
    /// Where the config volume is mounted inside the job container.
    pub config_mount_path: String,
    /// How long a job may run before the cluster kills it.
    pub timeout: Duration,
}

/// Runs bakes as cluster-scheduled jobs.
pub struct ClusterJobExecutor {
    api: Arc<dyn ClusterJobApi>,
    config: ClusterJobConfig,
    config_volume: String,
}

impl ClusterJobExecutor {
    /// Create the executor, provisioning the shared config volume from the
    /// local configuration directory. Runs once at startup, before any bake
    /// is accepted; the volume is reused read-only by every job.
    pub async fn provision(api: Arc<dyn ClusterJobApi>, config: ClusterJobConfig) -> Result<Self> {
        let files = read_config_files(&config.config_dir)?;
        let config_volume = api
            .create_config_volume(CONFIG_VOLUME_PREFIX, &files)
            .await
            .map_err(|e| {
                Error::backend_with_source(BACKEND, "failed to create shared config volume", e)
            })?;
        tracing::info!(
            volume = %config_volume,
            files = files.len(),
            "provisioned cluster config volume",
        );
        Ok(ClusterJobExecutor {
            api,
            config,
            config_volume,
        })
    }

    fn job_name(job_id: &str) -> String {
        format!("{JOB_NAME_PREFIX}{job_id}")
    }
}

/// Pull the whitelisted credential-shaped `key=value` tokens out of the
/// command so they can ride along as environment variables.
fn env_vars_from_command(tokenized_command: &[String]) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    for token in tokenized_command {
        if let Some((key, value)) = token.split_once('=') {
            parameters.insert(key.to_string(), value.to_string());
        }
    }

    PARAMETERS_TO_ENV_VARS
        .iter()
        .filter_map(|(parameter, env_var)| {
            parameters
                .get(*parameter)
                .map(|value| (env_var.to_string(), value.clone()))
        })
        .collect()
}

#[async_trait]
impl JobExecutor for ClusterJobExecutor {
    async fn start_job(&self, request: &JobRequest) -> Result<String> {
        let job_id = request.job_id.clone();
        if request.tokenized_command.is_empty() {
            return Err(Error::invalid_request(format!(
                "no command specified for {job_id} (execution id: {})",
                request.execution_id.as_deref().unwrap_or("unset")
            )));
        }

        tracing::info!(
            %job_id,
            execution_id = request.execution_id.as_deref().unwrap_or("unset"),
            command = %request.masked_command().join(" "),
            "scheduling bake job on cluster",
        );

        let mut labels = BTreeMap::new();
        labels.insert("jobId".to_string(), job_id.clone());
        labels.insert(
            "executionId".to_string(),
            request
                .execution_id
                .clone()
                .unwrap_or_else(|| "unset".to_string()),
        );
        labels.insert("kiln-bake".to_string(), "true".to_string());

        let spec = ClusterJobSpec {
            name: Self::job_name(&job_id),
            labels,
            image: self.config.job_image.clone(),
            command: request.tokenized_command.clone(),
            env: env_vars_from_command(&request.tokenized_command),
            config_volume: self.config_volume.clone(),
            config_mount_path: self.config.config_mount_path.clone(),
            active_deadline: self.config.timeout,
        };

        self.api.create_job(spec).await.map_err(|e| {
            Error::backend_with_source(BACKEND, format!("failed to start job {job_id}"), e)
        })?;

        Ok(job_id)
    }

    async fn job_exists(&self, job_id: &str) -> bool {
        match self
            .api
            .has_job_with_label(&format!("jobId={job_id}"))
            .await
        {
            Ok(exists) => exists,
            Err(error) => {
                tracing::warn!(job_id, %error, "failed to query cluster for job");
                false
            }
        }
    }

    async fn update_job(&self, job_id: &str) -> Option<BakeStatus> {
        let job_name = Self::job_name(job_id);

        let state = match self.api.read_job(&job_name).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!(job_id, "job resource not visible yet");
                return None;
            }
            Err(error) => {
                tracing::debug!(job_id, %error, "transient failure polling job status");
                return None;
            }
        };

        let mut status = BakeStatus::running(job_id);

        // Best effort: while the pod is still being created the log read
        // fails, which must not fail the poll
        match self.api.pod_logs(&job_name).await {
            Ok(Some(logs)) => status = status.with_logs(logs),
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(job_id, %error, "pod logs not available yet");
            }
        }

        if state.failed > 0 {
            if let Err(error) = self.api.delete_job(&job_name).await {
                // May orphan the job; the active deadline bounds its
                // lifetime either way
                tracing::error!(job_id, %error, "failed to delete errored cluster job");
            }
            status.state = BakeState::Canceled;
            status.result = Some(BakeResult::Failure);
            return Some(status);
        }

        if state.completion_time.is_some() {
            status.state = BakeState::Completed;
            status.result = Some(BakeResult::Success);
        }

        Some(status)
    }

    async fn cancel_job(&self, job_id: &str) {
        tracing::info!(job_id, "canceling cluster bake job");
        if let Err(error) = self.api.delete_job(&Self::job_name(job_id)).await {
            tracing::warn!(job_id, %error, "failed to delete cluster job on cancel");
        }
    }

    fn running_job_count(&self) -> usize {
        0
    }
}
