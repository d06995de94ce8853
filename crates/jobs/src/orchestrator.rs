//! Bake orchestration: submit a recipe to a job executor and poll it to a
//! terminal state.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{
    Artifact, BakeRecipe, BakeResult, BakeStatus, Error, JobRequest, Result, JOB_POLL_INTERVAL,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::executor::JobExecutor;

/// Drives one bake at a time from recipe to rendered artifact.
///
/// Each bake gets a fresh unique job id; the poll loop runs at a fixed
/// one-second cadence and treats "no update" as a retry, never a failure.
/// External cancellation issues `cancel_job` before unwinding.
pub struct Orchestrator {
    executor: Arc<dyn JobExecutor>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Orchestrator { executor }
    }

    /// Run the recipe to a successful terminal status.
    ///
    /// A terminal status that is not a success becomes
    /// [`Error::ExecutionFailed`] carrying the captured logs.
    pub async fn run(
        &self,
        recipe: &BakeRecipe,
        execution_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<BakeStatus> {
        let request = JobRequest::new(recipe.command.clone(), execution_id);
        let job_id = self.executor.start_job(&request).await?;

        let status = self.poll_to_terminal(&job_id, cancel).await?;

        match status.result {
            Some(BakeResult::Success) => Ok(status),
            _ => Err(Error::execution_failed(
                &recipe.name,
                status.logs_content.unwrap_or_default(),
            )),
        }
    }

    /// Run the recipe to completion and wrap its output as a base64-embedded
    /// artifact.
    pub async fn bake(
        &self,
        recipe: &BakeRecipe,
        output_artifact_name: &str,
        execution_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let status = self.run(recipe, execution_id, cancel).await?;
        let output = status.output_content.unwrap_or_default();
        Ok(Artifact::embedded_base64(
            output_artifact_name,
            STANDARD.encode(output),
        ))
    }

    async fn poll_to_terminal(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BakeStatus> {
        loop {
            if let Some(status) = self.executor.update_job(job_id).await {
                if status.is_terminal() {
                    return Ok(status);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(job_id, "bake interrupted, canceling job");
                    self.executor.cancel_job(job_id).await;
                    return Err(Error::canceled(job_id));
                }
                () = sleep(JOB_POLL_INTERVAL) => {}
            }
        }
    }
}
