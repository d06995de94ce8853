use async_trait::async_trait;
use kiln_core::{BakeStatus, JobRequest, Result};

/// Trait for running bake commands as asynchronous jobs.
///
/// Implementations identify jobs with a backend-native string: the local
/// backend echoes the request's job id, the cluster backend derives a job
/// resource name from it, the remote backend returns the launched task id.
///
/// The state machine is shared across backends: a successfully started job
/// is `Running` and eventually transitions to exactly one of
/// `Completed`/`Success`, `Completed`/`Failure` or `Canceled`/`Failure`.
/// Terminal states never revert for a given job id.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Provision and launch the unit of work. Safe to call concurrently for
    /// unrelated requests.
    async fn start_job(&self, request: &JobRequest) -> Result<String>;

    /// Whether the backend still has a record of the job.
    async fn job_exists(&self, job_id: &str) -> bool;

    /// Non-blocking single poll.
    ///
    /// Returns `None` — not an error — when the backend has no information
    /// yet (e.g. the remote job record is not visible) or when the status
    /// query failed transiently. The caller retries on the next poll tick.
    async fn update_job(&self, job_id: &str) -> Option<BakeStatus>;

    /// Request termination. No-op if the job no longer exists.
    async fn cancel_job(&self, job_id: &str);

    /// Number of jobs currently running in-process. Remote backends
    /// return 0.
    fn running_job_count(&self) -> usize;
}
