//! Local process backend: runs the bake command as a child process of the
//! service itself.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_core::{BakeResult, BakeState, BakeStatus, Error, JobRequest, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::executor::JobExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Running,
    Finished(BakeState, BakeResult),
}

struct JobHandle {
    /// Process group leader, used to signal the whole group.
    pid: Option<i32>,
    output: Arc<Mutex<String>>,
    state: Arc<Mutex<ExecutionState>>,
}

/// Executes bake commands as local child processes.
///
/// Stdout and stderr are captured incrementally into one merged buffer so a
/// poll mid-run sees partial logs. Exit code 0 maps to
/// `Completed`/`Success`, a non-zero exit to `Completed`/`Failure`, and
/// death by signal (cancellation, timeout) to `Canceled`/`Failure`.
pub struct LocalJobExecutor {
    timeout: Duration,
    jobs: DashMap<String, JobHandle>,
}

impl LocalJobExecutor {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        LocalJobExecutor {
            timeout,
            jobs: DashMap::new(),
        }
    }
}

#[async_trait]
impl JobExecutor for LocalJobExecutor {
    async fn start_job(&self, request: &JobRequest) -> Result<String> {
        let job_id = request.job_id.clone();
        let (program, args) = request
            .tokenized_command
            .split_first()
            .ok_or_else(|| Error::invalid_request(format!("no command specified for {job_id}")))?;

        tracing::info!(
            %job_id,
            execution_id = request.execution_id.as_deref().unwrap_or("unset"),
            command = %request.masked_command().join(" "),
            "executing bake command locally",
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // New process group so cancellation reaches grandchildren too
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::backend_with_source("local", format!("failed to spawn '{program}'"), e)
        })?;
        let pid = child.id().map(|id| id as i32);

        let output = Arc::new(Mutex::new(String::new()));
        let state = Arc::new(Mutex::new(ExecutionState::Running));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_stream(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_stream(stderr, Arc::clone(&output)));
        }

        self.jobs.insert(
            job_id.clone(),
            JobHandle {
                pid,
                output: Arc::clone(&output),
                state: Arc::clone(&state),
            },
        );

        let timeout = self.timeout;
        let supervisor_job_id = job_id.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(exit)) => {
                    if exit.success() {
                        (BakeState::Completed, BakeResult::Success)
                    } else if exit.code().is_some() {
                        (BakeState::Completed, BakeResult::Failure)
                    } else {
                        // Killed by signal: cancellation rather than a
                        // command-reported failure
                        (BakeState::Canceled, BakeResult::Failure)
                    }
                }
                Ok(Err(error)) => {
                    tracing::error!(job_id = %supervisor_job_id, %error, "failed to await bake process");
                    (BakeState::Canceled, BakeResult::Failure)
                }
                Err(_) => {
                    tracing::warn!(
                        job_id = %supervisor_job_id,
                        ?timeout,
                        "bake process timed out, killing process group",
                    );
                    signal_group(pid);
                    let _ = child.wait().await;
                    if let Ok(mut buffer) = output.lock() {
                        buffer.push_str("\nbake timed out and was killed\n");
                    }
                    (BakeState::Canceled, BakeResult::Failure)
                }
            };

            if let Ok(mut current) = state.lock() {
                // Terminal states are write-once
                if *current == ExecutionState::Running {
                    *current = ExecutionState::Finished(outcome.0, outcome.1);
                }
            }
        });

        Ok(job_id)
    }

    async fn job_exists(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    async fn update_job(&self, job_id: &str) -> Option<BakeStatus> {
        let handle = self.jobs.get(job_id)?;
        let logs = handle
            .output
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default();
        let state = handle.state.lock().map(|s| *s).ok()?;

        let status = match state {
            ExecutionState::Running => BakeStatus::running(job_id),
            ExecutionState::Finished(state, result) => BakeStatus::terminal(job_id, state, result),
        };
        Some(status.with_logs(logs))
    }

    async fn cancel_job(&self, job_id: &str) {
        let Some(handle) = self.jobs.get(job_id) else {
            return;
        };
        let running = handle
            .state
            .lock()
            .map(|s| *s == ExecutionState::Running)
            .unwrap_or(false);
        if running {
            tracing::info!(job_id, "canceling local bake job");
            signal_group(handle.pid);
        }
    }

    fn running_job_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| {
                entry
                    .state
                    .lock()
                    .map(|s| *s == ExecutionState::Running)
                    .unwrap_or(false)
            })
            .count()
    }
}

async fn capture_stream<R>(mut stream: R, output: Arc<Mutex<String>>)
where
    R: AsyncReadExt + Unpin,
{
    let mut buffer = [0u8; 4096];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buffer[..n]).into_owned();
                if let Ok(mut merged) = output.lock() {
                    merged.push_str(&chunk);
                }
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<i32>) {
    if let Some(pid) = pid {
        // Negative pid addresses the whole process group
        unsafe {
            libc::kill(-pid, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<i32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::JOB_POLL_INTERVAL;

    fn request(command: &[&str]) -> JobRequest {
        JobRequest::new(command.iter().map(ToString::to_string).collect(), None)
    }

    async fn poll_until_terminal(executor: &LocalJobExecutor, job_id: &str) -> BakeStatus {
        loop {
            if let Some(status) = executor.update_job(job_id).await {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(JOB_POLL_INTERVAL / 10).await;
        }
    }

    #[tokio::test]
    async fn successful_command_completes_with_captured_output() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        let job_id = executor
            .start_job(&request(&["sh", "-c", "echo baked"]))
            .await
            .unwrap();

        let status = poll_until_terminal(&executor, &job_id).await;
        assert_eq!(status.state, BakeState::Completed);
        assert_eq!(status.result, Some(BakeResult::Success));
        assert!(status.logs_content.unwrap().contains("baked"));
    }

    #[tokio::test]
    async fn failing_command_reports_failure_with_stderr() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        let job_id = executor
            .start_job(&request(&["sh", "-c", "echo broken >&2; exit 3"]))
            .await
            .unwrap();

        let status = poll_until_terminal(&executor, &job_id).await;
        assert_eq!(status.state, BakeState::Completed);
        assert_eq!(status.result, Some(BakeResult::Failure));
        assert!(status.logs_content.unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn canceled_job_never_reports_running_again() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        let job_id = executor
            .start_job(&request(&["sh", "-c", "sleep 30"]))
            .await
            .unwrap();

        assert!(executor.job_exists(&job_id).await);
        executor.cancel_job(&job_id).await;

        let status = poll_until_terminal(&executor, &job_id).await;
        assert_eq!(status.state, BakeState::Canceled);
        assert_eq!(status.result, Some(BakeResult::Failure));

        // Terminal state is sticky across subsequent polls
        for _ in 0..3 {
            let status = executor.update_job(&job_id).await.unwrap();
            assert_ne!(status.state, BakeState::Running);
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_job_and_marks_it_canceled() {
        let executor = LocalJobExecutor::new(Duration::from_millis(200));
        let job_id = executor
            .start_job(&request(&["sh", "-c", "sleep 30"]))
            .await
            .unwrap();

        let status = poll_until_terminal(&executor, &job_id).await;
        assert_eq!(status.state, BakeState::Canceled);
        assert!(status.logs_content.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_command_is_rejected_before_spawn() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        let err = executor.start_job(&request(&[])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn running_job_count_tracks_live_jobs() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        assert_eq!(executor.running_job_count(), 0);

        let job_id = executor
            .start_job(&request(&["sh", "-c", "sleep 5"]))
            .await
            .unwrap();
        assert_eq!(executor.running_job_count(), 1);

        executor.cancel_job(&job_id).await;
        poll_until_terminal(&executor, &job_id).await;
        assert_eq!(executor.running_job_count(), 0);
    }

    #[tokio::test]
    async fn unknown_job_yields_no_update() {
        let executor = LocalJobExecutor::new(Duration::from_secs(30));
        assert!(executor.update_job("no-such-job").await.is_none());
    }
}
