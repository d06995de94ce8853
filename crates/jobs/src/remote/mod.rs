//! Remote-container-task backend: runs each bake as a serverless container
//! task, handing it the command, credentials and configuration through a
//! one-time secret-broker bundle rather than through its environment.

pub mod api;
pub mod broker;
pub mod context;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_core::{BakeResult, BakeState, BakeStatus, Error, JobRequest, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::config_files::read_config_files;
use crate::executor::JobExecutor;
use api::{
    ContainerTaskApi, CredentialExchange, RunTaskSpec, TaskDefinitionSpec, TaskLogStore, TaskState,
};
use broker::SecretBroker;
use context::JobContext;

const BACKEND: &str = "remote-task";
const LOGS_INIT_MESSAGE: &str = "Hang tight, the logs stream is being initialized...";
const JOB_CONTEXT_SECRET_PATH: &str = "cubbyhole/job-context";
const JOB_CONTEXT_SECRET_KEY: &str = "base64-encoded-job-context";
const SECRET_BROKER_ADDR_VAR: &str = "SECRET_BROKER_ADDR";
const SECRET_BROKER_TOKEN_VAR: &str = "SECRET_BROKER_TOKEN";
/// One use to write the context, one for the task to read it back.
const TOKEN_USES: u32 = 2;
/// How long the task has to collect its context bundle.
const TOKEN_TTL: Duration = Duration::from_secs(300);

static TASK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"arn:aws:ecs:.*?:task.*/(?P<task_id>.+)").expect("valid pattern"));

static ASSUMED_ROLE_ARN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arn:aws:sts::(?P<account>\d+):assumed-role/(?P<role>[^/]+)/.+")
        .expect("valid pattern")
});

/// Configuration for the remote-task backend.
#[derive(Debug, Clone)]
pub struct RemoteTaskConfig {
    pub cluster: Option<String>,
    pub subnets: Vec<String>,
    pub job_image: String,
    pub container_name: String,
    pub log_group: String,
    pub log_prefix: String,
    pub cpu: String,
    pub memory: String,
    /// How long the remote wrapper lets the bake command run.
    pub timeout: Duration,
    /// Role assumed per bake to mint credentials for the target account.
    pub bake_role: Option<String>,
    pub bake_role_external_id: Option<String>,
    /// Execution role for the task; derived from the caller identity when
    /// unset.
    pub execution_role: Option<String>,
    pub region: Option<String>,
    pub config_dir: PathBuf,
}

/// Runs bakes as serverless container tasks.
pub struct RemoteTaskExecutor {
    task_api: Arc<dyn ContainerTaskApi>,
    log_store: Arc<dyn TaskLogStore>,
    broker: Arc<dyn SecretBroker>,
    credentials: Arc<dyn CredentialExchange>,
    config: RemoteTaskConfig,
    config_files: BTreeMap<String, String>,
    task_definition: String,
    /// Last successfully fetched logs per task, served while the live
    /// stream is unavailable.
    last_logs: DashMap<String, String>,
}

impl RemoteTaskExecutor {
    /// Create the executor, registering the reusable task definition. Runs
    /// once at startup, before any bake is accepted.
    pub async fn provision(
        task_api: Arc<dyn ContainerTaskApi>,
        log_store: Arc<dyn TaskLogStore>,
        broker: Arc<dyn SecretBroker>,
        credentials: Arc<dyn CredentialExchange>,
        config: RemoteTaskConfig,
    ) -> Result<Self> {
        let config_files = read_config_files(&config.config_dir)?;

        let execution_role = match &config.execution_role {
            Some(role) => role.clone(),
            None => {
                let identity = credentials.caller_identity().await.map_err(|e| {
                    Error::backend_with_source(BACKEND, "failed to resolve caller identity", e)
                })?;
                let captures =
                    ASSUMED_ROLE_ARN_PATTERN
                        .captures(&identity.arn)
                        .ok_or_else(|| {
                            Error::backend(
                                BACKEND,
                                format!(
                                    "failed to extract a role name from caller identity '{}'",
                                    identity.arn
                                ),
                            )
                        })?;
                let role = format!(
                    "arn:aws:iam::{}:role/{}",
                    identity.account,
                    &captures["role"]
                );
                tracing::info!(%role, "using caller-derived execution role");
                role
            }
        };

        let spec = TaskDefinitionSpec {
            family: format!("kiln-job-task-{}", Uuid::new_v4()),
            image: config.job_image.clone(),
            container_name: config.container_name.clone(),
            entry_command: vec![
                "bash".to_string(),
                "/opt/kiln-job/run-bake-job.sh".to_string(),
            ],
            cpu: config.cpu.clone(),
            memory: config.memory.clone(),
            execution_role,
            log_group: config.log_group.clone(),
            log_prefix: config.log_prefix.clone(),
        };
        let task_definition = task_api.register_task_definition(spec).await.map_err(|e| {
            Error::backend_with_source(BACKEND, "failed to register task definition", e)
        })?;

        Ok(RemoteTaskExecutor {
            task_api,
            log_store,
            broker,
            credentials,
            config,
            config_files,
            task_definition,
            last_logs: DashMap::new(),
        })
    }

    /// Deregister the reusable task definition.
    pub async fn shutdown(&self) {
        if let Err(error) = self
            .task_api
            .deregister_task_definition(&self.task_definition)
            .await
        {
            tracing::warn!(%error, "failed to deregister task definition");
        }
    }

    /// Mint a two-use token, spend one use writing the job context, and
    /// return the token with its one remaining use for the task.
    async fn write_job_context(&self, job_id: &str, job_command: &str) -> Result<String> {
        let bake_role = self.config.bake_role.as_deref().ok_or_else(|| {
            Error::backend(BACKEND, "a bake role must be configured for remote task bakes")
        })?;

        let session = self
            .credentials
            .assume_role(
                bake_role,
                &format!("kiln-bake-{job_id}"),
                self.config.bake_role_external_id.clone(),
            )
            .await
            .map_err(|e| {
                Error::backend_with_source(
                    BACKEND,
                    format!("failed to assume role '{bake_role}' for bake {job_id}"),
                    e,
                )
            })?;

        let mut credentials = BTreeMap::new();
        credentials.insert("AWS_ACCESS_KEY_ID".to_string(), session.access_key_id);
        credentials.insert("AWS_SECRET_ACCESS_KEY".to_string(), session.secret_access_key);
        credentials.insert("AWS_SESSION_TOKEN".to_string(), session.session_token);
        if let Some(region) = &self.config.region {
            credentials.insert("AWS_DEFAULT_REGION".to_string(), region.clone());
        }

        let context = JobContext {
            job_command: job_command.to_string(),
            command_timeout: format!("{}m", self.config.timeout.as_secs() / 60),
            credentials,
            config_dir: "/opt/kiln/config".to_string(),
            config_files: self.config_files.clone(),
        };
        let bundle = context.encode()?;

        let token = self
            .broker
            .mint_scoped_token(&format!("kiln-job-token-{job_id}"), TOKEN_USES, TOKEN_TTL)
            .await
            .map_err(|e| {
                Error::backend_with_source(BACKEND, "failed to mint scoped broker token", e)
            })?;

        self.broker
            .write_secret(
                &token,
                JOB_CONTEXT_SECRET_PATH,
                json!({ JOB_CONTEXT_SECRET_KEY: bundle }),
            )
            .await
            .map_err(|e| {
                Error::backend_with_source(
                    BACKEND,
                    format!("failed to write job context for bake {job_id}"),
                    e,
                )
            })?;

        Ok(token)
    }

    fn log_stream(&self, task_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.log_prefix, self.config.container_name, task_id
        )
    }

    /// Paginate the log store with the forward token, stopping once the
    /// token stops advancing.
    async fn fetch_task_logs(&self, task_id: &str) -> api::ApiResult<String> {
        let stream = self.log_stream(task_id);
        let mut messages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .log_store
                .log_events(&self.config.log_group, &stream, token.clone())
                .await?;
            messages.extend(page.messages);
            match page.next_forward_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                _ => break,
            }
        }
        Ok(messages.join("\n"))
    }

    /// Best-effort logs: the live stream, else the last snapshot, else the
    /// initializing placeholder.
    async fn best_effort_logs(&self, task_id: &str) -> String {
        match self.fetch_task_logs(task_id).await {
            Ok(logs) => {
                self.last_logs.insert(task_id.to_string(), logs.clone());
                logs
            }
            Err(error) => {
                if !error.is_not_found() {
                    tracing::debug!(task_id, %error, "transient failure fetching task logs");
                }
                self.last_logs
                    .get(task_id)
                    .map(|snapshot| snapshot.clone())
                    .unwrap_or_else(|| LOGS_INIT_MESSAGE.to_string())
            }
        }
    }
}

#[async_trait]
impl JobExecutor for RemoteTaskExecutor {
    async fn start_job(&self, request: &JobRequest) -> Result<String> {
        let job_id = request.job_id.clone();
        if request.tokenized_command.is_empty() {
            return Err(Error::invalid_request(format!(
                "no command specified for {job_id}"
            )));
        }

        tracing::info!(
            %job_id,
            command = %request.masked_command().join(" "),
            "launching remote bake task",
        );

        let job_command = request.tokenized_command.join(" ");
        let token = self.write_job_context(&job_id, &job_command).await?;

        // Only the broker handoff rides in the environment; the command and
        // credentials stay inside the one-time bundle
        let spec = RunTaskSpec {
            task_definition: self.task_definition.clone(),
            cluster: self.config.cluster.clone(),
            subnets: self.config.subnets.clone(),
            container_name: self.config.container_name.clone(),
            env: vec![
                (
                    SECRET_BROKER_ADDR_VAR.to_string(),
                    self.broker.address().to_string(),
                ),
                (SECRET_BROKER_TOKEN_VAR.to_string(), token),
            ],
            tags: vec![("jobId".to_string(), job_id.clone())],
        };

        let task_arn = self.task_api.run_task(spec).await.map_err(|e| {
            Error::backend_with_source(BACKEND, format!("failed to run task for bake {job_id}"), e)
        })?;

        let task_id = TASK_ID_PATTERN
            .captures(&task_arn)
            .map(|captures| captures["task_id"].to_string())
            .ok_or_else(|| {
                Error::backend(
                    BACKEND,
                    format!("failed to extract a task id out of task arn '{task_arn}'"),
                )
            })?;

        tracing::info!(%job_id, %task_id, "remote bake task started");
        Ok(task_id)
    }

    async fn job_exists(&self, task_id: &str) -> bool {
        matches!(
            self.task_api
                .describe_task(self.config.cluster.clone(), task_id)
                .await,
            Ok(Some(_))
        )
    }

    async fn update_job(&self, task_id: &str) -> Option<BakeStatus> {
        let described = match self
            .task_api
            .describe_task(self.config.cluster.clone(), task_id)
            .await
        {
            Ok(described) => described,
            Err(error) => {
                tracing::debug!(task_id, %error, "transient failure polling task status");
                return None;
            }
        };

        // The task record lags the launch; report it as running until the
        // backend can see it
        let Some(task) = described else {
            return Some(
                BakeStatus::running(task_id).with_logs(LOGS_INIT_MESSAGE),
            );
        };

        let logs = self.best_effort_logs(task_id).await;
        let status = BakeStatus::running(task_id).with_logs(logs);

        if !task.is_stopped() {
            return Some(status);
        }

        let failed = task.container_exit_code.unwrap_or(1) != 0;
        let mut status = status;
        if failed {
            status.state = BakeState::Canceled;
            status.result = Some(BakeResult::Failure);
        } else {
            status.state = BakeState::Completed;
            status.result = Some(BakeResult::Success);
        }
        Some(status)
    }

    async fn cancel_job(&self, task_id: &str) {
        if !self.job_exists(task_id).await {
            return;
        }
        if let Err(error) = self
            .task_api
            .stop_task(
                self.config.cluster.clone(),
                task_id,
                "canceled via kiln api",
            )
            .await
        {
            tracing::warn!(task_id, %error, "failed to stop remote bake task");
        }
    }

    fn running_job_count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::api::{
        CallerIdentity, LogPage, MockContainerTaskApi, MockCredentialExchange, MockTaskLogStore,
        RemoteApiError, SessionCredentials,
    };
    use super::broker::MockSecretBroker;
    use super::*;

    fn test_config(dir: &std::path::Path) -> RemoteTaskConfig {
        RemoteTaskConfig {
            cluster: Some("bake-cluster".to_string()),
            subnets: vec!["subnet-1".to_string()],
            job_image: "kiln/remote-bake-job:latest".to_string(),
            container_name: "bake-job".to_string(),
            log_group: "kiln-jobs".to_string(),
            log_prefix: "kiln".to_string(),
            cpu: ".25 vCPU".to_string(),
            memory: "0.5 GB".to_string(),
            timeout: Duration::from_secs(1800),
            bake_role: Some("arn:aws:iam::123456789012:role/bake".to_string()),
            bake_role_external_id: None,
            execution_role: Some("arn:aws:iam::123456789012:role/kiln".to_string()),
            region: Some("us-west-2".to_string()),
            config_dir: dir.to_path_buf(),
        }
    }

    fn session() -> SessionCredentials {
        SessionCredentials {
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "shh".to_string(),
            session_token: "sess".to_string(),
        }
    }

    struct Mocks {
        task_api: MockContainerTaskApi,
        log_store: MockTaskLogStore,
        broker: MockSecretBroker,
        credentials: MockCredentialExchange,
    }

    impl Mocks {
        fn new() -> Self {
            let mut task_api = MockContainerTaskApi::new();
            task_api
                .expect_register_task_definition()
                .times(1)
                .returning(|_| Ok("arn:aws:ecs:us-west-2:123:task-definition/kiln:1".to_string()));
            Mocks {
                task_api,
                log_store: MockTaskLogStore::new(),
                broker: MockSecretBroker::new(),
                credentials: MockCredentialExchange::new(),
            }
        }

        async fn provision(self) -> (RemoteTaskExecutor, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("kiln.yml"), "bakery: {}\n").unwrap();
            let mut config = test_config(dir.path());
            config.config_dir = dir.path().to_path_buf();
            let executor = RemoteTaskExecutor::provision(
                Arc::new(self.task_api),
                Arc::new(self.log_store),
                Arc::new(self.broker),
                Arc::new(self.credentials),
                config,
            )
            .await
            .unwrap();
            (executor, dir)
        }
    }

    #[tokio::test]
    async fn derives_execution_role_from_caller_identity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kiln.yml"), "bakery: {}\n").unwrap();

        let mut task_api = MockContainerTaskApi::new();
        task_api
            .expect_register_task_definition()
            .withf(|spec: &TaskDefinitionSpec| {
                spec.execution_role == "arn:aws:iam::123456789012:role/kiln-service"
            })
            .times(1)
            .returning(|_| Ok("task-def-arn".to_string()));

        let mut credentials = MockCredentialExchange::new();
        credentials.expect_caller_identity().times(1).returning(|| {
            Ok(CallerIdentity {
                arn: "arn:aws:sts::123456789012:assumed-role/kiln-service/i-abc123".to_string(),
                account: "123456789012".to_string(),
            })
        });

        let mut config = test_config(dir.path());
        config.execution_role = None;

        RemoteTaskExecutor::provision(
            Arc::new(task_api),
            Arc::new(MockTaskLogStore::new()),
            Arc::new(MockSecretBroker::new()),
            Arc::new(credentials),
            config,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_job_hands_off_through_the_broker() {
        let mut mocks = Mocks::new();

        mocks
            .credentials
            .expect_assume_role()
            .withf(|role, session_name, external_id| {
                role == "arn:aws:iam::123456789012:role/bake"
                    && session_name.starts_with("kiln-bake-")
                    && external_id.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(session()));

        mocks
            .broker
            .expect_mint_scoped_token()
            .withf(|name, uses, ttl| {
                name.starts_with("kiln-job-token-") && *uses == 2 && *ttl == TOKEN_TTL
            })
            .times(1)
            .returning(|_, _, _| Ok("one-time-token".to_string()));

        mocks
            .broker
            .expect_write_secret()
            .withf(|token, path, payload| {
                if token != "one-time-token" || path != JOB_CONTEXT_SECRET_PATH {
                    return false;
                }
                let bundle = payload[JOB_CONTEXT_SECRET_KEY].as_str().unwrap();
                let context = JobContext::decode(bundle).unwrap();
                context.job_command == "helm template demo ./chart"
                    && context.command_timeout == "30m"
                    && context.credentials.get("AWS_SECRET_ACCESS_KEY").map(String::as_str)
                        == Some("shh")
                    && context.config_files.contains_key("kiln.yml")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        mocks
            .broker
            .expect_address()
            .return_const("https://broker:8200".to_string());

        mocks
            .task_api
            .expect_run_task()
            .withf(|spec: &RunTaskSpec| {
                let env: BTreeMap<_, _> = spec.env.iter().cloned().collect();
                env.get(SECRET_BROKER_TOKEN_VAR).map(String::as_str) == Some("one-time-token")
                    && env.get(SECRET_BROKER_ADDR_VAR).map(String::as_str)
                        == Some("https://broker:8200")
                    // Credentials and command must not leak into the task env
                    && env.len() == 2
            })
            .times(1)
            .returning(|_| {
                Ok("arn:aws:ecs:us-west-2:123456789012:task/bake-cluster/deadbeef42".to_string())
            });

        let (executor, _dir) = mocks.provision().await;
        let request = JobRequest::new(
            vec![
                "helm".to_string(),
                "template".to_string(),
                "demo".to_string(),
                "./chart".to_string(),
            ],
            None,
        );
        let task_id = executor.start_job(&request).await.unwrap();
        assert_eq!(task_id, "deadbeef42");
    }

    #[tokio::test]
    async fn invisible_task_reports_running_with_placeholder_logs() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| Ok(None));

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.state, BakeState::Running);
        assert_eq!(status.logs_content.as_deref(), Some(LOGS_INIT_MESSAGE));
    }

    #[tokio::test]
    async fn running_task_paginates_logs_until_the_token_stalls() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| {
            Ok(Some(TaskState {
                last_status: "RUNNING".to_string(),
                container_exit_code: None,
            }))
        });
        mocks
            .log_store
            .expect_log_events()
            .withf(|group, stream, _| group == "kiln-jobs" && stream == "kiln/bake-job/deadbeef42")
            .returning(|_, _, token| match token.as_deref() {
                None => Ok(LogPage {
                    messages: vec!["page one".to_string()],
                    next_forward_token: Some("t1".to_string()),
                }),
                Some("t1") => Ok(LogPage {
                    messages: vec!["page two".to_string()],
                    // Same token again: the stream is drained
                    next_forward_token: Some("t1".to_string()),
                }),
                Some(other) => panic!("unexpected token {other}"),
            });

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.state, BakeState::Running);
        assert_eq!(status.logs_content.as_deref(), Some("page one\npage two"));
    }

    #[tokio::test]
    async fn missing_log_stream_falls_back_to_the_last_snapshot() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| {
            Ok(Some(TaskState {
                last_status: "RUNNING".to_string(),
                container_exit_code: None,
            }))
        });

        let mut first = true;
        mocks.log_store.expect_log_events().returning(move |_, _, _| {
            if first {
                first = false;
                Ok(LogPage {
                    messages: vec!["captured earlier".to_string()],
                    next_forward_token: None,
                })
            } else {
                Err(RemoteApiError::not_found("log stream gone"))
            }
        });

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.logs_content.as_deref(), Some("captured earlier"));

        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.logs_content.as_deref(), Some("captured earlier"));
    }

    #[tokio::test]
    async fn stopped_task_with_nonzero_exit_is_canceled_failure() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| {
            Ok(Some(TaskState {
                last_status: "STOPPED".to_string(),
                container_exit_code: Some(1),
            }))
        });
        mocks.log_store.expect_log_events().returning(|_, _, _| {
            Ok(LogPage {
                messages: vec!["bake exploded".to_string()],
                next_forward_token: None,
            })
        });

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.state, BakeState::Canceled);
        assert_eq!(status.result, Some(BakeResult::Failure));
        assert!(status.logs_content.unwrap().contains("bake exploded"));
    }

    #[tokio::test]
    async fn stopped_task_without_exit_code_counts_as_failure() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| {
            Ok(Some(TaskState {
                last_status: "STOPPED".to_string(),
                container_exit_code: None,
            }))
        });
        mocks.log_store.expect_log_events().returning(|_, _, _| {
            Err(RemoteApiError::not_found("never created"))
        });

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.state, BakeState::Canceled);
        assert_eq!(status.result, Some(BakeResult::Failure));
    }

    #[tokio::test]
    async fn stopped_task_with_zero_exit_is_completed_success() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| {
            Ok(Some(TaskState {
                last_status: "STOPPED".to_string(),
                container_exit_code: Some(0),
            }))
        });
        mocks.log_store.expect_log_events().returning(|_, _, _| {
            Ok(LogPage {
                messages: vec!["rendered manifests".to_string()],
                next_forward_token: None,
            })
        });

        let (executor, _dir) = mocks.provision().await;
        let status = executor.update_job("deadbeef42").await.unwrap();
        assert_eq!(status.state, BakeState::Completed);
        assert_eq!(status.result, Some(BakeResult::Success));
    }

    #[tokio::test]
    async fn describe_errors_are_not_terminal() {
        let mut mocks = Mocks::new();
        mocks
            .task_api
            .expect_describe_task()
            .returning(|_, _| Err(RemoteApiError::other("throttled")));

        let (executor, _dir) = mocks.provision().await;
        assert!(executor.update_job("deadbeef42").await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_a_noop_for_missing_tasks() {
        let mut mocks = Mocks::new();
        mocks.task_api.expect_describe_task().returning(|_, _| Ok(None));
        // No stop_task expectation: calling it would fail the test

        let (executor, _dir) = mocks.provision().await;
        executor.cancel_job("deadbeef42").await;
    }
}
