//! Collaborator interfaces for the remote-container-task backend: the
//! container-task-execution API, the paginated log store, and the
//! short-lived-credential exchange.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Error from a remote collaborator API. `NotFound` is distinguished so the
/// backend can fall back (missing log stream) or report "no record yet".
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RemoteApiError {
    pub kind: RemoteApiErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApiErrorKind {
    /// The addressed resource does not exist (yet).
    NotFound,
    /// Anything else; treated as transient by the poll loop.
    Other,
}

impl RemoteApiError {
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        RemoteApiError {
            kind: RemoteApiErrorKind::NotFound,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        RemoteApiError {
            kind: RemoteApiErrorKind::Other,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteApiErrorKind::NotFound
    }
}

pub type ApiResult<T> = std::result::Result<T, RemoteApiError>;

/// A reusable task definition wrapping the generic bake entrypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionSpec {
    pub family: String,
    pub image: String,
    pub container_name: String,
    /// Command the container runs; the per-bake command arrives via the
    /// secret-broker context bundle instead.
    pub entry_command: Vec<String>,
    pub cpu: String,
    pub memory: String,
    pub execution_role: String,
    pub log_group: String,
    pub log_prefix: String,
}

/// One launch of the registered task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTaskSpec {
    pub task_definition: String,
    pub cluster: Option<String>,
    pub subnets: Vec<String>,
    pub container_name: String,
    /// Environment handed to the container; for bakes this carries only the
    /// secret-broker address and the one-use-remaining token.
    pub env: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

/// Status fields of a launched task that the poll loop cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    /// Lifecycle status string; `STOPPED` is terminal.
    pub last_status: String,
    /// Exit code of the bake container once stopped.
    pub container_exit_code: Option<i32>,
}

impl TaskState {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.last_status == "STOPPED"
    }
}

/// Container-task-execution API consumed by the remote backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerTaskApi: Send + Sync {
    /// Register the reusable task definition; returns its identifier.
    async fn register_task_definition(&self, spec: TaskDefinitionSpec) -> ApiResult<String>;

    async fn deregister_task_definition(&self, task_definition: &str) -> ApiResult<()>;

    /// Launch a task; returns the task ARN.
    async fn run_task(&self, spec: RunTaskSpec) -> ApiResult<String>;

    /// Describe a task by id; `None` when the task is not visible (yet).
    async fn describe_task(
        &self,
        cluster: Option<String>,
        task_id: &str,
    ) -> ApiResult<Option<TaskState>>;

    async fn stop_task(&self, cluster: Option<String>, task_id: &str, reason: &str)
        -> ApiResult<()>;
}

/// One page of log events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPage {
    pub messages: Vec<String>,
    /// Token for the next page; pagination stops when it stops advancing.
    pub next_forward_token: Option<String>,
}

/// Paginated log-retrieval API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    async fn log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        forward_token: Option<String>,
    ) -> ApiResult<LogPage>;
}

/// Short-lived credentials for the target cloud account.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// The identity this service itself runs as.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerIdentity {
    pub arn: String,
    pub account: String,
}

/// Short-lived-credential exchange API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        external_id: Option<String>,
    ) -> ApiResult<SessionCredentials>;

    async fn caller_identity(&self) -> ApiResult<CallerIdentity>;
}
