use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a bake job.
///
/// The state is monotone for a given job id: once `Completed` or `Canceled`
/// has been observed the job never reports `Running` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BakeState {
    Running,
    Completed,
    Canceled,
}

impl BakeState {
    /// Whether no further transitions can occur.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, BakeState::Completed | BakeState::Canceled)
    }
}

/// Outcome of a bake job, set only once the state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BakeResult {
    Success,
    Failure,
}

/// A single observation of a bake job, as returned by `JobExecutor::update_job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BakeStatus {
    pub id: String,
    pub state: BakeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BakeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_content: Option<String>,
}

impl BakeStatus {
    /// A running status with no captured output yet.
    #[must_use]
    pub fn running(id: impl Into<String>) -> Self {
        BakeStatus {
            id: id.into(),
            state: BakeState::Running,
            result: None,
            logs_content: None,
            output_content: None,
        }
    }

    /// A terminal status.
    #[must_use]
    pub fn terminal(id: impl Into<String>, state: BakeState, result: BakeResult) -> Self {
        BakeStatus {
            id: id.into(),
            state,
            result: Some(result),
            logs_content: None,
            output_content: None,
        }
    }

    /// Attach captured logs, mirroring them into the output slot when no
    /// separate output has been captured.
    #[must_use]
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        let logs = logs.into();
        if self.output_content.is_none() {
            self.output_content = Some(logs.clone());
        }
        self.logs_content = Some(logs);
        self
    }

    /// Attach output distinct from the logs.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output_content = Some(output.into());
        self
    }

    /// Whether this observation ends the poll loop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// The concrete command line derived from a bake request.
///
/// Produced once per bake and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BakeRecipe {
    pub name: String,
    pub command: Vec<String>,
}

impl BakeRecipe {
    #[must_use]
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        BakeRecipe {
            name: name.into(),
            command,
        }
    }
}

/// Keys whose `key=value` command tokens are considered credential-shaped
/// and have their values masked in logs.
const MASKED_PARAMETER_MARKERS: &[&str] = &["secret", "token", "password", "access_key", "session"];

/// One submission of a recipe to a job executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Unique per bake attempt.
    pub job_id: String,
    pub tokenized_command: Vec<String>,
    /// Optional correlation id propagated from the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl JobRequest {
    /// Build a request with a fresh unique job id.
    #[must_use]
    pub fn new(tokenized_command: Vec<String>, execution_id: Option<String>) -> Self {
        JobRequest {
            job_id: Uuid::new_v4().to_string(),
            tokenized_command,
            execution_id,
        }
    }

    /// The command with credential-shaped `key=value` tokens masked, safe to
    /// write to logs.
    #[must_use]
    pub fn masked_command(&self) -> Vec<String> {
        self.tokenized_command
            .iter()
            .map(|token| match token.split_once('=') {
                Some((key, _)) if is_credential_shaped(key) => format!("{key}=****"),
                _ => token.clone(),
            })
            .collect()
    }
}

fn is_credential_shaped(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    MASKED_PARAMETER_MARKERS
        .iter()
        .any(|marker| key.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!BakeState::Running.is_terminal());
        assert!(BakeState::Completed.is_terminal());
        assert!(BakeState::Canceled.is_terminal());
    }

    #[test]
    fn job_ids_are_unique_per_attempt() {
        let a = JobRequest::new(vec!["true".to_string()], None);
        let b = JobRequest::new(vec!["true".to_string()], None);
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn masked_command_hides_credential_values() {
        let request = JobRequest::new(
            vec![
                "packer".to_string(),
                "build".to_string(),
                "-var".to_string(),
                "aws_secret_key=hunter2".to_string(),
                "aws_region=us-west-2".to_string(),
            ],
            None,
        );
        let masked = request.masked_command();
        assert!(masked.contains(&"aws_secret_key=****".to_string()));
        assert!(masked.contains(&"aws_region=us-west-2".to_string()));
        assert!(!masked.iter().any(|t| t.contains("hunter2")));
    }

    #[test]
    fn status_logs_mirror_into_output() {
        let status = BakeStatus::running("job-1").with_logs("line one");
        assert_eq!(status.logs_content.as_deref(), Some("line one"));
        assert_eq!(status.output_content.as_deref(), Some("line one"));

        let status = BakeStatus::running("job-2")
            .with_output("rendered")
            .with_logs("log line");
        assert_eq!(status.output_content.as_deref(), Some("rendered"));
    }
}
