//! Job execution for kiln.
//!
//! A bake recipe runs as an asynchronous job on one of three backends behind
//! the [`JobExecutor`] trait: a local child process, a cluster-scheduled job,
//! or a serverless container task. The [`Orchestrator`] submits a recipe and
//! polls the backend to a terminal state.
//!
//! Backends share one failure discipline: errors while querying remote state
//! are never terminal — `update_job` reports "no update yet" and the next
//! poll tick retries. Only an explicit failure signal from the executed
//! command ends a bake.

pub mod cluster;
pub mod config_files;
pub mod executor;
pub mod local;
pub mod orchestrator;
pub mod remote;

pub use cluster::{ClusterJobConfig, ClusterJobExecutor};
pub use executor::JobExecutor;
pub use local::LocalJobExecutor;
pub use orchestrator::Orchestrator;
pub use remote::{RemoteTaskConfig, RemoteTaskExecutor};
