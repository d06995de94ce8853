//! Explicit construction of the process dependency graph.
//!
//! Backend selection is a configuration-driven factory choice: exactly one
//! of the three job execution backends is built at startup, and its one-time
//! provisioning (config volume, task definition) completes before the
//! server accepts any bake.

use std::sync::Arc;
use std::time::Duration;

use kiln_artifacts::{ArtifactFetcher, HttpArtifactFetcher};
use kiln_core::{Error, Result};
use kiln_jobs::cluster::{HttpClusterJobApi, HttpClusterJobApiConfig};
use kiln_jobs::remote::api::{ContainerTaskApi, CredentialExchange, TaskLogStore};
use kiln_jobs::remote::broker::{HttpSecretBroker, SecretBroker};
use kiln_jobs::{
    ClusterJobConfig, ClusterJobExecutor, JobExecutor, LocalJobExecutor, Orchestrator,
    RemoteTaskConfig, RemoteTaskExecutor,
};
use kiln_manifests::BakeryRegistry;

use crate::config::{BackendKind, Settings};

/// Clients for the remote-task backend's collaborator APIs.
///
/// The container-task execution plane, log store and credential exchange
/// are external interfaces; a deployment supplies its own implementations.
/// The secret broker may be supplied too, or built from configuration.
pub struct RemoteTaskClients {
    pub task_api: Arc<dyn ContainerTaskApi>,
    pub log_store: Arc<dyn TaskLogStore>,
    pub credentials: Arc<dyn CredentialExchange>,
    pub broker: Option<Arc<dyn SecretBroker>>,
}

/// The wired-up bakery: registry plus the executor handles the server needs
/// for lifecycle management.
pub struct Bakery {
    pub registry: BakeryRegistry,
    executor: Arc<dyn JobExecutor>,
    remote: Option<Arc<RemoteTaskExecutor>>,
}

impl std::fmt::Debug for Bakery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bakery")
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl Bakery {
    /// Number of bakes currently executing in-process.
    #[must_use]
    pub fn running_job_count(&self) -> usize {
        self.executor.running_job_count()
    }

    /// Release startup-provisioned backend resources.
    pub async fn shutdown(&self) {
        if let Some(remote) = &self.remote {
            remote.shutdown().await;
        }
    }
}

/// Build the full dependency graph from settings.
pub async fn build_bakery(
    settings: &Settings,
    remote_clients: Option<RemoteTaskClients>,
) -> Result<Bakery> {
    let fetcher: Arc<dyn ArtifactFetcher> =
        Arc::new(HttpArtifactFetcher::new(&settings.artifact_resolver_url));

    let mut remote = None;
    let executor: Arc<dyn JobExecutor> = match settings.execution.backend {
        BackendKind::Local => Arc::new(LocalJobExecutor::new(Duration::from_secs(
            settings.execution.local.timeout_minutes * 60,
        ))),
        BackendKind::Cluster => {
            let cluster = &settings.execution.cluster;
            let api = Arc::new(HttpClusterJobApi::new(HttpClusterJobApiConfig {
                base_url: cluster.api_url.clone(),
                token: cluster.api_token.clone(),
                namespace: cluster.namespace.clone(),
            }));
            let executor = ClusterJobExecutor::provision(
                api,
                ClusterJobConfig {
                    job_image: cluster.job_image.clone(),
                    config_dir: settings.execution.config_dir.clone(),
                    config_mount_path: cluster.config_mount_path.clone(),
                    timeout: Duration::from_secs(cluster.timeout_minutes * 60),
                },
            )
            .await?;
            Arc::new(executor)
        }
        BackendKind::Remote => {
            let clients = remote_clients.ok_or_else(|| {
                Error::configuration(
                    "the remote task backend requires injected container task clients",
                )
            })?;
            let broker = match clients.broker {
                Some(broker) => broker,
                None => {
                    let remote_settings = &settings.execution.remote;
                    let address =
                        remote_settings.secret_broker_address.clone().ok_or_else(|| {
                            Error::configuration(
                                "remote.secret_broker_address must be set for the remote backend",
                            )
                        })?;
                    let token = remote_settings.secret_broker_token.clone().ok_or_else(|| {
                        Error::configuration(
                            "remote.secret_broker_token must be set for the remote backend",
                        )
                    })?;
                    Arc::new(HttpSecretBroker::new(address, token)) as Arc<dyn SecretBroker>
                }
            };

            let remote_settings = &settings.execution.remote;
            let executor = Arc::new(
                RemoteTaskExecutor::provision(
                    clients.task_api,
                    clients.log_store,
                    broker,
                    clients.credentials,
                    RemoteTaskConfig {
                        cluster: remote_settings.cluster.clone(),
                        subnets: remote_settings.subnets.clone(),
                        job_image: remote_settings.job_image.clone(),
                        container_name: remote_settings.container_name.clone(),
                        log_group: remote_settings.log_group.clone(),
                        log_prefix: remote_settings.log_prefix.clone(),
                        cpu: remote_settings.cpu.clone(),
                        memory: remote_settings.memory.clone(),
                        timeout: Duration::from_secs(remote_settings.timeout_minutes * 60),
                        bake_role: remote_settings.bake_role.clone(),
                        bake_role_external_id: remote_settings.bake_role_external_id.clone(),
                        execution_role: remote_settings.execution_role.clone(),
                        region: remote_settings.region.clone(),
                        config_dir: settings.execution.config_dir.clone(),
                    },
                )
                .await?,
            );
            remote = Some(Arc::clone(&executor));
            executor
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&executor)));
    let registry = BakeryRegistry::new(fetcher, orchestrator, settings.renderers.clone());

    Ok(Bakery {
        registry,
        executor,
        remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_wires_without_collaborators() {
        let bakery = build_bakery(&Settings::default(), None).await.unwrap();
        assert!(bakery.registry.service_for("helm").is_some());
        assert_eq!(bakery.running_job_count(), 0);
    }

    #[tokio::test]
    async fn remote_backend_without_clients_is_a_configuration_error() {
        let mut settings = Settings::default();
        settings.execution.backend = BackendKind::Remote;
        let err = build_bakery(&settings, None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
