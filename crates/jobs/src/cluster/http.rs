//! HTTP implementation of [`ClusterJobApi`] against a Kubernetes-style REST
//! surface (batch jobs, config maps, pod logs).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use super::api::{ApiResult, ClusterApiError, ClusterJobApi, ClusterJobSpec, ClusterJobState};

const JOB_CONTAINER_NAME: &str = "kiln-job";
const CONFIG_VOLUME_NAME: &str = "configuration-files";

/// Connection settings for the cluster API server.
#[derive(Debug, Clone)]
pub struct HttpClusterJobApiConfig {
    /// Base URL of the API server, e.g. `https://kubernetes.default.svc`.
    pub base_url: String,
    /// Bearer token, when the cluster requires one.
    pub token: Option<String>,
    /// Namespace all bake jobs are scheduled into.
    pub namespace: String,
}

pub struct HttpClusterJobApi {
    client: reqwest::Client,
    config: HttpClusterJobApiConfig,
}

impl HttpClusterJobApi {
    #[must_use]
    pub fn new(config: HttpClusterJobApiConfig) -> Self {
        HttpClusterJobApi {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClusterApiError::new(Some(status.as_u16()), body))
    }
}

fn is_not_found(error: &ClusterApiError) -> bool {
    error.code == Some(404)
}

#[async_trait]
impl ClusterJobApi for HttpClusterJobApi {
    async fn create_config_volume(
        &self,
        name_prefix: &str,
        data: &BTreeMap<String, String>,
    ) -> ApiResult<String> {
        let namespace = &self.config.namespace;
        let body = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "generateName": format!("{name_prefix}-") },
            "data": data,
        });
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/api/v1/namespaces/{namespace}/configmaps")))
                    .json(&body),
            )
            .await?;
        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        created["metadata"]["name"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| ClusterApiError::new(None, "config map response carried no name"))
    }

    async fn create_job(&self, spec: ClusterJobSpec) -> ApiResult<()> {
        let namespace = &self.config.namespace;
        let body = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": spec.name,
                "labels": spec.labels,
            },
            "spec": {
                "backoffLimit": 0,
                "activeDeadlineSeconds": spec.active_deadline.as_secs(),
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": JOB_CONTAINER_NAME,
                            "image": spec.image,
                            "command": spec.command,
                            "env": spec
                                .env
                                .iter()
                                .map(|(name, value)| json!({ "name": name, "value": value }))
                                .collect::<Vec<_>>(),
                            "volumeMounts": [{
                                "name": CONFIG_VOLUME_NAME,
                                "mountPath": spec.config_mount_path,
                                "readOnly": true,
                            }],
                        }],
                        "volumes": [{
                            "name": CONFIG_VOLUME_NAME,
                            "configMap": { "name": spec.config_volume },
                        }],
                    },
                },
            },
        });
        self.send(
            self.client
                .post(self.url(&format!("/apis/batch/v1/namespaces/{namespace}/jobs")))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn read_job(&self, name: &str) -> ApiResult<Option<ClusterJobState>> {
        let namespace = &self.config.namespace;
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/apis/batch/v1/namespaces/{namespace}/jobs/{name}"))),
            )
            .await;
        let response = match response {
            Ok(response) => response,
            Err(error) if is_not_found(&error) => return Ok(None),
            Err(error) => return Err(error),
        };
        let job: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        Ok(Some(ClusterJobState {
            completion_time: job["status"]["completionTime"]
                .as_str()
                .map(ToString::to_string),
            failed: job["status"]["failed"].as_u64().unwrap_or(0) as u32,
        }))
    }

    async fn delete_job(&self, name: &str) -> ApiResult<()> {
        let namespace = &self.config.namespace;
        let result = self
            .send(self.client.delete(self.url(&format!(
                "/apis/batch/v1/namespaces/{namespace}/jobs/{name}?propagationPolicy=Background"
            ))))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn has_job_with_label(&self, label_selector: &str) -> ApiResult<bool> {
        let namespace = &self.config.namespace;
        let response = self
            .send(self.client.get(self.url(&format!(
                "/apis/batch/v1/namespaces/{namespace}/jobs?labelSelector={label_selector}&limit=1"
            ))))
            .await?;
        let jobs: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        Ok(jobs["items"]
            .as_array()
            .map(|items| !items.is_empty())
            .unwrap_or(false))
    }

    async fn pod_logs(&self, job_name: &str) -> ApiResult<Option<String>> {
        let namespace = &self.config.namespace;
        let response = self
            .send(self.client.get(self.url(&format!(
                "/api/v1/namespaces/{namespace}/pods?labelSelector=job-name={job_name}&limit=1"
            ))))
            .await?;
        let pods: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        let Some(pod_name) = pods["items"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|pod| pod["metadata"]["name"].as_str())
        else {
            return Ok(None);
        };

        let response = self
            .send(self.client.get(self.url(&format!(
                "/api/v1/namespaces/{namespace}/pods/{pod_name}/log?container={JOB_CONTAINER_NAME}"
            ))))
            .await?;
        let logs = response
            .text()
            .await
            .map_err(|e| ClusterApiError::new(None, e.to_string()))?;
        Ok(Some(logs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_against_the_base_url() {
        let api = HttpClusterJobApi::new(HttpClusterJobApiConfig {
            base_url: "https://cluster.local/".to_string(),
            token: None,
            namespace: "kiln-jobs".to_string(),
        });
        assert_eq!(
            api.url("/apis/batch/v1/namespaces/kiln-jobs/jobs"),
            "https://cluster.local/apis/batch/v1/namespaces/kiln-jobs/jobs"
        );
    }

    #[test]
    fn not_found_detection() {
        assert!(is_not_found(&ClusterApiError::new(Some(404), "gone")));
        assert!(!is_not_found(&ClusterApiError::new(Some(500), "boom")));
        assert!(!is_not_found(&ClusterApiError::new(None, "io")));
    }
}
