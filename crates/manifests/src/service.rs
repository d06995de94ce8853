//! The bake services: one per renderer family, dispatched by type name.
//!
//! Each service owns the whole lifecycle of one bake call: deserialize the
//! request, open a staging environment, build the recipe, hand it to the
//! orchestrator, post-process the output. The staging environment is
//! dropped — and its directory deleted — on every exit path.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_artifacts::ArtifactFetcher;
use kiln_core::{
    Artifact, CloudFoundryBakeRequest, Error, HelmBakeRequest, HelmfileBakeRequest,
    JinjaBakeRequest, KustomizeBakeRequest, Result,
};
use kiln_jobs::Orchestrator;
use tokio_util::sync::CancellationToken;

use crate::cloudfoundry::CloudFoundryBaker;
use crate::config::RendererConfig;
use crate::env::StagingEnvironment;
use crate::helm::HelmTemplateBuilder;
use crate::helmfile::HelmfileTemplateBuilder;
use crate::jinja::JinjaTemplateBuilder;
use crate::kustomize::KustomizeTemplateBuilder;
use crate::postrender::remove_tests_directory_templates;

/// One renderer family's bake entry point.
#[async_trait]
pub trait BakeService: Send + Sync {
    /// Whether this service bakes the given renderer type.
    fn handles(&self, renderer_type: &str) -> bool;

    /// Execute one bake from a raw request body.
    async fn bake(&self, request: serde_json::Value, cancel: &CancellationToken)
        -> Result<Artifact>;
}

fn parse_request<T: serde::de::DeserializeOwned>(request: serde_json::Value) -> Result<T> {
    serde_json::from_value(request)
        .map_err(|e| Error::invalid_request(format!("malformed bake request: {e}")))
}

/// Helm bakes: build the recipe, run it, strip tests-directory manifests
/// from the rendered output.
pub struct HelmBakeService {
    builder: HelmTemplateBuilder,
    orchestrator: Arc<Orchestrator>,
}

impl HelmBakeService {
    #[must_use]
    pub fn new(builder: HelmTemplateBuilder, orchestrator: Arc<Orchestrator>) -> Self {
        HelmBakeService {
            builder,
            orchestrator,
        }
    }
}

#[async_trait]
impl BakeService for HelmBakeService {
    fn handles(&self, renderer_type: &str) -> bool {
        // The path segment names the family; the request body's renderer
        // field picks the major version
        matches!(
            renderer_type.to_ascii_lowercase().as_str(),
            "helm" | "helm2" | "helm3"
        )
    }

    async fn bake(
        &self,
        request: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request: HelmBakeRequest = parse_request(request)?;
        let env = StagingEnvironment::new()?;
        let recipe = self.builder.build_bake_recipe(&env, &request).await?;
        let status = self.orchestrator.run(&recipe, None, cancel).await?;

        let rendered = status.output_content.unwrap_or_default();
        let cleaned = remove_tests_directory_templates(&rendered);
        Ok(Artifact::embedded_base64(
            &request.output_artifact_name,
            STANDARD.encode(cleaned),
        ))
    }
}

/// Helmfile bakes share the helm post-render cleanup.
pub struct HelmfileBakeService {
    builder: HelmfileTemplateBuilder,
    orchestrator: Arc<Orchestrator>,
}

impl HelmfileBakeService {
    #[must_use]
    pub fn new(builder: HelmfileTemplateBuilder, orchestrator: Arc<Orchestrator>) -> Self {
        HelmfileBakeService {
            builder,
            orchestrator,
        }
    }
}

#[async_trait]
impl BakeService for HelmfileBakeService {
    fn handles(&self, renderer_type: &str) -> bool {
        renderer_type.eq_ignore_ascii_case("helmfile")
    }

    async fn bake(
        &self,
        request: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request: HelmfileBakeRequest = parse_request(request)?;
        let env = StagingEnvironment::new()?;
        let recipe = self.builder.build_bake_recipe(&env, &request).await?;
        let status = self.orchestrator.run(&recipe, None, cancel).await?;

        let rendered = status.output_content.unwrap_or_default();
        let cleaned = remove_tests_directory_templates(&rendered);
        Ok(Artifact::embedded_base64(
            &request.output_artifact_name,
            STANDARD.encode(cleaned),
        ))
    }
}

pub struct KustomizeBakeService {
    builder: KustomizeTemplateBuilder,
    orchestrator: Arc<Orchestrator>,
}

impl KustomizeBakeService {
    #[must_use]
    pub fn new(builder: KustomizeTemplateBuilder, orchestrator: Arc<Orchestrator>) -> Self {
        KustomizeBakeService {
            builder,
            orchestrator,
        }
    }
}

#[async_trait]
impl BakeService for KustomizeBakeService {
    fn handles(&self, renderer_type: &str) -> bool {
        renderer_type.eq_ignore_ascii_case("kustomize")
    }

    async fn bake(
        &self,
        request: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request: KustomizeBakeRequest = parse_request(request)?;
        let env = StagingEnvironment::new()?;
        let recipe = self.builder.build_bake_recipe(&env, &request).await?;
        self.orchestrator
            .bake(&recipe, &request.output_artifact_name, None, cancel)
            .await
    }
}

pub struct JinjaBakeService {
    builder: JinjaTemplateBuilder,
    orchestrator: Arc<Orchestrator>,
}

impl JinjaBakeService {
    #[must_use]
    pub fn new(builder: JinjaTemplateBuilder, orchestrator: Arc<Orchestrator>) -> Self {
        JinjaBakeService {
            builder,
            orchestrator,
        }
    }
}

#[async_trait]
impl BakeService for JinjaBakeService {
    fn handles(&self, renderer_type: &str) -> bool {
        renderer_type.eq_ignore_ascii_case("jinja")
    }

    async fn bake(
        &self,
        request: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request: JinjaBakeRequest = parse_request(request)?;
        let env = StagingEnvironment::new()?;
        let recipe = self.builder.build_bake_recipe(&env, &request).await?;
        self.orchestrator
            .bake(&recipe, &request.output_artifact_name, None, cancel)
            .await
    }
}

/// Cloud Foundry bakes render in-process, no job executor involved.
pub struct CloudFoundryBakeService {
    baker: CloudFoundryBaker,
}

impl CloudFoundryBakeService {
    #[must_use]
    pub fn new(baker: CloudFoundryBaker) -> Self {
        CloudFoundryBakeService { baker }
    }
}

#[async_trait]
impl BakeService for CloudFoundryBakeService {
    fn handles(&self, renderer_type: &str) -> bool {
        renderer_type.eq_ignore_ascii_case("cf")
    }

    async fn bake(
        &self,
        request: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let request: CloudFoundryBakeRequest = parse_request(request)?;
        self.baker.bake(&request).await
    }
}

/// Explicit registry of bake services; renderer selection is a plain lookup,
/// not a framework feature.
pub struct BakeryRegistry {
    services: Vec<Arc<dyn BakeService>>,
}

impl BakeryRegistry {
    /// Wire every renderer family against one fetcher and orchestrator.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        orchestrator: Arc<Orchestrator>,
        config: RendererConfig,
    ) -> Self {
        let services: Vec<Arc<dyn BakeService>> = vec![
            Arc::new(HelmBakeService::new(
                HelmTemplateBuilder::new(Arc::clone(&fetcher), config.helm.clone()),
                Arc::clone(&orchestrator),
            )),
            Arc::new(HelmfileBakeService::new(
                HelmfileTemplateBuilder::new(
                    Arc::clone(&fetcher),
                    config.helmfile.clone(),
                    config.helm.clone(),
                ),
                Arc::clone(&orchestrator),
            )),
            Arc::new(KustomizeBakeService::new(
                KustomizeTemplateBuilder::new(Arc::clone(&fetcher), config.kustomize.clone()),
                Arc::clone(&orchestrator),
            )),
            Arc::new(JinjaBakeService::new(
                JinjaTemplateBuilder::new(Arc::clone(&fetcher), config.jinja.clone()),
                Arc::clone(&orchestrator),
            )),
            Arc::new(CloudFoundryBakeService::new(CloudFoundryBaker::new(
                Arc::clone(&fetcher),
            ))),
        ];
        BakeryRegistry { services }
    }

    /// The service handling the given renderer type, if any.
    #[must_use]
    pub fn service_for(&self, renderer_type: &str) -> Option<&Arc<dyn BakeService>> {
        self.services
            .iter()
            .find(|service| service.handles(renderer_type))
    }
}
