//! Manifest baking for kiln.
//!
//! This crate turns bake requests into concrete command lines
//! ([`BakeRecipe`]s) for the renderer binaries — helm, helmfile, kustomize,
//! jinja2 — plus one renderer (Cloud Foundry variable substitution) that
//! bakes in-process. All file staging happens inside a per-bake
//! [`StagingEnvironment`] that is deleted when the bake ends, however it
//! ends.
//!
//! [`BakeRecipe`]: kiln_core::BakeRecipe

pub mod cloudfoundry;
pub mod config;
pub mod env;
pub mod helm;
pub mod helmfile;
pub mod jinja;
pub mod kustomize;
pub mod overrides;
pub mod postrender;
pub mod service;
mod stage;

pub use config::RendererConfig;
pub use env::StagingEnvironment;
pub use service::{BakeService, BakeryRegistry};
