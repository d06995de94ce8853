//! Process wiring and HTTP inbound layer for the kiln bakery.
//!
//! The dependency graph is constructed explicitly at startup: configuration
//! selects one job execution backend, the factory in [`wiring`] builds it
//! together with the artifact fetcher and the bake service registry, and
//! [`routes`] exposes the result over HTTP.

pub mod config;
pub mod routes;
pub mod wiring;

pub use config::Settings;
pub use wiring::{Bakery, RemoteTaskClients};
