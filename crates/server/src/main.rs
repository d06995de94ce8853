use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use kiln_server::{routes, wiring, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var_os("KILN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("kiln.toml"));
    let settings = Settings::load(&config_path).context("loading configuration")?;
    tracing::info!(config = ?settings.redacted_summary(), "starting kiln");

    // Backend provisioning (config volume, task definition) completes here,
    // before the listener opens
    let bakery = Arc::new(
        wiring::build_bakery(&settings, None)
            .await
            .context("wiring the bakery")?,
    );

    let listener = tokio::net::TcpListener::bind(&settings.listen_address)
        .await
        .with_context(|| format!("binding {}", settings.listen_address))?;
    tracing::info!(address = %settings.listen_address, "kiln listening");

    let app = routes::router(Arc::clone(&bakery));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    bakery.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
