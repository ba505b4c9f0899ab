use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use roster_backend_api::{build_router, AppState};
use roster_backend_runtime::{shutdown_signal, telemetry, BackendServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = roster_config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    telemetry::init_tracing(&config.logging)?;

    info!("starting roster backend");

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let config = Arc::new(config);
    let state = AppState::new(
        config.clone(),
        services.task_store.clone(),
        services.processor.clone(),
    );
    let app = build_router(state);

    let address = config.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    if tokio::time::timeout(config.server.shutdown_timeout(), services.shutdown())
        .await
        .is_err()
    {
        warn!("background loops did not stop within the shutdown timeout");
    }

    info!("backend shut down");
    Ok(())
}
