//! The `serve` command.

use repochat_core::Config;
use repochat_provider::create_model;
use repochat_sandbox::{LocalSandboxProvider, SharedSandboxProvider};
use repochat_server::{create_router, AppState};
use std::sync::Arc;
use tracing::{info, warn};

/// Run the HTTP server until interrupted.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let (provider, model_id) = config.provider_and_model();
    let model = create_model(&provider, &model_id)?;
    let storage = config.open_storage()?;
    let sandbox_config = config.sandbox_config();
    let sandboxes = LocalSandboxProvider::new(sandbox_config);
    info!(
        provider = %provider,
        model = %model_id,
        storage = ?config.storage_kind(),
        sandboxes = %sandboxes.root().display(),
        "Starting repochat server"
    );
    let sandboxes: SharedSandboxProvider = Arc::new(sandboxes);

    let state = AppState::from_config(&config, storage, sandboxes, model);
    match state.runs.recover().await {
        Ok(0) => {}
        Ok(recovered) => info!(recovered, "Resumed unfinished runs"),
        Err(e) => warn!(error = %e, "Failed to recover runs"),
    }

    let app = create_router(state.clone());
    let address = config.address();
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Suspended runs stay in storage and resume on the next start.
    state.runs.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
