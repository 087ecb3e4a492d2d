use anyhow::Result;
use swing_analysis_api::{
    build_router, config::Config, engine::build_engine, initialize, spawn_workers,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swing_analysis_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let engine = build_engine(&config);
    let (state, queue_rx) = initialize(config.clone(), engine).await?;
    let worker = spawn_workers(&state, queue_rx).await;

    info!(
        engine = state.tracker.engine_name(),
        upload_root = %config.upload_root.display(),
        max_upload_bytes = config.max_upload_bytes,
        timeout_secs = config.analysis_timeout.as_secs(),
        "Analysis tracker ready"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("swing-analysis-api listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last AppState; the queue is closed now.
    worker.await?;
    info!("swing-analysis-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
