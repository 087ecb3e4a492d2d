pub mod api;
pub mod artifact_store;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod models;
pub mod persistence;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use config::{AllowedOrigins, Config};
use engine::AnalysisEngine;
use lifecycle::{LifecycleTracker, Submission};
use store::AnalysisStore;
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Multipart framing and the text fields ride on top of the video bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<AnalysisStore>,
    pub tracker: LifecycleTracker,
    pub submissions: mpsc::Sender<Submission>,
}

/// Builds the service context: upload directory, record store (SQLite-backed
/// when configured) and the tracker. The returned receiver must be handed to
/// [`spawn_workers`]; dropping every `AppState` clone closes the queue and lets
/// the worker exit.
pub async fn initialize(
    config: Config,
    engine: Arc<dyn AnalysisEngine>,
) -> Result<(AppState, mpsc::Receiver<Submission>)> {
    artifact_store::ensure_upload_root(&config.upload_root).await?;

    let store = match &config.database_path {
        Some(path) => AnalysisStore::open(path)
            .await
            .with_context(|| format!("Failed to open analysis store at {}", path.display()))?,
        None => {
            warn!("SWING_DATABASE_PATH not set; analyses are kept in memory only");
            AnalysisStore::in_memory()
        }
    };
    let store = Arc::new(store);

    let tracker = LifecycleTracker::new(store.clone(), engine, config.analysis_timeout);
    let (submissions, queue_rx) = mpsc::channel(config.queue_capacity);

    let state = AppState {
        config: Arc::new(config),
        store,
        tracker,
        submissions,
    };
    Ok((state, queue_rx))
}

/// Recovers records left over from a previous run and starts the submission
/// worker.
pub async fn spawn_workers(
    state: &AppState,
    queue_rx: mpsc::Receiver<Submission>,
) -> JoinHandle<()> {
    let recovered = state.tracker.recover_interrupted().await;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "Resubmitting pending analyses");
    }
    lifecycle::spawn_submission_worker(state.tracker.clone(), recovered, queue_rx)
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/api/test", get(api::test))
        .route("/api/upload-video", post(api::upload_video))
        .route("/api/analysis/{id}", get(api::get_analysis))
        .route("/webhooks/app_uninstalled", post(api::app_uninstalled))
        .nest_service("/uploads", ServeDir::new(&state.config.upload_root))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        AllowedOrigins::Any => layer.allow_origin(Any),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(values))
        }
    }
}
