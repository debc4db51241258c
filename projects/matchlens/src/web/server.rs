use crate::job::JobRegistry;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::orchestrator::BackendFactory;
use crate::pipeline::worker::WorkerPool;
use crate::video::FrameSource;
use crate::web::api::{create_job, delete_job, get_job, get_job_files, list_jobs};
use crate::web::download::download_outputs;
use crate::web::events::job_events;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    pub workers: usize,
    pub media_root: PathBuf,
    pub max_seconds: f64,
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub pool: Arc<WorkerPool>,
    /// Measures upload durations before a job exists
    pub source: Arc<dyn FrameSource>,
    pub max_seconds: f64,
}

pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(state.registry.media_root());
    Router::new()
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/:id", get(get_job).delete(delete_job))
        .route("/api/jobs/:id/files", get(get_job_files))
        .route("/api/jobs/:id/events", get(job_events))
        .route("/api/jobs/:id/download", get(download_outputs))
        .nest_service("/media", media)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server<F>(
    settings: ServerSettings,
    config: Arc<PipelineConfig>,
    factory: Arc<F>,
) -> Result<()>
where
    F: BackendFactory + 'static,
{
    let registry = Arc::new(JobRegistry::load(&settings.media_root)?);
    let source = factory.frame_source();
    let pool = Arc::new(WorkerPool::spawn(
        settings.workers,
        factory,
        config,
        settings.media_root.clone(),
    ));

    let mut current_port = settings.port;
    let listener = loop {
        let addr = SocketAddr::new(settings.host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = router(AppState {
        registry,
        pool: pool.clone(),
        source,
        max_seconds: settings.max_seconds,
    });

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "matchlens server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for queued jobs to finish");
    match Arc::try_unwrap(pool) {
        Ok(pool) => tokio::task::spawn_blocking(move || pool.shutdown()).await?,
        Err(_) => warn!("Worker pool still referenced, not waiting for jobs"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
