use axum::http::Request;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use text2img::materialize::Materializer;
use text2img::screenshot::{Capturer, ChromeCapturer};
use text2img::storage::{FsStore, MemoryStore, ObjectStore, S3Store};
use text2img::{router, AppState, Config, RenderCoordinator, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    let store: Arc<dyn ObjectStore> = match config.storage_backend {
        StorageBackend::S3 => Arc::new(S3Store::new(&config.s3)),
        StorageBackend::Fs => Arc::new(FsStore::new(config.fs_storage_dir.clone())),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    // Any provisioning failure other than "bucket missing" is fatal.
    store.ensure_bucket().await?;

    let scratch_dir = prepare_scratch_dir(&config.scratch_dir)?;
    let materializer = Materializer::new(config.template_dir.clone(), scratch_dir.clone(), config.template_fuel);
    let capturer = Arc::new(ChromeCapturer::launch(&config.chrome, scratch_dir)?);

    let state = AppState {
        coordinator: Arc::new(RenderCoordinator::new(materializer, capturer.clone() as Arc<dyn Capturer>, store)),
    };

    let app = router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        );

    let addr = SocketAddr::from(([0,0,0,0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    // The router and its state are gone once serve returns; in-flight captures may still hold a clone.
    match Arc::try_unwrap(capturer) {
        Ok(capturer) => capturer.shutdown(),
        Err(_) => tracing::warn!("browser still in use at shutdown; leaving it to process exit"),
    }
    Ok(())
}

/// Create the scratch directory and return its absolute path.
fn prepare_scratch_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.canonicalize()?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
