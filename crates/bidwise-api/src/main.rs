//! bidwise API server.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bidwise_api::{router, AppState};
use bidwise_core::defaults;
use bidwise_db::{Database, FilesystemStore, PgFileRecordRepository, PgQueueRepository, PoolConfig};
use bidwise_inference::{build_backend, AnalysisConfig};
use bidwise_jobs::{QueueProcessor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let _log_guard = init_logging(&log_format, log_file.as_deref());

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/bidwise".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    let worker_config = WorkerConfig::from_env();

    info!("Connecting to database...");
    let pool_config = PoolConfig::from_env().for_workers(worker_config.max_concurrent);
    let db = Database::connect_with_config(&database_url, pool_config).await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database ready");

    let storage_path =
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| defaults::STORAGE_PATH.to_string());
    let store = FilesystemStore::new(&storage_path);
    store.validate().await?;
    info!(path = %storage_path, "Object storage initialized");

    let analysis_config = AnalysisConfig::from_env();
    let backend = build_backend(&analysis_config)?;
    match backend.health_check().await {
        Ok(true) => info!(
            provider = %analysis_config.provider,
            model = backend.model_name(),
            "Analysis backend reachable"
        ),
        Ok(false) => warn!(
            provider = %analysis_config.provider,
            model = backend.model_name(),
            "Analysis backend reported unhealthy; jobs will retry"
        ),
        Err(e) => warn!(
            provider = %analysis_config.provider,
            error = %e,
            "Analysis backend health check failed; jobs will retry"
        ),
    }

    let processor = QueueProcessor::from_database(
        &db,
        Arc::new(store),
        backend.clone(),
        worker_config,
    );
    let worker = if processor.config().enabled {
        Some(processor.clone().start())
    } else {
        info!("Background analysis worker disabled (ANALYSIS_WORKER_ENABLED=false)");
        None
    };

    let state = AppState::new(
        processor,
        Arc::new(PgFileRecordRepository::new(db.pool.clone())),
        Arc::new(PgQueueRepository::new(db.pool.clone())),
        backend.model_name(),
    );

    let app = router(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        if let Err(e) = worker.shutdown().await {
            warn!(error = %e, "Worker already stopped");
        }
    }
    info!("Server stopped");
    Ok(())
}

/// Install the global subscriber. The returned guard flushes the file writer.
fn init_logging(
    log_format: &str,
    log_file: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bidwise_api=debug,bidwise_jobs=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("bidwise-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, draining requests");
}
