//! tackle-api - HTTP API server for the tackle analysis hub

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, Method};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tackle_core::{GraphStore, MessageQueue, TypeRegistry};
use tackle_db::{log_pool_metrics, Database, JsonGraphLoader, MemoryGraph, PgMessageQueue, PoolConfig};
use tackle_jobs::{ChannelBroker, Hub, ServiceConfig};

use handlers::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "tackle_api=debug,tackle_jobs=debug,...")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "tackle_api=debug,tackle_jobs=debug,tackle_db=info,tower_http=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("tackle-api.log");
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
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let config = ServiceConfig::from_env();

    // A duplicate type tag must stop the server before it takes traffic.
    let registry = Arc::new(TypeRegistry::builtin()?);
    info!(tag_count = registry.tag_count(), "Type registry initialized");

    let (central, queue): (Arc<dyn GraphStore>, Arc<dyn MessageQueue>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let db = Database::connect_with_config(&url, PoolConfig::from_env()).await?;
                db.migrate().await?;
                log_pool_metrics(db.pool());
                info!("Using PostgreSQL graph store and queue");
                let graph: Arc<dyn GraphStore> = db.graph.clone();
                let queue: Arc<dyn MessageQueue> = Arc::new(
                    PgMessageQueue::new(db.pool.clone())
                        .with_poll_interval(config.queue_poll_interval()),
                );
                (graph, queue)
            }
            Err(_) => {
                warn!("DATABASE_URL not set, using in-memory graph store and in-process broker");
                let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
                let queue: Arc<dyn MessageQueue> = Arc::new(ChannelBroker::new());
                (graph, queue)
            }
        };

    let sources = Arc::new(JsonGraphLoader::new().with_base(config.shared_folder_path.clone()));
    let hub = Hub::new(central, queue, sources, registry, config);
    let consumer = hub.supervisor().start();

    let app = router(AppState {
        service: hub.service.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
    );

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = consumer.shutdown().await {
        warn!(error = %e, "Status consumer already stopped");
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
