use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod gateway;
mod ingestion;
mod ollama;
mod search;
mod service;
mod transform;

use crate::config::{RuntimeConfig, load_static_config};
use crate::db::Database;
use crate::gateway::{AiGateway, RetryPolicy};
use crate::ollama::OllamaClient;
use crate::search::MemorySearchIndex;
use crate::service::DocumentService;
use crate::transform::TransformRouter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting docuflow service v{}", env!("CARGO_PKG_VERSION"));

    // Static configuration decides where the database lives
    let static_config = load_static_config()?;
    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        data_dir = %static_config.storage.data_dir.display(),
        "Static configuration loaded"
    );

    std::fs::create_dir_all(static_config.storage.documents_dir())?;

    let db_path = static_config.storage.data_dir.join("docuflow.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Static + dynamic with DB overrides
    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!("Runtime configuration loaded with DB settings");

    let ai = runtime_config.static_config.ai.clone();
    let backend = Arc::new(OllamaClient::new(ai.clone())?);
    info!(base_url = %backend.base_url(), model = %ai.model, "AI backend configured");
    let gateway = Arc::new(AiGateway::new(backend, RetryPolicy::from_config(&ai)));

    let service = Arc::new(DocumentService::new(
        runtime_config.clone(),
        db,
        Arc::new(MemorySearchIndex::new()),
        TransformRouter::new(gateway),
    ));

    // Searchable state is not persisted; rebuild it from the store
    service.rebuild_index()?;

    if !service.ai_available().await {
        tracing::warn!("AI backend unreachable; transforms will fail until it recovers");
    }

    let app = api::router(service);

    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docuflow_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
