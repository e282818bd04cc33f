mod chat;
mod config;
mod db;
mod debate;
mod errors;
mod evaluation;
mod judge;
mod llm_client;
mod models;
mod routes;
mod state;
mod storage;
mod transcript;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::llm_client::pool::CallPool;
use crate::llm_client::{LlmClient, LlmProvider};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{InMemoryResultStore, PersonaDirectory, PgResultStore, ResultStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Panel API v{}", env!("CARGO_PKG_VERSION"));

    let (store, personas) = build_storage(&config).await?;

    // Initialize LLM client
    let llm: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(config.anthropic_api_key.clone())?);
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let call_pool = CallPool::new(config.llm_max_concurrency);
    info!("LLM call pool sized to {}", call_pool.capacity());

    // Build app state
    let state = AppState {
        store,
        personas,
        llm,
        call_pool,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the recruiter UI has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Result store and persona directory for the configured backend. Postgres
/// serves both from one pool.
async fn build_storage(
    config: &Config,
) -> Result<(Arc<dyn ResultStore>, Arc<dyn PersonaDirectory>)> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let store = Arc::new(PgResultStore::new(create_pool(url).await?));
            let results: Arc<dyn ResultStore> = store.clone();
            let personas: Arc<dyn PersonaDirectory> = store;
            Ok((results, personas))
        }
        StorageBackend::Memory => {
            let store = match &config.personas_file {
                Some(path) => Arc::new(InMemoryResultStore::from_personas_file(path)?),
                None => Arc::new(InMemoryResultStore::new()),
            };
            info!("Using in-memory storage; results are lost on restart");
            let results: Arc<dyn ResultStore> = store.clone();
            let personas: Arc<dyn PersonaDirectory> = store;
            Ok((results, personas))
        }
    }
}
