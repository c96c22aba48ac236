//! HTTP server wiring.
//!
//! Opens the database, builds the embedding provider and generator, and serves
//! the socket endpoint plus `/health`. On Ctrl-C the listener stops accepting,
//! then pending memory writes are drained before returning.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::{ConnectionGate, JwtVerifier};
use crate::config::OliviaConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::generation::{self, Generator};
use crate::session::{ConnectionRegistry, ExchangeOrchestrator, MemoryFusion, MemoryWriter};
use crate::store::{MemoryIndex, SqliteStore, TranscriptStore};
use crate::{db, socket};

pub struct ServerState {
    pub gate: ConnectionGate,
    pub registry: ConnectionRegistry,
    pub exchange: Arc<ExchangeOrchestrator>,
}

pub type AppState = Arc<ServerState>;

impl ServerState {
    /// Assemble the pipeline from its collaborators.
    pub fn build(
        config: &OliviaConfig,
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> AppState {
        let transcripts: Arc<dyn TranscriptStore> = Arc::new(store.clone());
        let index: Arc<dyn MemoryIndex> = Arc::new(store);

        let gate = ConnectionGate::new(
            Arc::new(JwtVerifier::new(&config.auth.jwt_secret)),
            Arc::clone(&transcripts),
            config.server.allowed_origins.clone(),
            config.auth.cookie_name.clone(),
        );
        let fusion = MemoryFusion::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            Arc::clone(&transcripts),
            config.memory.max_fragments,
            config.memory.preamble.clone(),
        );
        let writer = MemoryWriter::new(Arc::clone(&transcripts), index, embedder);
        let exchange = ExchangeOrchestrator::new(
            transcripts,
            fusion,
            generator,
            writer,
            config.memory.min_conversation_id_len,
        );

        Arc::new(ServerState {
            gate,
            registry: ConnectionRegistry::new(),
            exchange: Arc::new(exchange),
        })
    }
}

pub fn router(state: AppState, socket_path: &str) -> Router {
    Router::new()
        .route(socket_path, get(socket::socket_handler))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub fragments_indexed: u64,
    pub fragments_failed: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.exchange.writer().stats();
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.len(),
        fragments_indexed: stats.indexed,
        fragments_failed: stats.failed,
    })
}

/// Run the server until Ctrl-C.
pub async fn serve(config: OliviaConfig) -> Result<()> {
    config.validate()?;

    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    match db::migrations::reconcile_embedding_model(&conn, &config.embedding.model)? {
        db::migrations::ModelCheck::Matches => {}
        db::migrations::ModelCheck::Recorded => {
            tracing::info!(model = %config.embedding.model, "recorded embedding model");
        }
        db::migrations::ModelCheck::Mismatch { stored } => tracing::warn!(
            stored = %stored,
            configured = %config.embedding.model,
            "embedding model changed; fragments from the old model will not be comparable"
        ),
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(embedding::create_provider(&config.embedding)?);
    tracing::info!(model = %config.embedding.model, "embedding provider ready");
    let generator = generation::create_generator(&config.generation)?;
    tracing::info!(model = %config.generation.model, "generator ready");

    let state = ServerState::build(&config, SqliteStore::new(conn), embedder, generator);
    let app = router(Arc::clone(&state), &config.server.socket_path);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, path = %config.server.socket_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;

    let writer = state.exchange.writer();
    tracing::info!(pending = writer.in_flight(), "draining memory writes");
    writer.drain().await;
    let stats = writer.stats();
    tracing::info!(indexed = stats.indexed, failed = stats.failed, "shutdown complete");
    Ok(())
}
