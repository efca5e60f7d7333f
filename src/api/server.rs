use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{find_traces, get_operations, get_services, get_trace, health_check, AppState};
use crate::client::{ElasticsearchClient, SearchClient};
use crate::otel::handle_otlp_traces;
use crate::spanstore::{SpanReader, SpanWriter, StorageConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageConfig::default(),
        }
    }
}

impl AppState {
    pub fn new(client: Arc<dyn SearchClient>, storage: &StorageConfig) -> Self {
        Self {
            reader: SpanReader::new(client.clone(), storage),
            writer: SpanWriter::new(client, storage),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Query API
        .route("/api/services", get(get_services))
        .route("/api/services/:service/operations", get(get_operations))
        .route("/api/traces", get(find_traces))
        .route("/api/traces/:trace_id", get(get_trace))
        // OTLP ingest
        .route("/v1/traces", post(handle_otlp_traces))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.storage.validate()?;

    let client = ElasticsearchClient::from_config(&config.storage)?;
    tracing::info!(
        "Using search cluster at {}",
        config.storage.server_urls.join(", ")
    );

    let state = Arc::new(AppState::new(Arc::new(client), &config.storage));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting spanseek server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("spanseek server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining requests...");
}
