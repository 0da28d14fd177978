//! HTTP server for the extraction and retrieval pipeline

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::processing::{HealthReport, Pipeline};
use state::AppState;

/// Pipeline HTTP server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Create a new server, building providers from `config`
    pub async fn new(config: RagConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .nest("/api", routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            // Applied bottom to top
            .layer(RequestBodyLimitLayer::new(self.config.server.max_upload_size))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Start the maintenance tasks and serve until the listener fails
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        spawn_maintenance(self.state.pipeline().clone(), &self.config);
        let router = self.build_router();

        tracing::info!("Starting pipeline server on http://{}", addr);
        tracing::info!("API documentation: http://{}/api/info", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Periodic reconciliation and checkpoint sweep
pub fn spawn_maintenance(pipeline: Arc<Pipeline>, config: &RagConfig) {
    let reconcile_every = Duration::from_secs(config.indexing.reconcile_interval_secs.max(1));
    let sweep_every = Duration::from_secs(config.checkpoint.sweep_interval_secs.max(1));

    let reconciler = pipeline.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.reconcile().await {
                tracing::warn!("Reconciliation sweep failed: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            match pipeline.sweep_checkpoints().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Swept {} expired checkpoint records", removed),
                Err(e) => tracing::warn!("Checkpoint sweep failed: {}", e),
            }
        }
    });
}

/// Provider health; 503 when any collaborator is down
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.pipeline().health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
