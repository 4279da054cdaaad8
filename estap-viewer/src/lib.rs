//! estap viewer
//!
//! A one-page dashboard over the database behind an estap proxy. The
//! connection comes from the `PG*` variables the deploy pipeline injects.

pub mod config;
pub mod db;
pub mod render;
pub mod routes;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use estap_core::PgSettings;
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ViewerConfig;
pub use render::{Dashboard, Renderer};

/// Shared by every request
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub renderer: Arc<Renderer>,
    pub settings: Arc<PgSettings>,
    pub requests: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: &ViewerConfig) -> Result<Self> {
        Ok(Self {
            pool: config.pool(),
            renderer: Arc::new(Renderer::new()?),
            settings: Arc::new(config.pg_settings()),
            requests: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Count this request and return the running total
    pub fn count_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/api/tables", get(routes::api_tables))
        .route("/healthz", get(routes::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: ViewerConfig) -> Result<()> {
    let state = AppState::new(&config)?;
    let listener = tokio::net::TcpListener::bind((config.bind, config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.bind, config.port))?;

    info!(
        database = %state.settings,
        "estap viewer listening on {}:{}",
        config.bind,
        config.port
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")
}
