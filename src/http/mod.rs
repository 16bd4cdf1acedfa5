//! # HTTP service
//!
//! axum router over a shared [`KnowledgeGraph`].
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /` | Service name, version, environment |
//! | `GET /health` | Liveness and last successful ingestion |
//! | `POST /ingest` | Queue a document, `202 { tracking_id }` |
//! | `GET /ingest/{id}` | Ingestion status |
//! | `POST /ingest/{id}/cancel`, `/retry` | Control one ingestion |
//! | `POST /query` | Structured query JSON or `{ "text" }` |
//! | `/admin/...` | Schema administration and export (bearer token) |

mod admin;
mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::{Error, KnowledgeGraph, Result};

pub use error::ApiError;

/// Inline documents can be large.
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub kg: KnowledgeGraph,
    pub environment: Arc<str>,
    /// Whether `/ingest` accepts `path` and `file://` sources. Only enable
    /// this when the loader is confined to a document root.
    pub file_sources: bool,
}

impl AppState {
    pub fn new(kg: KnowledgeGraph, environment: &str) -> Self {
        Self { kg, environment: Arc::from(environment), file_sources: false }
    }

    pub fn with_file_sources(mut self, enabled: bool) -> Self {
        self.file_sources = enabled;
        self
    }
}

/// Build the router. Admin routes are mounted only when `admin_token` is set.
pub fn router(state: AppState, admin_token: Option<&str>) -> Router {
    let mut app = Router::new().merge(routes::public_routes());
    match admin_token.filter(|t| !t.is_empty()) {
        Some(token) => app = app.merge(admin::admin_routes(Arc::from(token))),
        None => tracing::info!("no admin token configured, admin routes disabled"),
    }
    app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE)),
    )
}

/// Serve until Ctrl-C, then drain the pipeline and flush the store.
///
/// File sources are accepted over HTTP only when `ingest.root` is set.
pub async fn serve(config: &Config, kg: KnowledgeGraph) -> Result<()> {
    let file_sources = config.ingest.root.is_some();
    if !file_sources {
        tracing::info!("no ingest.root configured, /ingest accepts inline content only");
    }
    let state = AppState::new(kg.clone(), &config.server.environment).with_file_sources(file_sources);
    let app = router(state, config.server.admin_token.as_deref());
    let config = &config.server;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = %config.environment, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    kg.shutdown().await
}
