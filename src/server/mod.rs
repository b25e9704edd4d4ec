//! Web UI and JSON API (feature `server`).
//!
//! One page at `/`, backed by session-scoped routes under `/api/sessions`.
//! A session holds the user's API key and the report of its last batch;
//! nothing outlives the process.

mod routes;
pub mod state;

pub use routes::ApiError;
pub use state::{AppState, SessionStore};

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router with request tracing applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `state.server.bind_addr()` and serve until Ctrl-C.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let addr = state.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("doc2md listening on http://{}", listener.local_addr()?);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
