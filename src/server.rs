//! Router assembly and server lifecycle

use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::{api, ws};

/// Build the full router:
/// - `GET /` redirects to the demo page
/// - `GET /subscribe` WebSocket
/// - `GET|POST|PUT /entity/{id}`
/// - `GET|POST /world`, `GET|POST /clear`
/// - `/static/*` files from `static_dir`
pub fn build_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/subscribe", get(ws::ws_handler))
        .route(
            "/entity/{id}",
            get(api::get_entity)
                .post(api::update_entity)
                .put(api::update_entity),
        )
        .route("/world", get(api::world).post(api::world))
        .route("/clear", get(api::clear).post(api::clear))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr = config.addr();
    let app = build_router(state, &config.static_dir);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        // Never resolve, so the server keeps running
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(String),

    #[error("serve error: {0}")]
    Serve(String),
}
