//! HTTP surface: `POST /api/chat` streams one relay session as plain text.

mod handlers;


use crate::auth::AuthManager;
use crate::core::relay::GenerationBackend;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use handlers::ChatBody;

#[derive(Clone)]
pub struct ServerState {
    pub auth: Arc<AuthManager>,
    pub backend: Arc<dyn GenerationBackend>,
}

impl ServerState {
    pub fn new(auth: AuthManager, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            auth: Arc::new(auth),
            backend,
        }
    }
}

pub fn create_app(state: ServerState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: ServerState, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("relay listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_app(state)).await?;
    Ok(())
}
