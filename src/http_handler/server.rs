use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handler::{exchange, health_check, info_refs};
use super::structs::HttpState;

/// Routes:
/// - `GET  /<repo>.git/info/refs?service=git-upload-pack|git-receive-pack`
/// - `POST /<repo>.git/git-upload-pack`
/// - `POST /<repo>.git/git-receive-pack`
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/{*path}", get(info_refs).post(exchange))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: HttpState, listen: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "smart HTTP transport listening");
    axum::serve(listener, create_router(state)).await
}
