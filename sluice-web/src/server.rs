//! Router assembly and server lifecycle.

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use sluice_core::pipeline::ChannelFilter;
use sluice_core::Library;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{health, serve_fragment, video_status};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Video records and tier queries.
    pub library: Arc<Library>,
    /// Admission filter applied before demand is counted.
    pub channels: ChannelFilter,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/streams/{sd_hash}/{name}", get(serve_fragment))
        .route("/api/v1/video/{uri}", get(video_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` resolves.
///
/// # Errors
///
/// - `std::io::Error` - bind failed or the listener broke
pub async fn run_server(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
