use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use super::handlers::{self, StreamState};

pub fn build_router(state: Arc<StreamState>) -> Router {
    Router::new()
        .route("/cam", get(handlers::liveness))
        .route("/cam.mjpeg", get(handlers::mjpeg_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
