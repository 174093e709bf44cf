use crate::api::{handlers, AppState};
use crate::metrics::track_metrics;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.server.max_upload_bytes;

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Inference
        .route("/predict", post(handlers::predict))
        .route("/predict_batch", post(handlers::predict_batch))
        .route("/explain", post(handlers::explain))
        // API document
        .route("/static/swagger.yaml", get(handlers::api_doc))
        .route_layer(middleware::from_fn(track_metrics))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
