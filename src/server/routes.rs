//! Router configuration.

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use super::{handlers, middleware, AppState};

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    let api = Router::new()
        // Ingestion
        .route("/channels/process", post(handlers::process_channel))
        .route("/channels/:id/status", get(handlers::channel_status))
        .route("/videos/process", post(handlers::process_video))
        .route("/videos/:id/summary", get(handlers::video_summary))
        // Chat (SSE)
        .route("/chat/stream", post(handlers::video_chat_stream))
        .route("/chat/channel/stream", post(handlers::channel_chat_stream))
        // Queue
        .route("/queue/status", get(handlers::queue_status))
        .route("/queue/position/:qid", get(handlers::queue_position))
        .route("/queue/channel", post(handlers::process_channel))
        .route("/queue/video", post(handlers::process_video))
        // Operations
        .route("/monitor/stats", get(handlers::monitor_stats))
        .route("/cron/status", get(handlers::cron_status))
        .route("/errors/stats", get(handlers::errors_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}

/// Permissive CORS in development; the configured origin list otherwise.
fn cors_layer(state: &AppState) -> CorsLayer {
    if state.settings.allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = state
        .settings
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
