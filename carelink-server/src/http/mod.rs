//! HTTP server module

mod api;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

pub use api::{
    ClearSessionResponse, HealthResponse, LiveHealthResponse, VoiceNotificationRequest,
    VoiceNotificationResponse,
};

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/live/health", get(api::live_health))
        .route("/api/notifications/voice", post(api::dispatch_voice_notification))
        .route("/api/session", delete(api::clear_session))
        .route("/live", get(crate::ws::live_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
