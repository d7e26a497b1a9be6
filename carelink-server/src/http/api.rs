//! REST API handlers

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use carelink_core::{Classification, DispatchError, SessionStore};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    /// Number of connected clients
    pub connections: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        connections: state.registry.count().await,
    })
}

/// Live-session health response, including the timing settings clients
/// should expect
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveHealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub keepalive_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

/// GET /api/live/health - live session subsystem status
pub async fn live_health(State(state): State<Arc<AppState>>) -> Json<LiveHealthResponse> {
    Json(LiveHealthResponse {
        status: "ok".to_string(),
        active_connections: state.registry.count().await,
        keepalive_interval_secs: state.live_config.keepalive_interval_secs,
        idle_timeout_secs: state.live_config.idle_timeout_secs,
        handshake_timeout_secs: state.live_config.handshake_timeout_secs,
    })
}

/// Request body for dispatching a voice notification
#[derive(Debug, Deserialize)]
pub struct VoiceNotificationRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "type", alias = "notificationType")]
    pub notification_type: Option<Classification>,
}

/// Response reporting both generation and delivery, camelCase for the
/// mobile clients
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNotificationResponse {
    pub success: bool,
    pub generated: bool,
    pub connection_count: usize,
    pub delivered_to: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/notifications/voice - synthesize and broadcast a notification
pub async fn dispatch_voice_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VoiceNotificationRequest>,
) -> Result<Json<VoiceNotificationResponse>, (StatusCode, Json<VoiceNotificationResponse>)> {
    let classification = request.notification_type.unwrap_or(Classification::Normal);
    let connection_count = state.registry.count().await;

    match state.dispatcher.dispatch(&request.text, classification).await {
        Ok(outcome) if outcome.generated => Ok(Json(VoiceNotificationResponse {
            success: true,
            generated: true,
            connection_count,
            delivered_to: outcome.delivered,
            failed: outcome.failed,
            error: None,
        })),
        Ok(outcome) => Err((
            StatusCode::BAD_GATEWAY,
            Json(VoiceNotificationResponse {
                success: false,
                generated: false,
                connection_count,
                delivered_to: 0,
                failed: 0,
                error: outcome.error,
            }),
        )),
        Err(DispatchError::EmptyText) => Err((
            StatusCode::BAD_REQUEST,
            Json(VoiceNotificationResponse {
                success: false,
                generated: false,
                connection_count,
                delivered_to: 0,
                failed: 0,
                error: Some(DispatchError::EmptyText.to_string()),
            }),
        )),
    }
}

/// Response for clearing the resumption slot
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearSessionResponse {
    pub success: bool,
}

/// DELETE /api/session - operator action wiping the saved resumption handle
pub async fn clear_session(State(state): State<Arc<AppState>>) -> Json<ClearSessionResponse> {
    state.store.clear().await;
    tracing::info!("Saved session handle cleared by operator request");
    Json(ClearSessionResponse { success: true })
}
