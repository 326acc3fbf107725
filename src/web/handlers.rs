//! HTTP request handlers.

use super::AppState;
use crate::job::DiagnosticRequest;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

// ============================================================================
// Liveness
// ============================================================================

pub async fn handle_root() -> impl IntoResponse {
    Json(json!({ "message": "Network Health Path is active!" }))
}

// ============================================================================
// Integration descriptor
// ============================================================================

pub async fn handle_integration(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = &state.config.base_url;
    let tick_url = format!("{}/network-health", base_url);

    Json(json!({
        "data": {
            "date": {
                "created_at": "2025-02-22",
                "updated_at": "2025-02-22"
            },
            "descriptions": {
                "app_name": "Network Health Path",
                "app_description": "Troubleshooting network outage to get the exact path causing packet loss and report to the telex channel.",
                "app_logo": "https://asset.cloudinary.com/dcoalw1ak/59753e5fc8b83bf1380e8297e89f7b2e",
                "app_url": base_url,
                "background_color": "#fff"
            },
            "is_active": true,
            "integration_type": "interval",
            "key_features": [
                "Troubleshoots network outage to get exact path causing packet loss"
            ],
            "integration_category": "Monitoring & Logging",
            "author": "Blessing Etuk",
            "website": base_url,
            "settings": [
                {
                    "label": "target_URL",
                    "type": "text",
                    "required": true,
                    "default": "google.com"
                },
                {
                    "label": "interval",
                    "type": "text",
                    "required": true,
                    "default": "* * * * *"
                }
            ],
            "tick_url": tick_url,
            "target_url": tick_url
        }
    }))
}

// ============================================================================
// API: Diagnostics
// ============================================================================

pub async fn handle_network_health(
    State(state): State<AppState>,
    Json(req): Json<DiagnosticRequest>,
) -> impl IntoResponse {
    if let Err(e) = reqwest::Url::parse(&req.return_url) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid return_url: {}", e) })),
        )
            .into_response();
    }

    tracing::info!(
        "Accepted diagnostic for channel {} ({} settings)",
        req.channel_id,
        req.settings.len()
    );

    // Runs detached; the orchestrator only needs the acknowledgement
    let _ = state.job.spawn(req);

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}
