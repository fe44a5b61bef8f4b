use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::services::upscaler::CredentialStatus;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub upscale_api: CredentialStatus,
    pub access_gate_configured: bool,
    pub active_sessions: usize,
    pub max_pixels: u64,
    pub max_upload_bytes: u64,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

pub async fn health_check() -> Json<HealthResponse> {
    let uptime = START_TIME
        .get()
        .map(|s| s.elapsed().as_secs_f64())
        .unwrap_or(0.0);

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime,
    })
}

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "apiVersion": "v1",
        "buildHash": env!("CARGO_PKG_VERSION")
    }))
}

/// Which features are usable with the current configuration.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        upscale_api: state.upscaler.credential_status(),
        access_gate_configured: state.sessions.gate().is_configured(),
        active_sessions: state.sessions.len(),
        max_pixels: state.config.max_pixels,
        max_upload_bytes: state.config.max_upload_bytes,
    })
}
