use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::error::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct OpenSessionRequest {
    pub token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResponse {
    pub session_id: String,
    pub created_at: String,
}

pub async fn open_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<Json<OpenSessionResponse>, AppError> {
    let session = state.sessions.open(&req.token)?;
    Ok(Json(OpenSessionResponse {
        session_id: session.id.clone(),
        created_at: session.created_at.to_rfc3339(),
    }))
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = crate::session_token(&headers)?;
    state.sessions.close(token)?;
    Ok(StatusCode::NO_CONTENT)
}
