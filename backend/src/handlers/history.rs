use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::error::AppError;
use crate::models::history::HistorySummary;
use crate::services::encoder;
use crate::services::sessions::Session;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub entries: Vec<HistorySummary>,
}

/// Newest entries first.
pub async fn list_history(Extension(session): Extension<Arc<Session>>) -> Json<HistoryResponse> {
    let entries = session.history.read().recent().map(|e| e.summary()).collect();
    Json(HistoryResponse { entries })
}

pub async fn get_original(
    Extension(session): Extension<Arc<Session>>,
    Path(entry_id): Path<String>,
) -> Result<Response, AppError> {
    let original = session
        .history
        .read()
        .get(&entry_id)
        .map(|e| e.original.clone())
        .ok_or_else(|| AppError::NotFound(format!("History entry not found: {}", entry_id)))?;

    let data = encoder::encode_png(&original)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response())
}

pub async fn get_processed(
    Extension(session): Extension<Arc<Session>>,
    Path(entry_id): Path<String>,
) -> Result<Response, AppError> {
    let (data, format, original_name) = session
        .history
        .read()
        .get(&entry_id)
        .map(|e| {
            (
                e.processed_bytes.clone(),
                e.parameters.output_format,
                e.original_name.clone(),
            )
        })
        .ok_or_else(|| AppError::NotFound(format!("History entry not found: {}", entry_id)))?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        encoder::download_filename(&original_name, format)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}
