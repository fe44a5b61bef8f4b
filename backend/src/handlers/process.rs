use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use base64::Engine as _;
use image::{GenericImageView, ImageFormat};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::models::error::AppError;
use crate::models::history::HistoryEntry;
use crate::models::params::ProcessingParameters;
use crate::services::encoder;
use crate::services::pipeline;
use crate::services::sessions::Session;
use crate::AppState;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "application/octet-stream"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub entry_id: String,
    pub original_name: String,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub image_base64: String,
    pub download_filename: String,
    pub download_link: String,
    pub parameters: ProcessingParameters,
}

struct Upload {
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

pub async fn process_image(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, AppError> {
    let _busy = session.try_begin()?;

    let max = state.config.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(max + 1);
    let to_app_error = |e: MultipartError| multipart_error(e, declared, max);

    let mut upload = None;
    let mut params = ProcessingParameters::default();

    while let Some(mut field) = multipart.next_field().await.map_err(to_app_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "params" => {
                let raw = field.text().await.map_err(to_app_error)?;
                if !raw.trim().is_empty() {
                    params = ProcessingParameters::from_json(&raw)?;
                }
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(to_app_error)? {
                    data.extend_from_slice(&chunk);
                    let size = data.len() as u64;
                    if size > max {
                        return Err(AppError::FileTooLarge { size, max });
                    }
                }
                upload = Some(Upload {
                    filename,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("No file in upload".to_string()))?;
    validate_upload(&upload, state.config.max_upload_bytes)?;

    let original = image::load_from_memory(&upload.data)
        .map_err(|e| AppError::Validation(format!("Could not decode image: {}", e)))?;
    let (original_width, original_height) = original.dimensions();

    tracing::info!(
        session_id = %session.id,
        filename = %upload.filename,
        width = original_width,
        height = original_height,
        "Processing upload"
    );

    let output = pipeline::process(&state.upscaler, &original, &params, state.config.max_pixels).await?;

    let (width, height) = output.image.dimensions();
    let mime_type = output.mime_type();
    let download_filename = encoder::download_filename(&upload.filename, output.format);
    let download_link = encoder::download_link(
        &output.bytes,
        mime_type,
        &download_filename,
        "Download enhanced image",
    );
    let image_base64 = base64::engine::general_purpose::STANDARD.encode(&output.bytes);

    let entry = HistoryEntry::new(
        &upload.filename,
        original,
        output.image,
        output.bytes,
        params.clone(),
    );
    let entry_id = entry.id.clone();
    session.history.write().append(entry);

    Ok(Json(ProcessResponse {
        entry_id,
        original_name: upload.filename,
        original_width,
        original_height,
        width,
        height,
        mime_type: mime_type.to_string(),
        image_base64,
        download_filename,
        download_link,
        parameters: params,
    }))
}

/// `declared` is the request's Content-Length, used when the body limit trips.
fn multipart_error(e: MultipartError, declared: u64, max: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::FileTooLarge { size: declared, max }
    } else {
        AppError::Validation(format!("Multipart error: {}", e))
    }
}

fn validate_upload(upload: &Upload, max_bytes: u64) -> Result<(), AppError> {
    let size = upload.data.len() as u64;
    if size > max_bytes {
        return Err(AppError::FileTooLarge { size, max: max_bytes });
    }

    let mime = upload.content_type.to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.iter().any(|t| mime.starts_with(t)) {
        return Err(AppError::InvalidMimeType(upload.content_type.clone()));
    }

    let has_allowed_extension = Path::new(&upload.filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !has_allowed_extension && mime == "application/octet-stream" {
        return Err(AppError::InvalidMimeType(upload.content_type.clone()));
    }

    match image::guess_format(&upload.data) {
        Ok(ImageFormat::Jpeg) | Ok(ImageFormat::Png) => Ok(()),
        Ok(other) => Err(AppError::InvalidMimeType(format!("{:?}", other).to_lowercase())),
        Err(_) => Err(AppError::Validation("Unrecognized image data".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use image::DynamicImage;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::handlers::test_support::*;
    use crate::models::config::AppConfig;

    fn upload(filename: &str, content_type: &str, data: Vec<u8>) -> Upload {
        Upload {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data,
        }
    }

    #[test]
    fn rejects_oversized_upload() {
        let err = validate_upload(&upload("a.png", "image/png", png_bytes(4, 4)), 10).unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { max: 10, .. }));
    }

    #[test]
    fn rejects_non_image_types() {
        let err = validate_upload(&upload("a.gif", "image/gif", png_bytes(2, 2)), 1 << 20).unwrap_err();
        assert!(matches!(err, AppError::InvalidMimeType(_)));

        let err = validate_upload(&upload("a.txt", "application/octet-stream", png_bytes(2, 2)), 1 << 20)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidMimeType(_)));
    }

    #[test]
    fn sniffs_actual_content() {
        assert!(validate_upload(&upload("a.png", "application/octet-stream", png_bytes(2, 2)), 1 << 20).is_ok());

        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        let err = validate_upload(&upload("a.png", "image/png", gif), 1 << 20).unwrap_err();
        assert!(matches!(err, AppError::InvalidMimeType(_)));
    }

    #[tokio::test]
    async fn process_requires_session() {
        let app = test_app(test_config("http://127.0.0.1:9"));
        let (content_type, body) = multipart_body("a.png", "image/png", &png_bytes(4, 4), None);

        let response = app
            .oneshot(
                Request::post("/api/v1/process")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let config = AppConfig {
            max_upload_bytes: 1000,
            ..test_config("http://127.0.0.1:9")
        };
        let (app, session_id) = logged_in_app(config).await;
        let (content_type, body) = multipart_body("huge.png", "image/png", &vec![0u8; 2 << 20], None);

        let response = app
            .oneshot(
                Request::post("/api/v1/process")
                    .header("content-type", content_type)
                    .header(crate::SESSION_HEADER, &session_id)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let problem: Value = read_json(response).await;
        assert_eq!(problem["code"], "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn over_budget_upload_is_rejected_without_remote_call() {
        let (app, session_id) = logged_in_app(test_config("http://127.0.0.1:9")).await;
        let (content_type, body) = multipart_body(
            "big.png",
            "image/png",
            &png_bytes(700, 700),
            Some(r#"{"scaleFactor": 3}"#),
        );

        let response = app
            .oneshot(
                Request::post("/api/v1/process")
                    .header("content-type", content_type)
                    .header(crate::SESSION_HEADER, &session_id)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let problem: Value = read_json(response).await;
        assert_eq!(problem["code"], "PIXEL_BUDGET_EXCEEDED");
    }

    #[tokio::test]
    async fn processed_image_is_returned_and_recorded() {
        let base = spawn_fake_replicate(DynamicImage::new_rgb8(40, 20)).await;
        let (app, session_id) = logged_in_app(test_config(&base)).await;
        let (content_type, body) = multipart_body(
            "cat.png",
            "image/png",
            &png_bytes(20, 10),
            Some(r#"{"outputFormat": "JPEG", "jpegQuality": 90, "brightness": 1.2}"#),
        );

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/process")
                    .header("content-type", content_type)
                    .header(crate::SESSION_HEADER, &session_id)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let result: Value = read_json(response).await;
        assert_eq!(result["width"], 40);
        assert_eq!(result["height"], 20);
        assert_eq!(result["mimeType"], "image/jpeg");
        assert_eq!(result["downloadFilename"], "enhanced_cat.jpg");
        assert!(result["downloadLink"]
            .as_str()
            .unwrap()
            .starts_with("<a href=\"data:image/jpeg;base64,"));

        let response = app
            .oneshot(
                Request::get("/api/v1/history")
                    .header(crate::SESSION_HEADER, &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history: Value = read_json(response).await;
        assert_eq!(history["entries"][0]["id"], result["entryId"]);
        assert_eq!(history["entries"][0]["originalName"], "cat.png");
    }
}
