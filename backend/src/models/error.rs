use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

tokio::task_local! {
    /// Id assigned to the request being served, set by the request-id middleware.
    pub static REQUEST_ID: String;
}

fn current_request_id() -> String {
    REQUEST_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetail {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub category: ErrorCategory,
    pub request_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Access,
    RemoteService,
    Encoding,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Upscale API credential is not configured")]
    MissingApiCredential,

    #[error("Upscale API credential is malformed; it must start with '{expected_prefix}'")]
    MalformedApiCredential { expected_prefix: &'static str },

    #[error("Access token is not configured on the server")]
    AccessTokenNotConfigured,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Missing session token")]
    MissingSessionToken,

    #[error("Session not found or expired")]
    SessionNotFound,

    #[error("Another request is already being processed in this session")]
    SessionBusy,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Image of {width}x{height} at scale {scale} exceeds the {ceiling} pixel budget")]
    PixelBudgetExceeded {
        width: u32,
        height: u32,
        scale: u32,
        ceiling: u64,
    },

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid MIME type: {0}")]
    InvalidMimeType(String),

    #[error("Upscale service rejected the credential: {0}")]
    RemoteAuth(String),

    #[error("Upscale service unreachable: {0}")]
    RemoteTransport(String),

    #[error("Unexpected response from upscale service: {0}")]
    RemoteUnexpectedResponse(String),

    #[error("Upscale prediction failed: {0}")]
    RemotePredictionFailed(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::MissingApiCredential
            | AppError::MalformedApiCredential { .. }
            | AppError::AccessTokenNotConfigured => ErrorCategory::Configuration,
            AppError::Validation(_)
            | AppError::PixelBudgetExceeded { .. }
            | AppError::FileTooLarge { .. }
            | AppError::InvalidMimeType(_) => ErrorCategory::Validation,
            AppError::InvalidAccessToken
            | AppError::MissingSessionToken
            | AppError::SessionNotFound
            | AppError::SessionBusy => ErrorCategory::Access,
            AppError::RemoteAuth(_)
            | AppError::RemoteTransport(_)
            | AppError::RemoteUnexpectedResponse(_)
            | AppError::RemotePredictionFailed(_) => ErrorCategory::RemoteService,
            AppError::Encoding(_) => ErrorCategory::Encoding,
            AppError::NotFound(_) | AppError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingApiCredential
            | AppError::MalformedApiCredential { .. }
            | AppError::AccessTokenNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidAccessToken | AppError::SessionNotFound => StatusCode::UNAUTHORIZED,
            AppError::MissingSessionToken => StatusCode::FORBIDDEN,
            AppError::SessionBusy => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PixelBudgetExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InvalidMimeType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RemoteAuth(_)
            | AppError::RemoteTransport(_)
            | AppError::RemoteUnexpectedResponse(_)
            | AppError::RemotePredictionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Encoding(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingApiCredential => "MISSING_API_CREDENTIAL",
            AppError::MalformedApiCredential { .. } => "MALFORMED_API_CREDENTIAL",
            AppError::AccessTokenNotConfigured => "ACCESS_TOKEN_NOT_CONFIGURED",
            AppError::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            AppError::MissingSessionToken => "MISSING_SESSION_TOKEN",
            AppError::SessionNotFound => "SESSION_NOT_FOUND",
            AppError::SessionBusy => "SESSION_BUSY",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::PixelBudgetExceeded { .. } => "PIXEL_BUDGET_EXCEEDED",
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::InvalidMimeType(_) => "INVALID_MIME_TYPE",
            AppError::RemoteAuth(_) => "REMOTE_AUTH_FAILED",
            AppError::RemoteTransport(_) => "REMOTE_TRANSPORT_FAILED",
            AppError::RemoteUnexpectedResponse(_) => "REMOTE_UNEXPECTED_RESPONSE",
            AppError::RemotePredictionFailed(_) => "REMOTE_PREDICTION_FAILED",
            AppError::Encoding(_) => "ENCODING_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Configuration Error",
            ErrorCategory::Validation => "Validation Error",
            ErrorCategory::Access => "Access Denied",
            ErrorCategory::RemoteService => "Upscale Service Error",
            ErrorCategory::Encoding => "Encoding Error",
            ErrorCategory::Internal => match self {
                AppError::NotFound(_) => "Not Found",
                _ => "Internal Error",
            },
        }
    }

    pub fn to_problem_detail(&self, request_id: &str) -> ProblemDetail {
        let code = self.code();
        ProblemDetail {
            problem_type: format!("https://upscaler.local/problems/{}", code.to_lowercase()),
            title: self.title().to_string(),
            status: self.status().as_u16(),
            detail: self.to_string(),
            code: code.to_string(),
            category: self.category(),
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Encoding | ErrorCategory::RemoteService => {
                tracing::error!(code = self.code(), error = %self, "request failed");
            }
            _ => tracing::debug!(code = self.code(), error = %self, "request rejected"),
        }
        let problem = self.to_problem_detail(&request_id);

        let mut response = (self.status(), Json(problem)).into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("X-Request-Id", value);
        }
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_invalid_access_tokens_are_different_failures() {
        let missing = AppError::AccessTokenNotConfigured;
        let wrong = AppError::InvalidAccessToken;

        assert_eq!(missing.category(), ErrorCategory::Configuration);
        assert_eq!(wrong.category(), ErrorCategory::Access);
        assert_ne!(missing.status(), wrong.status());
    }

    #[test]
    fn problem_detail_carries_code_and_message() {
        let err = AppError::PixelBudgetExceeded {
            width: 700,
            height: 700,
            scale: 3,
            ceiling: 1_000_000,
        };
        let problem = err.to_problem_detail("req-1");

        assert_eq!(problem.status, 422);
        assert_eq!(problem.code, "PIXEL_BUDGET_EXCEEDED");
        assert_eq!(problem.category, ErrorCategory::Validation);
        assert!(problem.detail.contains("700x700"));
        assert_eq!(problem.request_id, "req-1");
    }

    #[tokio::test]
    async fn problem_body_uses_the_scoped_request_id() {
        let response = REQUEST_ID
            .scope("req-42".to_string(), async { AppError::SessionNotFound.into_response() })
            .await;

        assert_eq!(response.headers()["X-Request-Id"], "req-42");
        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let problem: ProblemDetail = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(problem.request_id, "req-42");
    }

    #[test]
    fn remote_failures_map_to_bad_gateway() {
        for err in [
            AppError::RemoteAuth("401".into()),
            AppError::RemoteTransport("refused".into()),
            AppError::RemoteUnexpectedResponse("number".into()),
            AppError::RemotePredictionFailed("oom".into()),
        ] {
            assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
            assert_eq!(err.category(), ErrorCategory::RemoteService);
        }
    }
}
