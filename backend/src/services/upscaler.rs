use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::config::AppConfig;
use crate::models::error::AppError;
use crate::models::params::{ProcessingParameters, ScaleFactor};
use crate::services::encoder;

/// Replicate API tokens always carry this prefix.
pub const CREDENTIAL_PREFIX: &str = "r8_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpscaleRequest {
    pub scale: ScaleFactor,
    pub face_enhance: bool,
    pub noise_level: u8,
}

impl From<&ProcessingParameters> for UpscaleRequest {
    fn from(params: &ProcessingParameters) -> Self {
        Self {
            scale: params.scale_factor,
            face_enhance: params.face_enhance,
            noise_level: params.denoise_level,
        }
    }
}

/// A remote super-resolution backend.
pub trait Upscaler {
    fn upscale(
        &self,
        img: &DynamicImage,
        request: &UpscaleRequest,
    ) -> impl Future<Output = Result<DynamicImage, AppError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialStatus {
    Ready,
    Missing,
    Malformed,
}

pub struct ReplicateClient {
    config: Arc<AppConfig>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput,
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    image: String,
    face_enhance: bool,
    scale: u32,
    noise_level: u8,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

/// The shapes a model may return its result in.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PredictionOutput {
    Url(String),
    Sequence(Vec<String>),
    Object { url: String },
    Unrecognized(serde_json::Value),
}

impl PredictionOutput {
    pub fn into_url(self) -> Result<String, AppError> {
        match self {
            PredictionOutput::Url(url) | PredictionOutput::Object { url } => Ok(url),
            PredictionOutput::Sequence(urls) => urls.into_iter().next().ok_or_else(|| {
                AppError::RemoteUnexpectedResponse("model returned an empty output list".to_string())
            }),
            PredictionOutput::Unrecognized(value) => Err(AppError::RemoteUnexpectedResponse(
                format!("unrecognized output shape: {}", value),
            )),
        }
    }
}

impl ReplicateClient {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn credential_status(&self) -> CredentialStatus {
        match self.credential() {
            Ok(_) => CredentialStatus::Ready,
            Err(AppError::MissingApiCredential) => CredentialStatus::Missing,
            Err(_) => CredentialStatus::Malformed,
        }
    }

    fn credential(&self) -> Result<&str, AppError> {
        let token = self
            .config
            .replicate_api_token
            .as_deref()
            .ok_or(AppError::MissingApiCredential)?;
        if !token.starts_with(CREDENTIAL_PREFIX) {
            return Err(AppError::MalformedApiCredential {
                expected_prefix: CREDENTIAL_PREFIX,
            });
        }
        Ok(token)
    }

    async fn run_prediction(
        &self,
        img: &DynamicImage,
        request: &UpscaleRequest,
    ) -> Result<DynamicImage, AppError> {
        let token = self.credential()?;

        let png = encoder::encode_png(img)?;
        let body = PredictionRequest {
            version: &self.config.replicate_model_version,
            input: PredictionInput {
                image: encoder::data_uri(&png, "image/png"),
                face_enhance: request.face_enhance,
                scale: request.scale.as_u32(),
                noise_level: request.noise_level,
            },
        };

        let (w, h) = img.dimensions();
        info!(
            width = w,
            height = h,
            scale = request.scale.as_u32(),
            face_enhance = request.face_enhance,
            noise_level = request.noise_level,
            "Submitting upscale prediction"
        );

        let url = format!("{}/predictions", self.config.replicate_api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::RemoteTransport(format!("prediction request failed: {}", e)))?;

        let mut prediction = parse_prediction(response).await?;
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        // Fixed by the first pending response; later polls are not re-read.
        let mut poll_url: Option<String> = None;

        loop {
            match prediction.status {
                PredictionStatus::Succeeded => break,
                PredictionStatus::Starting | PredictionStatus::Processing => {
                    if poll_url.is_none() {
                        poll_url = prediction.urls.as_ref().and_then(|u| u.get.clone());
                    }
                    let url = poll_url.as_deref().ok_or_else(|| {
                        AppError::RemoteUnexpectedResponse(
                            "pending prediction has no poll URL".to_string(),
                        )
                    })?;
                    debug!(id = ?prediction.id, status = ?prediction.status, "prediction pending");
                    tokio::time::sleep(interval).await;

                    let response = self
                        .client
                        .get(url)
                        .bearer_auth(token)
                        .send()
                        .await
                        .map_err(|e| AppError::RemoteTransport(format!("poll request failed: {}", e)))?;
                    prediction = parse_prediction(response).await?;
                }
                PredictionStatus::Failed | PredictionStatus::Canceled => {
                    let reason = prediction
                        .error
                        .as_ref()
                        .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                        .unwrap_or_else(|| format!("{:?}", prediction.status).to_lowercase());
                    return Err(AppError::RemotePredictionFailed(reason));
                }
                PredictionStatus::Unknown => {
                    return Err(AppError::RemoteUnexpectedResponse(
                        "prediction has an unknown status".to_string(),
                    ));
                }
            }
        }

        let output_url = prediction
            .output
            .ok_or_else(|| AppError::RemoteUnexpectedResponse("prediction has no output".to_string()))?
            .into_url()?;

        info!(id = ?prediction.id, "Downloading upscaled image");
        self.download(&output_url).await
    }

    async fn download(&self, url: &str) -> Result<DynamicImage, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::RemoteTransport(format!("result download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteTransport(format!(
                "result download returned {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::RemoteTransport(format!("failed reading result: {}", e)))?;

        image::load_from_memory(&bytes).map_err(|e| {
            AppError::RemoteUnexpectedResponse(format!("result is not a decodable image: {}", e))
        })
    }
}

impl Upscaler for ReplicateClient {
    async fn upscale(
        &self,
        img: &DynamicImage,
        request: &UpscaleRequest,
    ) -> Result<DynamicImage, AppError> {
        self.run_prediction(img, request).await
    }
}

async fn parse_prediction(response: reqwest::Response) -> Result<Prediction, AppError> {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::RemoteAuth(body));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::RemoteUnexpectedResponse(format!(
            "upscale API error {}: {}",
            status, body
        )));
    }

    response.json().await.map_err(|e| {
        AppError::RemoteUnexpectedResponse(format!("failed to parse prediction: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    const REQUEST: UpscaleRequest = UpscaleRequest {
        scale: ScaleFactor::X2,
        face_enhance: true,
        noise_level: 1,
    };

    fn result_png() -> Vec<u8> {
        encoder::encode_png(&DynamicImage::new_rgb8(8, 6)).unwrap()
    }

    async fn spawn_fake(build: impl FnOnce(String) -> Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = build(base.clone()).route("/files/out.png", get(|| async { result_png() }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn client(token: Option<&str>, base: &str) -> ReplicateClient {
        ReplicateClient::new(Arc::new(AppConfig {
            replicate_api_token: token.map(str::to_string),
            replicate_api_base: base.to_string(),
            poll_interval_ms: 5,
            ..AppConfig::default()
        }))
    }

    async fn upscale_with_output(output: impl Fn(&str) -> Value) -> Result<DynamicImage, AppError> {
        let base = spawn_fake(|base| {
            let body = json!({ "id": "p1", "status": "succeeded", "output": output(&base) });
            Router::new().route(
                "/predictions",
                post(move || {
                    let body = body.clone();
                    async move { Json(body) }
                }),
            )
        })
        .await;
        client(Some("r8_test"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &REQUEST)
            .await
    }

    #[tokio::test]
    async fn missing_credential_fails_before_network() {
        let client = client(None, "http://127.0.0.1:9");
        assert_eq!(client.credential_status(), CredentialStatus::Missing);

        let err = client.upscale(&DynamicImage::new_rgb8(4, 4), &REQUEST).await.unwrap_err();
        assert!(matches!(err, AppError::MissingApiCredential));
    }

    #[tokio::test]
    async fn malformed_credential_fails_before_network() {
        let client = client(Some("sk-wrong"), "http://127.0.0.1:9");
        assert_eq!(client.credential_status(), CredentialStatus::Malformed);

        let err = client.upscale(&DynamicImage::new_rgb8(4, 4), &REQUEST).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedApiCredential { .. }));
    }

    #[tokio::test]
    async fn accepts_bare_url_output() {
        let img = upscale_with_output(|base| json!(format!("{}/files/out.png", base)))
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (8, 6));
    }

    #[tokio::test]
    async fn accepts_sequence_output() {
        let img = upscale_with_output(|base| {
            json!([format!("{}/files/out.png", base), "http://unused.invalid/second.png"])
        })
        .await
        .unwrap();
        assert_eq!(img.dimensions(), (8, 6));
    }

    #[tokio::test]
    async fn accepts_object_output() {
        let img = upscale_with_output(|base| {
            json!({ "url": format!("{}/files/out.png", base), "size": 123 })
        })
        .await
        .unwrap();
        assert_eq!(img.dimensions(), (8, 6));
    }

    #[tokio::test]
    async fn rejects_unrecognized_output() {
        let err = upscale_with_output(|_| json!(42)).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteUnexpectedResponse(_)));

        let err = upscale_with_output(|_| json!([])).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteUnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn sends_model_version_and_parameters() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let base = spawn_fake(move |base| {
            let output = format!("{}/files/out.png", base);
            Router::new().route(
                "/predictions",
                post(move |Json(payload): Json<Value>| {
                    *captured.lock() = Some(payload);
                    let output = output.clone();
                    async move { Json(json!({ "status": "succeeded", "output": output })) }
                }),
            )
        })
        .await;

        let request = UpscaleRequest { scale: ScaleFactor::X3, face_enhance: false, noise_level: 2 };
        client(Some("r8_test"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &request)
            .await
            .unwrap();

        let payload = seen.lock().take().unwrap();
        assert_eq!(payload["version"], crate::models::config::DEFAULT_MODEL_VERSION);
        assert_eq!(payload["input"]["scale"], 3);
        assert_eq!(payload["input"]["face_enhance"], false);
        assert_eq!(payload["input"]["noise_level"], 2);
        assert!(payload["input"]["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn polls_until_prediction_succeeds() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let base = spawn_fake(move |base| {
            let pending = json!({
                "id": "p2",
                "status": "starting",
                "urls": { "get": format!("{}/predictions/p2", base) }
            });
            let output = format!("{}/files/out.png", base);
            Router::new()
                .route(
                    "/predictions",
                    post(move || {
                        let pending = pending.clone();
                        async move { Json(pending) }
                    }),
                )
                .route(
                    "/predictions/p2",
                    get(move || {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let status = if n < 2 { "processing" } else { "succeeded" };
                        let body = json!({
                            "id": "p2",
                            "status": status,
                            "output": [output.clone()],
                            "urls": { "get": "unused" }
                        });
                        async move { Json(body) }
                    }),
                )
        })
        .await;

        let img = client(Some("r8_test"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &REQUEST)
            .await
            .unwrap();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(Some("r8_test"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &REQUEST)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteTransport(_)));
    }

    #[tokio::test]
    async fn failed_prediction_reports_reason() {
        let base = spawn_fake(|_| {
            Router::new().route(
                "/predictions",
                post(|| async { Json(json!({ "status": "failed", "error": "CUDA out of memory" })) }),
            )
        })
        .await;

        let err = client(Some("r8_test"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &REQUEST)
            .await
            .unwrap_err();
        match err {
            AppError::RemotePredictionFailed(reason) => assert_eq!(reason, "CUDA out of memory"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_an_auth_error() {
        let base = spawn_fake(|_| {
            Router::new().route(
                "/predictions",
                post(|| async { (StatusCode::UNAUTHORIZED, "invalid token") }),
            )
        })
        .await;

        let err = client(Some("r8_revoked"), &base)
            .upscale(&DynamicImage::new_rgb8(4, 3), &REQUEST)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteAuth(_)));
    }

    #[test]
    fn output_shapes_decode_to_variants() {
        let parse = |v: Value| serde_json::from_value::<PredictionOutput>(v).unwrap();

        assert_eq!(parse(json!("https://x/a.png")), PredictionOutput::Url("https://x/a.png".into()));
        assert_eq!(
            parse(json!(["https://x/a.png"])),
            PredictionOutput::Sequence(vec!["https://x/a.png".into()])
        );
        assert_eq!(
            parse(json!({ "url": "https://x/a.png" })),
            PredictionOutput::Object { url: "https://x/a.png".into() }
        );
        assert!(matches!(parse(json!({ "href": "x" })), PredictionOutput::Unrecognized(_)));
    }
}
