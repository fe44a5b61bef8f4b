mod handlers;
mod models;
mod services;

use std::sync::Arc;
use axum::{
    Router,
    middleware,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header::HeaderName},
    response::Response,
    body::Body,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use models::config::AppConfig;
use models::error::AppError;
use services::access_gate::AccessGate;
use services::sessions::SessionManager;
use services::upscaler::ReplicateClient;

pub const SESSION_HEADER: &str = "X-Session-Token";

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub upscaler: ReplicateClient,
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            upscaler: ReplicateClient::new(config.clone()),
            sessions: SessionManager::new(AccessGate::new(config.access_token.clone())),
            config,
        }
    }
}

pub fn session_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MissingSessionToken)
}

/// Resolves `X-Session-Token` into the caller's session.
async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: middleware::Next,
) -> Result<Response, AppError> {
    let token = session_token(request.headers())?;
    let session = state.sessions.get(token).ok_or(AppError::SessionNotFound)?;
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Headers that must never appear in logs.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-session-token", "cookie"];

fn is_sensitive_header(name: &HeaderName) -> bool {
    let lower = name.as_str();
    SENSITIVE_HEADERS.iter().any(|&s| lower == s)
}

/// Reject plain-HTTP requests when the server is bound to a non-loopback address.
async fn require_https_middleware(
    request: Request<Body>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    // If the request came through a reverse proxy that set X-Forwarded-Proto, trust it.
    let proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());

    let is_https = proto.map_or(false, |p| p.eq_ignore_ascii_case("https"));
    if !is_https {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}

async fn request_id_middleware(
    request: Request<Body>,
    next: middleware::Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut response = models::error::REQUEST_ID
        .scope(request_id.clone(), next.run(request))
        .await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let config = state.config.clone();

    let cors_origins: Vec<HeaderValue> = config.allowed_origins.iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-session-token"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("content-disposition"),
        ]);

    let protected = Router::new()
        .route("/process", axum::routing::post(handlers::process::process_image))
        .route("/history", axum::routing::get(handlers::history::list_history))
        .route("/history/:entry_id/original", axum::routing::get(handlers::history::get_original))
        .route("/history/:entry_id/processed", axum::routing::get(handlers::history::get_processed))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    let api_v1 = Router::new()
        .route(
            "/session",
            axum::routing::post(handlers::session::open_session)
                .delete(handlers::session::close_session),
        )
        .merge(protected);

    // Trace layer that redacts credentials from log output
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            let safe_headers: Vec<String> = request
                .headers()
                .keys()
                .map(|name| {
                    if is_sensitive_header(name) {
                        format!("{}=[REDACTED]", name)
                    } else {
                        let val = request
                            .headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        format!("{}={}", name, val)
                    }
                })
                .collect();

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                headers = %safe_headers.join(", "),
            )
        })
        .on_response(|response: &Response, latency: std::time::Duration, _span: &Span| {
            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = latency.as_millis() as u64,
                "response",
            );
        });

    // Multipart framing on top of the largest accepted file.
    let body_limit = config.max_upload_bytes as usize + 1024 * 1024;

    let mut app = Router::new()
        .nest("/api/v1", api_v1)
        .route("/api/health", axum::routing::get(handlers::health::health_check))
        .route("/api/version", axum::routing::get(handlers::health::version))
        .route("/api/status", axum::routing::get(handlers::health::status))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state);

    // Enforce HTTPS when explicitly configured or when bound to a remote address
    let is_remote = {
        let addr_str = config.listen_addr.as_str();
        let host = addr_str.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr_str);
        !matches!(host, "127.0.0.1" | "::1" | "[::1]" | "localhost" | "0.0.0.0")
    };
    if config.require_https || is_remote {
        tracing::warn!(
            "HTTPS enforced (require_https={}, listen_addr={}); non-HTTPS requests will be rejected",
            config.require_https, config.listen_addr
        );
        app = app.layer(middleware::from_fn(require_https_middleware));
    }

    app
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    handlers::health::init_start_time();

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()));

    if !state.sessions.gate().is_configured() {
        tracing::error!("APP_ACCESS_TOKEN is not set; every login will be refused");
    }
    match state.upscaler.credential_status() {
        services::upscaler::CredentialStatus::Ready => {}
        status => tracing::error!(?status, "REPLICATE_API_TOKEN is unusable; processing is disabled"),
    }

    let app = build_router(state);

    let addr = config.listen_addr.clone();
    tracing::info!(
        max_pixels = config.max_pixels,
        max_upload_bytes = config.max_upload_bytes,
        "Starting server on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
