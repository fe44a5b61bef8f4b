use std::env;

pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
/// `nightmareai/real-esrgan`
pub const DEFAULT_MODEL_VERSION: &str =
    "42fed1c4974146d4d2414e2be2c5277c7fcf05fcc3a73abf41610695738c1d7b";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    pub replicate_api_token: Option<String>,
    pub replicate_api_base: String,
    pub replicate_model_version: String,
    pub poll_interval_ms: u64,
    pub access_token: Option<String>,
    pub max_upload_bytes: u64,
    pub max_pixels: u64,
    pub require_https: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            log_level: "info".to_string(),
            replicate_api_token: None,
            replicate_api_base: DEFAULT_REPLICATE_API_BASE.to_string(),
            replicate_model_version: DEFAULT_MODEL_VERSION.to_string(),
            poll_interval_ms: 1000,
            access_token: None,
            max_upload_bytes: 209_715_200,
            max_pixels: 1_000_000,
            require_https: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.allowed_origins),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            replicate_api_token: non_empty_env("REPLICATE_API_TOKEN"),
            replicate_api_base: non_empty_env("REPLICATE_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.replicate_api_base),
            replicate_model_version: non_empty_env("REPLICATE_MODEL_VERSION")
                .unwrap_or(defaults.replicate_model_version),
            poll_interval_ms: env::var("UPSCALE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            access_token: non_blank(env::var("APP_ACCESS_TOKEN").ok()),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            max_pixels: env::var("MAX_PIXELS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.max_pixels),
            require_https: env::var("REQUIRE_HTTPS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Unset and blank variables are treated the same.
fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Drops blank values but keeps the value byte for byte otherwise.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
