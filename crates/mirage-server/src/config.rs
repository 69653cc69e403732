//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use mirage_core::manager::ManagerOptions;
use mirage_core::quota::QuotaLimits;
use mirage_core::upstream::{UpstreamConfig, UpstreamEndpoint};

/// Runtime configuration for mirage-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set (upstream API keys excepted).
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Google generative API base URL and key.
    pub google_api_base: String,
    pub google_api_key: String,

    /// Sora-compatible endpoint base URL and key.
    pub sora_api_base: String,
    pub sora_api_key: String,

    /// Custom OpenAI-compatible endpoint base URL and key.
    pub custom_api_base: String,
    pub custom_api_key: String,

    /// Maximum simultaneously active upstream generation calls.
    pub max_concurrent: usize,

    /// Reconciliation poll interval in seconds.
    pub poll_interval_secs: u64,

    /// Daily per-kind quota limits.
    pub video_quota: u32,
    pub image_quota: u32,
    pub chat_quota: u32,

    /// Comma-separated CORS origin allowlist; `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Serve the Swagger UI (disable in production).
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("MIRAGE_BIND", "0.0.0.0:8080"),
            log_level: env_or("MIRAGE_LOG", "info"),
            log_json: std::env::var("MIRAGE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            google_api_base: env_or(
                "MIRAGE_GOOGLE_API_BASE",
                "https://generativelanguage.googleapis.com",
            ),
            google_api_key: env_or("MIRAGE_GOOGLE_API_KEY", ""),
            sora_api_base: env_or("MIRAGE_SORA_API_BASE", ""),
            sora_api_key: env_or("MIRAGE_SORA_API_KEY", ""),
            custom_api_base: env_or("MIRAGE_CUSTOM_API_BASE", ""),
            custom_api_key: env_or("MIRAGE_CUSTOM_API_KEY", ""),
            max_concurrent: parse_env("MIRAGE_MAX_CONCURRENT", 3),
            poll_interval_secs: parse_env("MIRAGE_POLL_INTERVAL_SECS", 3),
            video_quota: parse_env("MIRAGE_VIDEO_QUOTA", 10),
            image_quota: parse_env("MIRAGE_IMAGE_QUOTA", 40),
            chat_quota: parse_env("MIRAGE_CHAT_QUOTA", 200),
            cors_allowed_origins: std::env::var("MIRAGE_CORS_ORIGINS").ok(),
            enable_swagger: std::env::var("MIRAGE_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            video: self.video_quota,
            image: self.image_quota,
            chat: self.chat_quota,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            max_concurrent: self.max_concurrent,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            quota: self.quota_limits(),
        }
    }

    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            google: UpstreamEndpoint {
                base_url: self.google_api_base.clone(),
                api_key: self.google_api_key.clone(),
            },
            sora: UpstreamEndpoint {
                base_url: self.sora_api_base.clone(),
                api_key: self.sora_api_key.clone(),
            },
            custom: UpstreamEndpoint {
                base_url: self.custom_api_base.clone(),
                api_key: self.custom_api_key.clone(),
            },
            ..UpstreamConfig::default()
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
