use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::MatcherConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// TCP port the HTTP server listens on.
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Base URL of the external face-embedding service.
    pub embedder_url: String,
    /// URL of the external token verifier. When unset, the static
    /// shared-secret verifier is used instead.
    pub auth_url: Option<String>,
    /// Shared secret for the static verifier (single-box deployments).
    pub api_token: Option<String>,
    /// Matcher tuning (match threshold, quality gate).
    pub matcher: MatcherConfig,
    /// Maximum enrollment-snapshot age before a request refreshes it.
    pub cache_max_age: Duration,
    /// Browser origins allowed by CORS; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        let defaults = MatcherConfig::default();

        Self {
            port: env_u16("PORT", 8080),
            db_path,
            embedder_url: std::env::var("ROLLCALL_EMBEDDER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8500".to_string()),
            auth_url: std::env::var("ROLLCALL_AUTH_URL").ok(),
            api_token: std::env::var("ROLLCALL_API_TOKEN").ok(),
            matcher: MatcherConfig {
                match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", defaults.match_threshold),
                quality_threshold: env_f32(
                    "ROLLCALL_QUALITY_THRESHOLD",
                    defaults.quality_threshold,
                ),
                quality_sample_size: env_usize(
                    "ROLLCALL_QUALITY_SAMPLE_SIZE",
                    defaults.quality_sample_size,
                ),
            },
            cache_max_age: Duration::from_secs(env_u64("ROLLCALL_CACHE_MAX_AGE_SECS", 3600)),
            allowed_origins: std::env::var("ROLLCALL_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
