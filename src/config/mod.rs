//! Runtime configuration.
//!
//! [`Config`] is loaded from environment variables (with `.env` support) and
//! covers the gateway connection, logging, retry policy and pipe names.
//! The discussion itself is described by a [`BoardConfig`] YAML document.

mod board;

pub use board::*;

use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub retry: RetryConfig,
    pub pipes: PipeConfig,
    pub paths: PathConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Retry policy applied by the error handler to rate-limited calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total gateway attempts for one call, including the first.
    pub max_attempts: u32,
    /// Backoff before retry `n` is `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,
}

/// Langbase pipe name per worker role
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub facilitator: String,
    pub followup: String,
    pub analyst: String,
    pub themes: String,
    pub bias: String,
    pub moderator: String,
    pub persona: String,
}

/// Board configuration path used when `BOARD_CONFIG` is unset.
pub const DEFAULT_BOARD_CONFIG_PATH: &str = "config/board_config.yml";

/// Input and output locations
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub board_config: PathBuf,
    pub export_dir: PathBuf,
}

impl PathConfig {
    /// Board configuration path from `BOARD_CONFIG`, or the default.
    pub fn board_config_from_env() -> PathBuf {
        PathBuf::from(
            env::var("BOARD_CONFIG").unwrap_or_else(|_| DEFAULT_BOARD_CONFIG_PATH.to_string()),
        )
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
        };

        let retry = RetryConfig {
            max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 3),
            backoff_base_ms: parse_env("RETRY_BACKOFF_BASE_MS", 1000),
        };

        let defaults = PipeConfig::default();
        let pipes = PipeConfig {
            facilitator: env::var("PIPE_FACILITATOR").unwrap_or(defaults.facilitator),
            followup: env::var("PIPE_FOLLOWUP").unwrap_or(defaults.followup),
            analyst: env::var("PIPE_ANALYST").unwrap_or(defaults.analyst),
            themes: env::var("PIPE_THEMES").unwrap_or(defaults.themes),
            bias: env::var("PIPE_BIAS").unwrap_or(defaults.bias),
            moderator: env::var("PIPE_MODERATOR").unwrap_or(defaults.moderator),
            persona: env::var("PIPE_PERSONA").unwrap_or(defaults.persona),
        };

        let paths = PathConfig {
            board_config: PathConfig::board_config_from_env(),
            export_dir: PathBuf::from(env::var("EXPORT_DIR").unwrap_or_else(|_| "./data".to_string())),
        };

        Ok(Config {
            langbase,
            logging,
            request,
            retry,
            pipes,
            paths,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            facilitator: "vb-facilitator-v1".to_string(),
            followup: "vb-followup-v1".to_string(),
            analyst: "vb-response-analyst-v1".to_string(),
            themes: "vb-theme-analyst-v1".to_string(),
            bias: "vb-bias-moderator-v1".to_string(),
            moderator: "vb-moderator-v1".to_string(),
            persona: "vb-persona-v1".to_string(),
        }
    }
}
