use thiserror::Error;

use crate::board::Phase;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Board configuration error: {message}")]
    Board { message: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Invalid phase transition: {from} -> {to}")]
    PhaseTransition { from: Phase, to: Phase },

    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: Phase, message: String },

    #[error("Export failed for {failed} file(s): {message}")]
    Export { failed: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by a capability gateway call
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Response validation failed: {message}")]
    Validation { message: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Other { message: String },
}

impl GatewayError {
    /// Shorthand for an unclassified failure carrying only a message.
    pub fn other(message: impl Into<String>) -> Self {
        GatewayError::Other {
            message: message.into(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Board {
            message: "no personas".to_string(),
        };
        assert_eq!(err.to_string(), "Board configuration error: no personas");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_phase_errors_display() {
        let err = AppError::PhaseTransition {
            from: Phase::Converge,
            to: Phase::Diverge,
        };
        assert_eq!(
            err.to_string(),
            "Invalid phase transition: converge -> diverge"
        );

        let err = AppError::PhaseFailed {
            phase: Phase::Diverge,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Phase diverge failed: boom");
    }

    #[test]
    fn test_export_error_display() {
        let err = AppError::Export {
            failed: 2,
            message: "a.json (denied), b.json (denied)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Export failed for 2 file(s): a.json (denied), b.json (denied)"
        );
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::RateLimited {
            message: "slow down".to_string(),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded: slow down");

        let err = GatewayError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = GatewayError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = GatewayError::other("socket closed");
        assert_eq!(err.to_string(), "socket closed");
    }

    #[test]
    fn test_gateway_error_conversion_to_app_error() {
        let gateway_err = GatewayError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = gateway_err.into();
        assert!(matches!(app_err, AppError::Gateway(_)));
    }

    #[test]
    fn test_io_error_conversion_to_app_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }
}
