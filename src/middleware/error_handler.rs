//! Error classification and recovery.
//!
//! Every gateway failure is classified into an [`ErrorKind`] and mapped to
//! one [`Recovery`] decision. Retry policy lives here and nowhere else.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::RetryConfig;
use crate::error::GatewayError;

/// Classified gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    Validation,
    ApiError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::ApiError => "api_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Classify a gateway error. Typed variants map directly; untyped
    /// failures are classified by their message.
    pub fn classify(err: &GatewayError) -> Self {
        match err {
            GatewayError::RateLimited { .. } => ErrorKind::RateLimit,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Validation { .. } => ErrorKind::Validation,
            GatewayError::Api { .. } => ErrorKind::ApiError,
            GatewayError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            GatewayError::Http(e) => Self::classify_message(&e.to_string()),
            GatewayError::Other { message } => Self::classify_message(message),
        }
    }

    /// Classify free-form error text.
    pub fn classify_message(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("rate limit") {
            ErrorKind::RateLimit
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            ErrorKind::Timeout
        } else if lowered.contains("validation") {
            ErrorKind::Validation
        } else if lowered.contains("api") || lowered.contains("openai") {
            ErrorKind::ApiError
        } else {
            ErrorKind::Unknown
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a call returned a fallback instead of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    GuardrailRejected,
    Timeout,
    Validation,
    ApiError,
    RetriesExhausted,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::GuardrailRejected => "guardrail_rejected",
            FallbackReason::Timeout => "timeout",
            FallbackReason::Validation => "validation",
            FallbackReason::ApiError => "api_error",
            FallbackReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured fallback payload returned instead of raising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    pub reason: FallbackReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Set for timeouts: the caller should retry with a simpler request.
    pub simplify: bool,
}

impl Fallback {
    pub fn new(reason: FallbackReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            suggestion: None,
            simplify: false,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn simplified(mut self) -> Self {
        self.simplify = true;
        self
    }

    pub fn guardrail_rejected(agent_id: &str) -> Self {
        Self::new(
            FallbackReason::GuardrailRejected,
            format!("Input for {} rejected by guardrails", agent_id),
        )
    }

    pub fn timeout(agent_id: &str) -> Self {
        Self::new(
            FallbackReason::Timeout,
            format!(
                "Agent {} timed out. Please try with a simpler request.",
                agent_id
            ),
        )
        .simplified()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FallbackReason::Validation, message)
            .with_suggestion("Please check input format and try again.")
    }

    pub fn api_error() -> Self {
        Self::new(FallbackReason::ApiError, "Service temporarily unavailable")
    }

    pub fn retries_exhausted(agent_id: &str, attempts: u32) -> Self {
        Self::new(
            FallbackReason::RetriesExhausted,
            format!("Max retries reached for {} after {} attempts", agent_id, attempts),
        )
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Wait `delay`, then make attempt number `next_attempt` (zero-based).
    Retry { next_attempt: u32, delay: Duration },
    /// Stop and return the fallback.
    Fallback(Fallback),
    /// Unknown failure: surface it to the caller.
    Propagate,
}

/// Error count per (agent, kind), as exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub agent_id: String,
    pub error_type: ErrorKind,
    pub count: u64,
}

/// Classifies errors, decides recovery and counts occurrences.
#[derive(Debug)]
pub struct ErrorHandler {
    retry: RetryConfig,
    counts: RwLock<BTreeMap<(String, ErrorKind), u64>>,
}

impl ErrorHandler {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            counts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Handle the failure of zero-based attempt `attempt` for `agent_id`.
    pub async fn handle(&self, agent_id: &str, err: &GatewayError, attempt: u32) -> Recovery {
        let kind = ErrorKind::classify(err);
        {
            let mut counts = self.counts.write().await;
            *counts.entry((agent_id.to_string(), kind)).or_insert(0) += 1;
        }

        error!(
            agent_id = %agent_id,
            error_type = %kind,
            attempt,
            error = %err,
            "Gateway call failed"
        );

        match kind {
            ErrorKind::RateLimit => {
                let next_attempt = attempt + 1;
                if next_attempt >= self.retry.max_attempts {
                    error!(agent_id = %agent_id, attempts = next_attempt, "Max retries reached");
                    return Recovery::Fallback(Fallback::retries_exhausted(agent_id, next_attempt));
                }
                let delay = self.backoff(attempt);
                info!(
                    agent_id = %agent_id,
                    delay_ms = delay.as_millis() as u64,
                    next_attempt,
                    "Rate limited, backing off before retry"
                );
                Recovery::Retry {
                    next_attempt,
                    delay,
                }
            }
            ErrorKind::Timeout => Recovery::Fallback(Fallback::timeout(agent_id)),
            ErrorKind::Validation => Recovery::Fallback(Fallback::validation(err.to_string())),
            ErrorKind::ApiError => Recovery::Fallback(Fallback::api_error()),
            ErrorKind::Unknown => Recovery::Propagate,
        }
    }

    /// Backoff before the retry that follows attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.retry.backoff_base_ms.saturating_mul(factor))
    }

    /// Counts sorted by agent, then error type.
    pub async fn error_counts(&self) -> Vec<ErrorCount> {
        self.counts
            .read()
            .await
            .iter()
            .map(|((agent_id, kind), count)| ErrorCount {
                agent_id: agent_id.clone(),
                error_type: *kind,
                count: *count,
            })
            .collect()
    }

    pub async fn count(&self, agent_id: &str, kind: ErrorKind) -> u64 {
        self.counts
            .read()
            .await
            .get(&(agent_id.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_errors(&self) -> u64 {
        self.counts.read().await.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ErrorHandler {
        ErrorHandler::new(RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 1000,
        })
    }

    #[test]
    fn test_classify_typed_variants() {
        assert_eq!(
            ErrorKind::classify(&GatewayError::RateLimited {
                message: "x".to_string()
            }),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ErrorKind::classify(&GatewayError::Timeout { timeout_ms: 1 }),
            ErrorKind::Timeout
        );
        assert_eq!(
            ErrorKind::classify(&GatewayError::Api {
                status: 500,
                message: "boom".to_string()
            }),
            ErrorKind::ApiError
        );
    }

    #[test]
    fn test_classify_by_message() {
        let cases = [
            ("Rate limit reached for requests", ErrorKind::RateLimit),
            ("Request timed out", ErrorKind::Timeout),
            ("Schema validation error", ErrorKind::Validation),
            ("OpenAI service error", ErrorKind::ApiError),
            ("socket closed", ErrorKind::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(
                ErrorKind::classify(&GatewayError::other(message)),
                expected,
                "{}",
                message
            );
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let handler = handler();
        assert_eq!(handler.backoff(0), Duration::from_secs(1));
        assert_eq!(handler.backoff(1), Duration::from_secs(2));
        assert_eq!(handler.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_rate_limit_retries_until_max_attempts() {
        let handler = handler();
        let err = GatewayError::RateLimited {
            message: "slow down".to_string(),
        };

        assert_eq!(
            handler.handle("p1", &err, 0).await,
            Recovery::Retry {
                next_attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert!(matches!(
            handler.handle("p1", &err, 1).await,
            Recovery::Retry { next_attempt: 2, .. }
        ));
        match handler.handle("p1", &err, 2).await {
            Recovery::Fallback(fallback) => {
                assert_eq!(fallback.reason, FallbackReason::RetriesExhausted)
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(handler.count("p1", ErrorKind::RateLimit).await, 3);
    }

    #[tokio::test]
    async fn test_timeout_yields_simplify_fallback() {
        let handler = handler();
        let recovery = handler
            .handle("p2", &GatewayError::Timeout { timeout_ms: 30000 }, 0)
            .await;
        let Recovery::Fallback(fallback) = recovery else {
            panic!("expected fallback");
        };
        assert!(fallback.simplify);
        assert_eq!(
            fallback.message,
            "Agent p2 timed out. Please try with a simpler request."
        );
    }

    #[tokio::test]
    async fn test_validation_and_api_fallbacks() {
        let handler = handler();
        let Recovery::Fallback(fallback) = handler
            .handle(
                "analyst_response",
                &GatewayError::Validation {
                    message: "bad json".to_string(),
                },
                0,
            )
            .await
        else {
            panic!("expected fallback");
        };
        assert_eq!(fallback.reason, FallbackReason::Validation);
        assert_eq!(
            fallback.suggestion.as_deref(),
            Some("Please check input format and try again.")
        );

        let Recovery::Fallback(fallback) = handler
            .handle(
                "p1",
                &GatewayError::Api {
                    status: 503,
                    message: String::new(),
                },
                0,
            )
            .await
        else {
            panic!("expected fallback");
        };
        assert_eq!(fallback.message, "Service temporarily unavailable");
    }

    #[tokio::test]
    async fn test_unknown_propagates_and_is_counted() {
        let handler = handler();
        assert_eq!(
            handler
                .handle("p1", &GatewayError::other("socket closed"), 0)
                .await,
            Recovery::Propagate
        );
        assert_eq!(handler.count("p1", ErrorKind::Unknown).await, 1);
    }

    #[tokio::test]
    async fn test_error_counts_sorted() {
        let handler = handler();
        handler
            .handle("p2", &GatewayError::Timeout { timeout_ms: 1 }, 0)
            .await;
        handler
            .handle("p1", &GatewayError::Timeout { timeout_ms: 1 }, 0)
            .await;
        handler.handle("p1", &GatewayError::other("x"), 0).await;

        let counts = handler.error_counts().await;
        let keys: Vec<(&str, ErrorKind)> = counts
            .iter()
            .map(|c| (c.agent_id.as_str(), c.error_type))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("p1", ErrorKind::Timeout),
                ("p1", ErrorKind::Unknown),
                ("p2", ErrorKind::Timeout)
            ]
        );
        assert_eq!(handler.total_errors().await, 3);
    }
}
