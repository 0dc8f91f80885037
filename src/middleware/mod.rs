//! Production middleware wrapped around every gateway call.
//!
//! [`ProductionMiddleware`] combines the guardrail pipeline, the execution
//! tracer and the error handler. A call either completes with a value,
//! degrades to a [`Fallback`] payload, or fails with an unknown error that
//! the caller must propagate.

mod error_handler;
mod guardrails;
mod tracer;

pub use error_handler::*;
pub use guardrails::*;
pub use tracer::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{decode_structured, CapabilityGateway, RoleRequest};

/// Raw completion text kept in trace events, in characters.
const TRACE_OUTPUT_MAX_CHARS: usize = 500;

/// Result of a middleware-wrapped call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Degraded(Fallback),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Degraded(_) => None,
        }
    }

    pub fn fallback(&self) -> Option<&Fallback> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Degraded(fallback) => Some(fallback),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Degraded(fallback) => Outcome::Degraded(fallback),
        }
    }
}

/// Counters reported with the session report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductionMetrics {
    pub total_traces: usize,
    pub error_traces: usize,
    pub guardrail_violations: usize,
}

/// Guardrails, tracer and error handler, shared by all calls of a session.
#[derive(Debug)]
pub struct ProductionMiddleware {
    guardrails: Guardrails,
    tracer: ExecutionTracer,
    errors: ErrorHandler,
}

impl ProductionMiddleware {
    /// Middleware with the default guardrail rules.
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_guardrails(Guardrails::new(), retry)
    }

    pub fn with_guardrails(guardrails: Guardrails, retry: RetryConfig) -> Self {
        Self {
            guardrails,
            tracer: ExecutionTracer::new(),
            errors: ErrorHandler::new(retry),
        }
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    pub fn tracer(&self) -> &ExecutionTracer {
        &self.tracer
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub async fn metrics(&self) -> ProductionMetrics {
        ProductionMetrics {
            total_traces: self.tracer.len().await,
            error_traces: self.tracer.error_traces().await.len(),
            guardrail_violations: self.guardrails.violation_count().await,
        }
    }

    /// Run a free-text call. `subject` is the text input guardrails apply to.
    pub async fn invoke_text(
        &self,
        gateway: &dyn CapabilityGateway,
        request: &RoleRequest,
        subject: Option<&str>,
    ) -> GatewayResult<Outcome<String>> {
        self.invoke_with(gateway, request, subject, |raw| Ok(raw.to_string()))
            .await
    }

    /// Run a structured call and decode the completion into `T`.
    pub async fn invoke_structured<T>(
        &self,
        gateway: &dyn CapabilityGateway,
        request: &RoleRequest,
        subject: Option<&str>,
    ) -> GatewayResult<Outcome<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.invoke_with(gateway, request, subject, decode_structured::<T>)
            .await
    }

    async fn invoke_with<T, F>(
        &self,
        gateway: &dyn CapabilityGateway,
        request: &RoleRequest,
        subject: Option<&str>,
        decode: F,
    ) -> GatewayResult<Outcome<T>>
    where
        T: Send,
        F: Fn(&str) -> GatewayResult<T> + Send + Sync,
    {
        let agent_id = request.agent_id.as_str();
        let operation = request.role.to_string();
        let mut attempt: u32 = 0;

        loop {
            let trace_id = self
                .tracer
                .start_trace(
                    agent_id,
                    &operation,
                    Some(json!({
                        "pipe": request.pipe,
                        "attempt": attempt,
                        "subject": subject,
                        "input_chars": request.input.chars().count(),
                    })),
                )
                .await;

            if attempt == 0 {
                if let Some(subject) = subject {
                    if !self
                        .guardrails
                        .check(GuardrailStage::InputValidation, agent_id, subject)
                        .await
                    {
                        self.tracer
                            .end_trace(trace_id, None, Some("Input rejected by guardrails".to_string()))
                            .await;
                        return Ok(Outcome::Degraded(Fallback::guardrail_rejected(agent_id)));
                    }
                }
            }

            let result = match gateway.invoke(request).await {
                Ok(raw) => decode(&raw).map(|value| (raw, value)),
                Err(e) => Err(e),
            };

            match result {
                Ok((raw, value)) => {
                    if !self.output_checks(agent_id, &raw).await {
                        self.tracer
                            .end_trace(trace_id, None, Some("Output rejected by guardrails".to_string()))
                            .await;
                        return Ok(Outcome::Degraded(Fallback::new(
                            FallbackReason::GuardrailRejected,
                            format!("Output from {} rejected by guardrails", agent_id),
                        )));
                    }

                    let preview: String = raw.chars().take(TRACE_OUTPUT_MAX_CHARS).collect();
                    self.tracer
                        .end_trace(trace_id, Some(json!(preview)), None)
                        .await;
                    debug!(agent_id = %agent_id, attempt, "Gateway call completed");
                    return Ok(Outcome::Completed(value));
                }
                Err(err) => {
                    self.tracer
                        .end_trace(trace_id, None, Some(err.to_string()))
                        .await;

                    match self.errors.handle(agent_id, &err, attempt).await {
                        Recovery::Retry {
                            next_attempt,
                            delay,
                        } => {
                            tokio::time::sleep(delay).await;
                            attempt = next_attempt;
                        }
                        Recovery::Fallback(fallback) => {
                            warn!(
                                agent_id = %agent_id,
                                reason = %fallback.reason,
                                "Gateway call degraded to fallback"
                            );
                            return Ok(Outcome::Degraded(fallback));
                        }
                        Recovery::Propagate => return Err(err),
                    }
                }
            }
        }
    }

    /// Output validation, content filter and consistency rules on raw text.
    async fn output_checks(&self, agent_id: &str, raw: &str) -> bool {
        let mut passed = true;
        for stage in [
            GuardrailStage::OutputValidation,
            GuardrailStage::ContentFilter,
            GuardrailStage::ConsistencyCheck,
        ] {
            passed &= self.guardrails.check(stage, agent_id, raw).await;
        }
        passed
    }
}

/// Error text used when a fallback has to be surfaced as a reply.
pub fn fallback_error_text(fallback: &Fallback) -> String {
    format!("Error: {}", fallback.message)
}

/// Error text used when an error has to be surfaced as a reply.
pub fn error_text(err: &GatewayError) -> String {
    format!("Error: {}", err)
}
