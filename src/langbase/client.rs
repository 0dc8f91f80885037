//! HTTP client for the Langbase Pipes API.
//!
//! Runs role requests against `/v1/pipes/run` and creates missing pipes
//! before a session starts.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, info};

use super::types::{CreatePipeRequest, CreatePipeResponse, RunPipeRequest, RunPipeResponse};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{CapabilityGateway, RoleRequest};
use crate::roles::RoleRegistry;

/// Client for the Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: &RequestConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a pipe once. Retries are the caller's concern.
    pub async fn run_pipe(&self, request: &RunPipeRequest) -> GatewayResult<RunPipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let start = Instant::now();

        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let result = self.execute_run(&url, request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => info!(
                pipe = %request.name,
                latency_ms,
                tokens = ?response.total_tokens(),
                "Langbase pipe call succeeded"
            ),
            Err(e) => error!(
                pipe = %request.name,
                error = %e,
                latency_ms,
                "Langbase pipe call failed"
            ),
        }
        result
    }

    async fn execute_run(&self, url: &str, request: &RunPipeRequest) -> GatewayResult<RunPipeResponse> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let pipe_response: RunPipeResponse =
            response
                .json()
                .await
                .map_err(|e| GatewayError::Validation {
                    message: format!("Failed to parse pipe response: {}", e),
                })?;

        if !pipe_response.success {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: "Pipe run reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            GatewayError::Http(e)
        }
    }

    /// Create (or upsert) a pipe
    pub async fn create_pipe(&self, request: &CreatePipeRequest) -> GatewayResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Validation {
                message: format!("Failed to parse create pipe response: {}", e),
            })
    }

    /// Ensure one pipe exists for every distinct pipe name in the registry.
    pub async fn ensure_role_pipes(&self, registry: &RoleRegistry) -> GatewayResult<()> {
        for (pipe, description) in registry.pipes() {
            let request = CreatePipeRequest::for_role(pipe, description);
            match self.create_pipe(&request).await {
                Ok(_) => info!(pipe = %pipe, "Role pipe ready"),
                Err(GatewayError::Api { status: 409, .. }) => {
                    info!(pipe = %pipe, "Pipe already exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityGateway for LangbaseClient {
    async fn invoke(&self, request: &RoleRequest) -> GatewayResult<String> {
        let body = RunPipeRequest::from(request);
        let response = self.run_pipe(&body).await?;
        Ok(response.completion)
    }
}

/// Map a non-success HTTP status to a gateway error.
fn map_status(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited { message: body },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::Validation { message: body }
        }
        _ => GatewayError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}
