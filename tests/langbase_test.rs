//! Integration tests for Langbase client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use virtual_board::config::{BoardConfig, LangbaseConfig, PipeConfig, RequestConfig, EXAMPLE_BOARD_CONFIG};
use virtual_board::error::GatewayError;
use virtual_board::gateway::CapabilityGateway;
use virtual_board::langbase::{LangbaseClient, Message, RunPipeRequest};
use virtual_board::roles::{RoleId, RoleRegistry};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    LangbaseClient::new(&config, &RequestConfig { timeout_ms: 5000 }).expect("Failed to create client")
}

/// Create a simple pipe request for testing
fn create_test_request(content: &str) -> RunPipeRequest {
    RunPipeRequest::new("test-pipe", vec![Message::user(content)])
}

fn registry() -> RoleRegistry {
    let board = BoardConfig::from_yaml_str(EXAMPLE_BOARD_CONFIG).unwrap();
    RoleRegistry::new(&board, &PipeConfig::default())
}

#[cfg(test)]
mod pipe_run_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_run() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "I mostly skim the tests first.",
                "threadId": "thread-123",
                "raw": {
                    "model": "gpt-4o-mini",
                    "usage": {
                        "prompt_tokens": 100,
                        "completion_tokens": 50,
                        "total_tokens": 150
                    }
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("How do you onboard?")).await;

        assert!(result.is_ok(), "Pipe run should succeed: {:?}", result.err());
        let response = result.unwrap();
        assert!(response.success);
        assert_eq!(response.completion, "I mostly skim the tests first.");
        assert_eq!(response.thread_id, Some("thread-123".to_string()));
        assert_eq!(response.total_tokens(), Some(150));
    }

    #[tokio::test]
    async fn test_pipe_run_validation_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Missing required field: messages",
                    "type": "invalid_request_error"
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("")).await;

        match result {
            Err(GatewayError::Validation { message }) => {
                assert!(message.contains("Missing required field"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pipe_run_authentication_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid API key" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("Q")).await;

        assert!(matches!(result, Err(GatewayError::Api { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_pipe_run_rate_limit() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "60")
                    .set_body_json(json!({
                        "error": { "message": "Rate limit exceeded" }
                    })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("Q")).await;

        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_pipe_run_server_error_is_single_attempt() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "Internal server error" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("Q")).await;

        assert!(matches!(result, Err(GatewayError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_pipe_run_reports_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "completion": ""
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("Q")).await;

        assert!(matches!(result, Err(GatewayError::Api { status: 200, .. })));
    }
}

#[cfg(test)]
mod response_parsing_tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_malformed_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not valid json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.run_pipe(&create_test_request("Q")).await;

        assert!(matches!(result, Err(GatewayError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_parse_response_without_optional_fields() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "Minimal response"
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let response = client.run_pipe(&create_test_request("Q")).await.unwrap();

        assert_eq!(response.completion, "Minimal response");
        assert!(response.thread_id.is_none());
        assert!(response.raw.is_none());
    }
}

#[cfg(test)]
mod timeout_tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "success": true,
                        "completion": "Delayed response"
                    }))
                    .set_delay(Duration::from_secs(10)), // Longer than timeout
            )
            .mount(&mock_server)
            .await;

        // Create client with short timeout
        let config = LangbaseConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_server.uri(),
        };
        let client = LangbaseClient::new(&config, &RequestConfig { timeout_ms: 100 }).unwrap();

        let result = client.run_pipe(&create_test_request("Test")).await;

        assert!(
            matches!(result, Err(GatewayError::Timeout { timeout_ms: 100 })),
            "Should time out: {:?}",
            result
        );
    }
}

#[cfg(test)]
mod gateway_tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_sends_instructions_and_input() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({
                "name": "vb-persona-v1",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "Honestly, I grep a lot."
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = registry()
            .request(&RoleId::Persona("p1".to_string()), "Question: How do you onboard?")
            .unwrap();

        let completion = client.invoke(&request).await.unwrap();
        assert_eq!(completion, "Honestly, I grep a lot.");

        let received = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("Sarah"));
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Question: How do you onboard?");
    }

    #[tokio::test]
    async fn test_invoke_structured_role_includes_schema_hint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "{\"has_bias\": false}"
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = registry()
            .request(&RoleId::BiasModerator, "Question: Q")
            .unwrap();
        client.invoke(&request).await.unwrap();

        let received = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("Respond with valid JSON only"));
        assert!(system.contains("has_bias"));
    }
}

#[cfg(test)]
mod pipe_setup_tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_role_pipes_creates_each_distinct_pipe() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({ "upsert": true, "status": "private" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "created",
                "url": "https://langbase.com/test/created"
            })))
            .expect(7)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        client.ensure_role_pipes(&registry()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_role_pipes_accepts_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": { "message": "Pipe already exists" }
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.ensure_role_pipes(&registry()).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_role_pipes_fails_on_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.ensure_role_pipes(&registry()).await;

        assert!(matches!(result, Err(GatewayError::Api { status: 500, .. })));
    }
}
