use serde::{Deserialize, Serialize};

use crate::gateway::RoleRequest;

/// Message in a Langbase conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request body for `POST /v1/pipes/run`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPipeRequest {
    pub name: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

impl RunPipeRequest {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
        }
    }
}

impl From<&RoleRequest> for RunPipeRequest {
    /// System message carries instructions and schema hint; user message
    /// carries the input.
    fn from(request: &RoleRequest) -> Self {
        Self::new(
            request.pipe.clone(),
            vec![
                Message::system(request.system_prompt()),
                Message::user(request.input.clone()),
            ],
        )
    }
}

/// Response from a pipe run
#[derive(Debug, Clone, Deserialize)]
pub struct RunPipeResponse {
    pub success: bool,
    pub completion: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub raw: Option<RawResponse>,
}

/// Raw model response details
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl RunPipeResponse {
    pub fn total_tokens(&self) -> Option<u32> {
        self.raw
            .as_ref()
            .and_then(|raw| raw.usage.as_ref())
            .and_then(|usage| usage.total_tokens)
    }
}

/// Request body for `POST /v1/pipes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePipeRequest {
    pub name: String,
    pub description: String,
    pub status: PipeStatus,
    pub model: String,
    pub upsert: bool,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CreatePipeRequest {
    /// Private, upserted pipe definition for one board role.
    pub fn for_role(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Virtual board: {}", description),
            status: PipeStatus::Private,
            model: "openai:gpt-4o-mini".to_string(),
            upsert: true,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// Pipe visibility status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeStatus {
    Public,
    Private,
}

/// Response from creating a pipe
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePipeResponse {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}
