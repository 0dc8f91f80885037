//! Shared fixtures for orchestrator and export tests.
//!
//! `ScriptedGateway` answers every worker role with a plausible canned
//! completion and records each request. Tests override replies for specific
//! requests with `with`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use virtual_board::config::{BoardConfig, PipeConfig, RetryConfig};
use virtual_board::error::GatewayResult;
use virtual_board::gateway::{CapabilityGateway, RoleRequest};
use virtual_board::roles::RoleId;
use virtual_board::{ProductionMiddleware, Session};

pub const WARMUP_Q: &str = "How do you handle bookkeeping today?";
pub const DIVERGE_Q: &str = "What slows you down at month end?";
pub const REFLECT_Q: &str = "Which themes matter most to you?";
pub const CONVERGE_Q: &str = "Would you trade features for a lower price?";
pub const CLOSURE_Q: &str = "What would stop you from switching?";

pub const BOARD_YAML: &str = r#"
product:
  name: "Ledger"
  description: "Bookkeeping for freelancers"
hypotheses:
  - id: "h1"
    description: "Freelancers hate bookkeeping"
  - id: "h2"
    description: "Freelancers would pay for automation"
personas:
  - id: "p1"
    name: "Ann"
    background: "Freelance designer, invoices monthly"
  - id: "p2"
    name: "Bob"
    background: "Freelance developer, uses spreadsheets"
questions:
  warmup:
    - "How do you handle bookkeeping today?"
  diverge:
    - text: "What slows you down at month end?"
      covers: ["h1", "h2"]
  reflect:
    - "Which themes matter most to you?"
  converge:
    - "Would you trade features for a lower price?"
  closure:
    - "What would stop you from switching?"
"#;

type Handler = Box<dyn Fn(&RoleRequest) -> Option<GatewayResult<String>> + Send + Sync>;

/// In-process gateway with canned replies per role.
pub struct ScriptedGateway {
    overrides: Vec<Handler>,
    calls: Mutex<Vec<RoleRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            overrides: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register an override; the first override returning `Some` wins.
    pub fn with<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RoleRequest) -> Option<GatewayResult<String>> + Send + Sync + 'static,
    {
        self.overrides.push(Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<RoleRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, role: &RoleId) -> usize {
        self.calls().iter().filter(|r| &r.role == role).count()
    }

    pub fn persona_calls(&self) -> usize {
        self.calls().iter().filter(|r| r.role.is_persona()).count()
    }
}

#[async_trait]
impl CapabilityGateway for ScriptedGateway {
    async fn invoke(&self, request: &RoleRequest) -> GatewayResult<String> {
        self.calls.lock().unwrap().push(request.clone());
        for handler in &self.overrides {
            if let Some(reply) = handler(request) {
                return reply;
            }
        }
        Ok(default_reply(request))
    }
}

fn default_reply(request: &RoleRequest) -> String {
    match &request.role {
        RoleId::Persona(id) => format!(
            "Speaking as {}, I would try it on a side project first.",
            id
        ),
        RoleId::ResponseAnalyst => analysis_reply(&[]),
        RoleId::ThemeAnalyst => json!({
            "clusters": [{
                "theme_name": "adoption",
                "personas_mentioned": ["p1", "p2"],
                "frequency": 2,
                "representative_quotes": ["try it on a side project"]
            }]
        })
        .to_string(),
        RoleId::BiasModerator => json!({ "has_bias": false }).to_string(),
        RoleId::FollowupFacilitator => json!({
            "is_needed": false,
            "question": "none",
            "rationale": "Answer was specific"
        })
        .to_string(),
        RoleId::Moderator => json!({ "is_drift_detected": false }).to_string(),
        RoleId::Facilitator => json!({
            "themes": ["adoption"],
            "insights": ["Freelancers want a low-risk trial"],
            "recommendations": ["Offer a free tier"]
        })
        .to_string(),
    }
}

/// Response analyst completion hitting the given hypotheses.
pub fn analysis_reply(hits: &[&str]) -> String {
    json!({
        "themes": ["adoption"],
        "sentiment": 0.2,
        "hypotheses_hit": hits,
        "key_quotes": ["side project"],
        "confidence": 0.8
    })
    .to_string()
}

/// Whether an analyst request is about `name`'s answer to `question`.
pub fn analyzes(request: &RoleRequest, name: &str, question: &str) -> bool {
    request.role == RoleId::ResponseAnalyst
        && request.input.starts_with(&format!("Participant: {} (", name))
        && request.input.contains(&format!("Question: {}\n", question))
}

/// Whether a persona request asks `persona_id` the given question.
pub fn asks(request: &RoleRequest, persona_id: &str, question: &str) -> bool {
    request.role == RoleId::Persona(persona_id.to_string())
        && request.input.ends_with(&format!("Question: {}", question))
}

pub fn board() -> BoardConfig {
    BoardConfig::from_yaml_str(BOARD_YAML).unwrap()
}

pub fn middleware() -> Arc<ProductionMiddleware> {
    Arc::new(ProductionMiddleware::new(RetryConfig {
        max_attempts: 3,
        backoff_base_ms: 0,
    }))
}

pub fn session(board: BoardConfig, gateway: Arc<ScriptedGateway>) -> Session {
    Session::new(board, &PipeConfig::default(), gateway, middleware()).unwrap()
}
