//! Worker role registry.
//!
//! Every reasoning role is data: an id, the pipe it runs on, its
//! instructions and an optional response schema. The registry is built once
//! per session from the board and pipe configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{BoardConfig, PipeConfig};
use crate::error::{AppError, AppResult};
use crate::gateway::{ResponseSchema, RoleRequest};
use crate::prompts;

/// Identifies a worker role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RoleId {
    Facilitator,
    FollowupFacilitator,
    ResponseAnalyst,
    ThemeAnalyst,
    BiasModerator,
    Moderator,
    Persona(String),
}

impl RoleId {
    /// Every role that is not a persona.
    pub const FIXED: [RoleId; 6] = [
        RoleId::Facilitator,
        RoleId::FollowupFacilitator,
        RoleId::ResponseAnalyst,
        RoleId::ThemeAnalyst,
        RoleId::BiasModerator,
        RoleId::Moderator,
    ];

    /// Whether `id` is the agent id of a fixed role and so unusable for a
    /// persona.
    pub fn is_reserved_agent_id(id: &str) -> bool {
        Self::FIXED.iter().any(|role| role.agent_id() == id)
    }

    /// Agent id used in traces, violations and error counters.
    pub fn agent_id(&self) -> &str {
        match self {
            RoleId::Facilitator => "facilitator",
            RoleId::FollowupFacilitator => "facilitator_followup",
            RoleId::ResponseAnalyst => "analyst_response",
            RoleId::ThemeAnalyst => "analyst_themes",
            RoleId::BiasModerator => "moderator_bias",
            RoleId::Moderator => "moderator",
            RoleId::Persona(id) => id,
        }
    }

    pub fn is_persona(&self) -> bool {
        matches!(self, RoleId::Persona(_))
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleId::Persona(id) => write!(f, "persona:{}", id),
            other => write!(f, "{}", other.agent_id()),
        }
    }
}

/// A named reasoning role bound to a pipe.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRole {
    pub id: RoleId,
    pub name: String,
    pub pipe: String,
    pub instructions: String,
    pub schema: Option<ResponseSchema>,
}

impl WorkerRole {
    fn new(id: RoleId, name: impl Into<String>, pipe: &str, instructions: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            pipe: pipe.to_string(),
            instructions: instructions.into(),
            schema: None,
        }
    }

    fn with_schema(mut self, name: &str, hint: &str) -> Self {
        self.schema = Some(ResponseSchema::new(name, hint));
        self
    }
}

/// All roles of one session.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: BTreeMap<RoleId, WorkerRole>,
    persona_order: Vec<String>,
}

impl RoleRegistry {
    pub fn new(board: &BoardConfig, pipes: &PipeConfig) -> Self {
        let fixed = [
            WorkerRole::new(
                RoleId::Facilitator,
                "Facilitator",
                &pipes.facilitator,
                prompts::FACILITATOR_INSTRUCTIONS,
            )
            .with_schema("SessionInsights", prompts::SESSION_INSIGHTS_SCHEMA),
            WorkerRole::new(
                RoleId::FollowupFacilitator,
                "Follow-up Facilitator",
                &pipes.followup,
                prompts::FOLLOWUP_FACILITATOR_INSTRUCTIONS,
            )
            .with_schema("FollowUpQuestion", prompts::FOLLOWUP_QUESTION_SCHEMA),
            WorkerRole::new(
                RoleId::ResponseAnalyst,
                "Response Analyst",
                &pipes.analyst,
                prompts::RESPONSE_ANALYST_INSTRUCTIONS,
            )
            .with_schema("ResponseAnalysis", prompts::RESPONSE_ANALYSIS_SCHEMA),
            WorkerRole::new(
                RoleId::ThemeAnalyst,
                "Theme Analyst",
                &pipes.themes,
                prompts::THEME_ANALYST_INSTRUCTIONS,
            )
            .with_schema("ThemeClusters", prompts::THEME_CLUSTERS_SCHEMA),
            WorkerRole::new(
                RoleId::BiasModerator,
                "Bias Moderator",
                &pipes.bias,
                prompts::BIAS_MODERATOR_INSTRUCTIONS,
            )
            .with_schema("BiasCheck", prompts::BIAS_CHECK_SCHEMA),
            WorkerRole::new(
                RoleId::Moderator,
                "Moderator",
                &pipes.moderator,
                prompts::MODERATOR_INSTRUCTIONS,
            )
            .with_schema("PersonaDriftCheck", prompts::PERSONA_DRIFT_SCHEMA),
        ];

        let mut roles: BTreeMap<RoleId, WorkerRole> =
            fixed.into_iter().map(|r| (r.id.clone(), r)).collect();

        for persona in &board.personas {
            let role = WorkerRole::new(
                RoleId::Persona(persona.id.clone()),
                persona.name.clone(),
                &pipes.persona,
                prompts::persona_instructions(&persona.name, &persona.background),
            );
            roles.insert(role.id.clone(), role);
        }

        Self {
            roles,
            persona_order: board.persona_ids(),
        }
    }

    pub fn get(&self, role: &RoleId) -> AppResult<&WorkerRole> {
        self.roles.get(role).ok_or_else(|| AppError::Internal {
            message: format!("Unknown worker role: {}", role),
        })
    }

    /// Build a gateway request for `role` with the given input text.
    pub fn request(&self, role: &RoleId, input: impl Into<String>) -> AppResult<RoleRequest> {
        let worker = self.get(role)?;
        Ok(RoleRequest {
            role: worker.id.clone(),
            agent_id: worker.id.agent_id().to_string(),
            pipe: worker.pipe.clone(),
            instructions: worker.instructions.clone(),
            input: input.into(),
            schema: worker.schema.clone(),
        })
    }

    /// Persona ids in board configuration order.
    pub fn persona_ids(&self) -> &[String] {
        &self.persona_order
    }

    pub fn roles(&self) -> impl Iterator<Item = &WorkerRole> {
        self.roles.values()
    }

    /// Distinct pipe names, each with a description for pipe creation.
    ///
    /// Personas share one pipe; their instructions travel with every request.
    pub fn pipes(&self) -> Vec<(&str, &str)> {
        let mut seen = BTreeSet::new();
        self.roles
            .values()
            .filter(|role| seen.insert(role.pipe.as_str()))
            .map(|role| {
                let description = if role.id.is_persona() {
                    "Virtual board persona"
                } else {
                    role.name.as_str()
                };
                (role.pipe.as_str(), description)
            })
            .collect()
    }
}
