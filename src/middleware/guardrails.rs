//! Guardrail rule pipeline.
//!
//! Rules are registered per [`GuardrailStage`] and run in registration
//! order. A rule that fires produces a [`GuardrailViolation`]; a blocking
//! finding stops the stage and rejects the call.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

/// Maximum accepted question length, in characters.
pub const MAX_INPUT_CHARS: usize = 500;

/// Output length above which a warning is recorded.
pub const MAX_OUTPUT_CHARS: usize = 2000;

/// Trimmed output length below which a warning is recorded.
pub const MIN_OUTPUT_CHARS: usize = 10;

const DENYLIST: [&str; 4] = ["<script>", "javascript:", "eval(", "exec("];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
        .expect("EMAIL_RE regex should compile")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("PHONE_RE regex should compile")
});

/// Point in a call where a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    InputValidation,
    OutputValidation,
    ContentFilter,
    ConsistencyCheck,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailStage::InputValidation => "input_validation",
            GuardrailStage::OutputValidation => "output_validation",
            GuardrailStage::ContentFilter => "content_filter",
            GuardrailStage::ConsistencyCheck => "consistency_check",
        }
    }
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recorded guardrail violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    #[serde(rename = "type")]
    pub stage: GuardrailStage,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub context: serde_json::Value,
}

/// What a rule reports when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFinding {
    pub message: String,
    pub severity: Severity,
    /// Whether the call must be rejected.
    pub blocking: bool,
    pub context: serde_json::Value,
}

impl RuleFinding {
    pub fn blocking(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            blocking: true,
            context: json!({}),
        }
    }

    pub fn advisory(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
            blocking: false,
            context: json!({}),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// A guardrail rule: `(agent_id, text) -> finding`.
pub type GuardrailRule = Box<dyn Fn(&str, &str) -> Option<RuleFinding> + Send + Sync>;

/// Ordered rule lists per stage plus the violation log.
pub struct Guardrails {
    rules: BTreeMap<GuardrailStage, Vec<GuardrailRule>>,
    violations: RwLock<Vec<GuardrailViolation>>,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .rules
            .iter()
            .map(|(stage, rules)| (stage.as_str(), rules.len()))
            .collect();
        f.debug_struct("Guardrails").field("rules", &counts).finish()
    }
}

impl Guardrails {
    /// Guardrails with the default rule set.
    pub fn new() -> Self {
        let mut guardrails = Self::empty();
        guardrails.add_rule(GuardrailStage::InputValidation, Box::new(input_length_rule));
        guardrails.add_rule(GuardrailStage::InputValidation, Box::new(denylist_rule));
        guardrails.add_rule(GuardrailStage::OutputValidation, Box::new(output_length_rule));
        guardrails.add_rule(GuardrailStage::OutputValidation, Box::new(output_relevance_rule));
        guardrails.add_rule(GuardrailStage::ContentFilter, Box::new(email_rule));
        guardrails.add_rule(GuardrailStage::ContentFilter, Box::new(phone_rule));
        guardrails
    }

    /// Guardrails with no rules at all.
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
            violations: RwLock::new(Vec::new()),
        }
    }

    pub fn add_rule(&mut self, stage: GuardrailStage, rule: GuardrailRule) {
        self.rules.entry(stage).or_default().push(rule);
    }

    pub fn with_rule(mut self, stage: GuardrailStage, rule: GuardrailRule) -> Self {
        self.add_rule(stage, rule);
        self
    }

    /// Run every rule of `stage` on `text`.
    ///
    /// Returns `false` when a blocking finding rejected the call. Evaluation
    /// stops at the first blocking finding.
    pub async fn check(&self, stage: GuardrailStage, agent_id: &str, text: &str) -> bool {
        let Some(rules) = self.rules.get(&stage) else {
            return true;
        };

        let mut findings = Vec::new();
        let mut passed = true;
        for rule in rules {
            if let Some(finding) = rule(agent_id, text) {
                let blocking = finding.blocking;
                findings.push(finding);
                if blocking {
                    passed = false;
                    break;
                }
            }
        }

        if !findings.is_empty() {
            self.record(stage, agent_id, findings).await;
        }
        passed
    }

    async fn record(&self, stage: GuardrailStage, agent_id: &str, findings: Vec<RuleFinding>) {
        let mut violations = self.violations.write().await;
        for finding in findings {
            warn!(
                agent_id = %agent_id,
                stage = %stage,
                severity = %finding.severity,
                blocking = finding.blocking,
                "Guardrail violation: {}",
                finding.message
            );

            let mut context = finding.context;
            if let Some(map) = context.as_object_mut() {
                map.insert("agent_id".to_string(), json!(agent_id));
            }
            violations.push(GuardrailViolation {
                stage,
                message: finding.message,
                severity: finding.severity,
                timestamp: Utc::now(),
                context,
            });
        }
    }

    /// All recorded violations in order.
    pub async fn violations(&self) -> Vec<GuardrailViolation> {
        self.violations.read().await.clone()
    }

    pub async fn violation_count(&self) -> usize {
        self.violations.read().await.len()
    }
}

// ============================================================================
// Default rules
// ============================================================================

fn input_length_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    let length = text.chars().count();
    (length > MAX_INPUT_CHARS).then(|| {
        RuleFinding::blocking(
            format!("Question too long (>{} chars)", MAX_INPUT_CHARS),
            Severity::Warning,
        )
        .with_context(json!({ "length": length }))
    })
}

fn denylist_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    let lowered = text.to_lowercase();
    DENYLIST
        .iter()
        .find(|pattern| lowered.contains(*pattern))
        .map(|pattern| {
            RuleFinding::blocking(
                format!("Potentially harmful content detected: {}", pattern),
                Severity::Critical,
            )
            .with_context(json!({ "pattern": pattern }))
        })
}

fn output_length_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    let length = text.chars().count();
    (length > MAX_OUTPUT_CHARS).then(|| {
        RuleFinding::advisory(format!("Response too long (>{} chars)", MAX_OUTPUT_CHARS))
            .with_context(json!({ "length": length }))
    })
}

fn output_relevance_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    (text.trim().chars().count() < MIN_OUTPUT_CHARS).then(|| {
        RuleFinding::advisory("Response too short or empty")
            .with_context(json!({ "response": text }))
    })
}

fn email_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    EMAIL_RE
        .is_match(text)
        .then(|| RuleFinding::advisory("Email address detected"))
}

fn phone_rule(_agent_id: &str, text: &str) -> Option<RuleFinding> {
    PHONE_RE
        .is_match(text)
        .then(|| RuleFinding::advisory("Phone number detected"))
}
