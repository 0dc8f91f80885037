//! Discussion data model.
//!
//! This module holds the records produced during a board session (answers,
//! analyses, theme clusters, follow-ups) together with [`BoardState`], the
//! mutable aggregate owned by the session, and the structured payloads the
//! worker roles return.


use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Coverage added to a hypothesis each time an analysis hits it.
pub const COVERAGE_INCREMENT: f64 = 0.2;

/// Upper bound for any hypothesis coverage value.
pub const MAX_COVERAGE: f64 = 1.0;

// ============================================================================
// Phase
// ============================================================================

/// Discussion phase. Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Initial impressions.
    Warmup,
    /// Broad exploration driven by hypothesis-targeted questions.
    Diverge,
    /// Optional theme validation, entered only with sufficient coverage.
    Reflect,
    /// Trade-offs and priorities.
    Converge,
    /// Final insights and red-team questions. Terminal.
    Closure,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::Warmup,
        Phase::Diverge,
        Phase::Reflect,
        Phase::Converge,
        Phase::Closure,
    ];

    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Diverge => "diverge",
            Phase::Reflect => "reflect",
            Phase::Converge => "converge",
            Phase::Closure => "closure",
        }
    }

    /// Whether this is the terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Closure)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warmup" => Ok(Phase::Warmup),
            "diverge" => Ok(Phase::Diverge),
            "reflect" => Ok(Phase::Reflect),
            "converge" => Ok(Phase::Converge),
            "closure" => Ok(Phase::Closure),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

// ============================================================================
// Session records
// ============================================================================

/// A persona's answer to one question. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub persona_id: String,
    pub question: String,
    pub response: String,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

impl Answer {
    /// Create an answer stamped with the current time.
    pub fn new(
        persona_id: impl Into<String>,
        question: impl Into<String>,
        response: impl Into<String>,
        phase: Phase,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            question: question.into(),
            response: response.into(),
            phase,
            timestamp: Utc::now(),
        }
    }
}

/// Analysis of exactly one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub persona_id: String,
    pub question: String,
    /// Phase of the originating answer.
    pub phase: Phase,
    pub themes: Vec<String>,
    /// Sentiment in [-1, 1].
    pub sentiment: f64,
    pub hypotheses_hit: Vec<String>,
    pub key_quotes: Vec<String>,
    /// Analyst confidence in [0, 1].
    pub confidence: f64,
}

impl Analysis {
    /// Build an analysis from the analyst's structured output, clamping
    /// sentiment and confidence into range.
    pub fn from_response(
        persona_id: impl Into<String>,
        question: impl Into<String>,
        phase: Phase,
        response: ResponseAnalysis,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            question: question.into(),
            phase,
            themes: response.themes,
            sentiment: response.sentiment.clamp(-1.0, 1.0),
            hypotheses_hit: response.hypotheses_hit,
            key_quotes: response.key_quotes,
            confidence: response.confidence.clamp(0.0, 1.0),
        }
    }

    /// Neutral analysis used when the analyst call degraded.
    pub fn empty(persona_id: impl Into<String>, question: impl Into<String>, phase: Phase) -> Self {
        Self {
            persona_id: persona_id.into(),
            question: question.into(),
            phase,
            themes: Vec::new(),
            sentiment: 0.0,
            hypotheses_hit: Vec::new(),
            key_quotes: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Accepted follow-up question, tied to the (persona, question) it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub persona_id: String,
    pub source_question: String,
    pub question: String,
    pub rationale: String,
    pub target_hypothesis: Option<String>,
}

/// Theme clusters produced for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub phase: Phase,
    pub clusters: Vec<ThemeCluster>,
    pub created_at: DateTime<Utc>,
}

impl ClusterReport {
    pub fn new(phase: Phase, clusters: Vec<ThemeCluster>) -> Self {
        Self {
            phase,
            clusters,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Structured role outputs
// ============================================================================

/// Response analyst output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAnalysis {
    pub themes: Vec<String>,
    pub sentiment: f64,
    pub hypotheses_hit: Vec<String>,
    pub key_quotes: Vec<String>,
    pub confidence: f64,
}

/// A group of related themes across personas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeCluster {
    pub theme_name: String,
    pub personas_mentioned: Vec<String>,
    pub frequency: u32,
    pub representative_quotes: Vec<String>,
}

/// Theme analyst output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeClusters {
    pub clusters: Vec<ThemeCluster>,
}

/// Bias moderator verdict on a candidate question. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasCheck {
    #[serde(default)]
    pub has_bias: bool,
    #[serde(default)]
    pub bias_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Follow-up facilitator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    #[serde(default)]
    pub is_needed: bool,
    #[serde(default = "default_followup_question")]
    pub question: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub target_hypothesis: Option<String>,
}

fn default_followup_question() -> String {
    "none".to_string()
}

impl FollowUpQuestion {
    /// Whether the facilitator actually asked for a follow-up.
    pub fn is_actionable(&self) -> bool {
        self.is_needed && self.question.trim() != "none" && !self.question.trim().is_empty()
    }
}

/// Moderator verdict on whether a persona left its background.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaDriftCheck {
    #[serde(default)]
    pub is_drift_detected: bool,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// End-of-session synthesis. Best effort: every list may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInsights {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SessionInsights {
    pub fn is_empty(&self) -> bool {
        self.themes.is_empty() && self.insights.is_empty() && self.recommendations.is_empty()
    }
}

// ============================================================================
// Board state
// ============================================================================

/// Mutable aggregate of one discussion, owned by the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardState {
    pub phase: Phase,
    /// Every phase entered, in order.
    pub phase_history: Vec<Phase>,
    pub answers: Vec<Answer>,
    pub analyses: Vec<Analysis>,
    /// One entry per hypothesis, monotonically non-decreasing, capped at 1.0.
    pub hypothesis_coverage: BTreeMap<String, f64>,
    pub cluster_reports: Vec<ClusterReport>,
    pub follow_ups: Vec<FollowUp>,
}

impl BoardState {
    /// Create a state in the warmup phase with zero coverage for every hypothesis.
    pub fn new<I, S>(hypothesis_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phase: Phase::Warmup,
            phase_history: vec![Phase::Warmup],
            answers: Vec::new(),
            analyses: Vec::new(),
            hypothesis_coverage: hypothesis_ids
                .into_iter()
                .map(|id| (id.into(), 0.0))
                .collect(),
            cluster_reports: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// Mean of all coverage entries; 0.0 without hypotheses.
    pub fn average_coverage(&self) -> f64 {
        if self.hypothesis_coverage.is_empty() {
            return 0.0;
        }
        self.hypothesis_coverage.values().sum::<f64>() / self.hypothesis_coverage.len() as f64
    }

    /// Move to a strictly later phase.
    pub fn advance_to(&mut self, next: Phase) -> AppResult<()> {
        if next <= self.phase {
            return Err(AppError::PhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.phase_history.push(next);
        Ok(())
    }

    /// Record an answer stamped with the current phase.
    pub fn record_answer(
        &mut self,
        persona_id: impl Into<String>,
        question: impl Into<String>,
        response: impl Into<String>,
    ) -> &Answer {
        let answer = Answer::new(persona_id, question, response, self.phase);
        self.answers.push(answer);
        &self.answers[self.answers.len() - 1]
    }

    /// Record an analysis and raise coverage for every hypothesis it hits.
    ///
    /// Ids that are not tracked hypotheses are ignored so the coverage map
    /// keeps exactly one entry per configured hypothesis.
    pub fn record_analysis(&mut self, analysis: Analysis) {
        for hypothesis_id in &analysis.hypotheses_hit {
            if let Some(coverage) = self.hypothesis_coverage.get_mut(hypothesis_id) {
                *coverage = (*coverage + COVERAGE_INCREMENT).min(MAX_COVERAGE);
            }
        }
        self.analyses.push(analysis);
    }

    /// Phase of the most recent answer for (persona, question), if any.
    pub fn answer_phase(&self, persona_id: &str, question: &str) -> Option<Phase> {
        self.answers
            .iter()
            .rev()
            .find(|a| a.persona_id == persona_id && a.question == question)
            .map(|a| a.phase)
    }

    pub fn phase_answers(&self, phase: Phase) -> Vec<&Answer> {
        self.answers.iter().filter(|a| a.phase == phase).collect()
    }

    pub fn persona_answers(&self, persona_id: &str) -> Vec<&Answer> {
        self.answers
            .iter()
            .filter(|a| a.persona_id == persona_id)
            .collect()
    }

    pub fn phase_analyses(&self, phase: Phase) -> Vec<&Analysis> {
        self.analyses.iter().filter(|a| a.phase == phase).collect()
    }

    /// Hypotheses whose coverage is below `threshold`, in id order.
    pub fn uncovered_hypotheses(&self, threshold: f64) -> Vec<String> {
        self.hypothesis_coverage
            .iter()
            .filter(|(_, coverage)| **coverage < threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a follow-up was already accepted for (persona, question).
    pub fn has_follow_up(&self, persona_id: &str, source_question: &str) -> bool {
        self.follow_ups
            .iter()
            .any(|f| f.persona_id == persona_id && f.source_question == source_question)
    }
}
