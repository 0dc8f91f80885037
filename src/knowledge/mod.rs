//! Session knowledge store.
//!
//! An append-only, categorized memory of everything said and derived during
//! a session. Entries are never mutated after insertion; the indices only
//! ever grow. None of the queries can fail: missing data yields empty
//! results.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::board::{Analysis, Phase};

/// Sentiment above which an analysis counts as a positive view.
const POSITIVE_SENTIMENT: f64 = 0.3;

/// Sentiment below which an analysis counts as a negative view.
const NEGATIVE_SENTIMENT: f64 = -0.3;

/// Agent id recorded for analysis entries.
const ANALYST_AGENT: &str = "analyst";

/// Agent id recorded for question and insight entries.
const FACILITATOR_AGENT: &str = "facilitator";

/// Category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Response,
    Analysis,
    Insight,
    Question,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Response => "response",
            EntryType::Analysis => "analysis",
            EntryType::Insight => "insight",
            EntryType::Question => "question",
        }
    }
}

/// Typed payload of a memory entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MemoryContent {
    Response {
        question: String,
        response: String,
        phase: Phase,
    },
    Analysis {
        question: String,
        themes: Vec<String>,
        sentiment: f64,
        hypotheses_hit: Vec<String>,
        confidence: f64,
    },
    Insight {
        insight: String,
        supporting_data: serde_json::Value,
    },
    Question {
        question: String,
        target_personas: Vec<String>,
    },
}

impl MemoryContent {
    pub fn entry_type(&self) -> EntryType {
        match self {
            MemoryContent::Response { .. } => EntryType::Response,
            MemoryContent::Analysis { .. } => EntryType::Analysis,
            MemoryContent::Insight { .. } => EntryType::Insight,
            MemoryContent::Question { .. } => EntryType::Question,
        }
    }
}

/// Atomic unit of the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub entry_type: EntryType,
    pub content: MemoryContent,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One question/answer exchange of a persona.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaExchange {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub response: String,
    pub phase: Phase,
}

/// How widely a theme was raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeStats {
    /// Number of analyses mentioning the theme.
    pub count: usize,
    pub personas: Vec<String>,
    /// Share of responding personas who raised the theme, in percent.
    pub percentage: f64,
}

/// Personas holding opposite views on one theme.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictingView {
    pub theme: String,
    pub positive_personas: Vec<String>,
    pub negative_personas: Vec<String>,
}

/// Export form of the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub session_start: DateTime<Utc>,
    pub interaction_count: usize,
    pub personas: BTreeMap<String, Vec<PersonaExchange>>,
    pub theme_distribution: BTreeMap<String, ThemeStats>,
    pub hypothesis_coverage: BTreeMap<String, f64>,
    pub consensus_themes: Vec<String>,
    pub total_analyses: usize,
    pub total_insights: usize,
    pub entries: Vec<MemoryEntry>,
}

/// Append-only session memory with cross-reference indices.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    session_start: DateTime<Utc>,
    entries: Vec<MemoryEntry>,
    responses: BTreeMap<String, Vec<usize>>,
    analyses: Vec<usize>,
    insights: Vec<usize>,
    themes: BTreeMap<String, Vec<usize>>,
    hypotheses: BTreeMap<String, Vec<usize>>,
    theme_personas: BTreeMap<String, BTreeSet<String>>,
    interaction_count: usize,
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self {
            session_start: Utc::now(),
            entries: Vec::new(),
            responses: BTreeMap::new(),
            analyses: Vec::new(),
            insights: Vec::new(),
            themes: BTreeMap::new(),
            hypotheses: BTreeMap::new(),
            theme_personas: BTreeMap::new(),
            interaction_count: 0,
        }
    }

    fn push(
        &mut self,
        agent_id: impl Into<String>,
        content: MemoryContent,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> usize {
        let index = self.entries.len();
        self.entries.push(MemoryEntry {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            entry_type: content.entry_type(),
            content,
            metadata,
        });
        index
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    pub fn store_response(&mut self, persona_id: &str, question: &str, response: &str, phase: Phase) {
        let index = self.push(
            persona_id,
            MemoryContent::Response {
                question: question.to_string(),
                response: response.to_string(),
                phase,
            },
            BTreeMap::new(),
        );
        self.responses
            .entry(persona_id.to_string())
            .or_default()
            .push(index);
        self.interaction_count += 1;
    }

    pub fn store_analysis(&mut self, analysis: &Analysis) {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "persona_id".to_string(),
            serde_json::Value::String(analysis.persona_id.clone()),
        );

        let index = self.push(
            ANALYST_AGENT,
            MemoryContent::Analysis {
                question: analysis.question.clone(),
                themes: analysis.themes.clone(),
                sentiment: analysis.sentiment,
                hypotheses_hit: analysis.hypotheses_hit.clone(),
                confidence: analysis.confidence,
            },
            metadata,
        );
        self.analyses.push(index);

        for theme in &analysis.themes {
            self.themes.entry(theme.clone()).or_default().push(index);
            self.theme_personas
                .entry(theme.clone())
                .or_default()
                .insert(analysis.persona_id.clone());
        }
        for hypothesis_id in &analysis.hypotheses_hit {
            self.hypotheses
                .entry(hypothesis_id.clone())
                .or_default()
                .push(index);
        }
    }

    pub fn store_insight(&mut self, insight: &str, supporting_data: serde_json::Value) {
        let index = self.push(
            FACILITATOR_AGENT,
            MemoryContent::Insight {
                insight: insight.to_string(),
                supporting_data,
            },
            BTreeMap::new(),
        );
        self.insights.push(index);
    }

    pub fn store_question(
        &mut self,
        question: &str,
        target_personas: &[String],
        metadata: BTreeMap<String, serde_json::Value>,
    ) {
        self.push(
            FACILITATOR_AGENT,
            MemoryContent::Question {
                question: question.to_string(),
                target_personas: target_personas.to_vec(),
            },
            metadata,
        );
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn interaction_count(&self) -> usize {
        self.interaction_count
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// All exchanges of a persona, oldest first.
    pub fn persona_history(&self, persona_id: &str) -> Vec<PersonaExchange> {
        self.responses
            .get(persona_id)
            .into_iter()
            .flatten()
            .filter_map(|&i| {
                let entry = &self.entries[i];
                match &entry.content {
                    MemoryContent::Response {
                        question,
                        response,
                        phase,
                    } => Some(PersonaExchange {
                        timestamp: entry.timestamp,
                        question: question.clone(),
                        response: response.clone(),
                        phase: *phase,
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn theme_distribution(&self) -> BTreeMap<String, ThemeStats> {
        let responders = self.responses.len();
        self.theme_personas
            .iter()
            .map(|(theme, personas)| {
                let percentage = if responders > 0 {
                    personas.len() as f64 / responders as f64 * 100.0
                } else {
                    0.0
                };
                let stats = ThemeStats {
                    count: self.themes.get(theme).map_or(0, Vec::len),
                    personas: personas.iter().cloned().collect(),
                    percentage,
                };
                (theme.clone(), stats)
            })
            .collect()
    }

    /// Fraction of all analyses whose hits include each hypothesis.
    ///
    /// Only hypotheses hit at least once appear. This is independent of the
    /// additive coverage tracked on the board state.
    pub fn hypothesis_coverage(&self) -> BTreeMap<String, f64> {
        let total = self.analyses.len();
        if total == 0 {
            return BTreeMap::new();
        }
        self.hypotheses
            .iter()
            .map(|(id, hits)| (id.clone(), hits.len() as f64 / total as f64))
            .collect()
    }

    /// Personas positive vs negative on `theme`, when both sides exist.
    pub fn conflicting_views(&self, theme: &str) -> Option<ConflictingView> {
        let mut positive = Vec::new();
        let mut negative = Vec::new();

        for &i in self.themes.get(theme).into_iter().flatten() {
            let entry = &self.entries[i];
            let MemoryContent::Analysis { sentiment, .. } = &entry.content else {
                continue;
            };
            let Some(persona_id) = entry.metadata.get("persona_id").and_then(|v| v.as_str())
            else {
                continue;
            };

            if *sentiment > POSITIVE_SENTIMENT {
                positive.push(persona_id.to_string());
            } else if *sentiment < NEGATIVE_SENTIMENT {
                negative.push(persona_id.to_string());
            }
        }

        if positive.is_empty() || negative.is_empty() {
            return None;
        }
        Some(ConflictingView {
            theme: theme.to_string(),
            positive_personas: positive,
            negative_personas: negative,
        })
    }

    /// Themes raised by at least `min_personas` distinct personas.
    pub fn consensus_themes(&self, min_personas: usize) -> Vec<String> {
        self.theme_personas
            .iter()
            .filter(|(_, personas)| personas.len() >= min_personas)
            .map(|(theme, _)| theme.clone())
            .collect()
    }

    /// Most recent entries across all categories, newest first.
    pub fn recent_context(&self, limit: usize) -> Vec<&MemoryEntry> {
        self.entries.iter().rev().take(limit).collect()
    }

    // ------------------------------------------------------------------------
    // Context builders
    // ------------------------------------------------------------------------

    /// Memory context prepended to a persona's prompt.
    pub fn persona_context(&self, persona_id: &str) -> String {
        let history = self.persona_history(persona_id);
        if history.is_empty() {
            return "This is your first response in the discussion.".to_string();
        }

        let mut parts = vec![format!(
            "You have participated in {} previous exchanges.",
            history.len()
        )];
        parts.push("\nYour recent responses:".to_string());
        for exchange in history.iter().skip(history.len().saturating_sub(2)) {
            parts.push(format!("- Q: {}", exchange.question));
            parts.push(format!("  A: {}...", truncate(&exchange.response, 100)));
        }
        parts.join("\n")
    }

    /// Context for the response analyst: top themes and read-model coverage.
    pub fn analysis_context(&self) -> String {
        let mut parts = Vec::new();

        let distribution = self.theme_distribution();
        if !distribution.is_empty() {
            let mut themes: Vec<(&String, &ThemeStats)> = distribution.iter().collect();
            themes.sort_by(|a, b| b.1.count.cmp(&a.1.count));
            parts.push("Top themes so far:".to_string());
            for (theme, stats) in themes.into_iter().take(3) {
                parts.push(format!(
                    "- {}: mentioned by {} personas",
                    theme,
                    stats.personas.len()
                ));
            }
        }

        let coverage = self.hypothesis_coverage();
        if !coverage.is_empty() {
            parts.push("\nHypothesis coverage:".to_string());
            for (id, value) in &coverage {
                parts.push(format!("- {}: {:.0}%", id, value * 100.0));
            }
        }

        parts.join("\n")
    }

    /// Context for the facilitator: consensus, recent activity, totals.
    pub fn facilitator_context(&self) -> String {
        let mut parts = Vec::new();

        let consensus = self.consensus_themes(2);
        if !consensus.is_empty() {
            parts.push(format!("Consensus themes: {}", consensus.join(", ")));
        }

        let recent = self.recent_context(3);
        if !recent.is_empty() {
            parts.push("\nRecent activity:".to_string());
            for entry in recent {
                parts.push(format!("- {}: {}", entry.agent_id, entry.entry_type.as_str()));
            }
        }

        parts.push(format!("\nTotal interactions: {}", self.interaction_count));
        parts.join("\n")
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            session_start: self.session_start,
            interaction_count: self.interaction_count,
            personas: self
                .responses
                .keys()
                .map(|id| (id.clone(), self.persona_history(id)))
                .collect(),
            theme_distribution: self.theme_distribution(),
            hypothesis_coverage: self.hypothesis_coverage(),
            consensus_themes: self.consensus_themes(2),
            total_analyses: self.analyses.len(),
            total_insights: self.insights.len(),
            entries: self.entries.clone(),
        }
    }
}

/// First `max_chars` characters of `text`.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
