use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board::Phase;
use crate::error::{AppError, AppResult};
use crate::roles::RoleId;

/// Product under discussion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Product {
    pub name: String,
    pub description: String,
}

/// A hypothesis whose coverage the board measures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
}

/// A simulated board member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub background: String,
}

/// A question as written in the board file: either a bare prompt or a
/// hypothesis-targeted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionSpec {
    Plain(String),
    Targeted {
        text: String,
        #[serde(default)]
        covers: Vec<String>,
        #[serde(default)]
        rationale: String,
    },
}

/// A question normalized for asking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    /// Hypothesis ids this question targets (diverge questions only).
    pub covers: Vec<String>,
    pub rationale: String,
}

impl Question {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            covers: Vec::new(),
            rationale: String::new(),
        }
    }
}

impl From<QuestionSpec> for Question {
    fn from(spec: QuestionSpec) -> Self {
        match spec {
            QuestionSpec::Plain(text) => Question::plain(text),
            QuestionSpec::Targeted {
                text,
                covers,
                rationale,
            } => Question {
                text,
                covers,
                rationale,
            },
        }
    }
}

/// Per-phase question lists. Empty lists fall back to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionsConfig {
    #[serde(default)]
    pub warmup: Vec<String>,
    #[serde(default)]
    pub diverge: Vec<QuestionSpec>,
    #[serde(default)]
    pub reflect: Vec<String>,
    #[serde(default)]
    pub converge: Vec<String>,
    #[serde(default)]
    pub closure: Vec<String>,
}

/// Diverge phase settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergeSettings {
    /// Run persona drift checks on every n-th diverge question.
    pub drift_check_interval: usize,
}

impl Default for DivergeSettings {
    fn default() -> Self {
        Self {
            drift_check_interval: 3,
        }
    }
}

/// Reflect phase settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectSettings {
    /// Minimum average coverage after diverge for reflect to run.
    pub min_coverage: f64,
    /// Share clustered themes back with the personas.
    pub share_synthesized_themes: bool,
}

impl Default for ReflectSettings {
    fn default() -> Self {
        Self {
            min_coverage: 0.7,
            share_synthesized_themes: true,
        }
    }
}

/// Phase behaviour knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub diverge: DivergeSettings,
    pub reflect: ReflectSettings,
}

/// Guidance handed to the follow-up facilitator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpCriteria {
    pub min_word_count: usize,
    pub min_themes_covered: usize,
    pub min_sentiment_strength: f64,
    pub target_hypothesis_coverage: f64,
    pub prioritize_uncovered: bool,
}

impl Default for FollowUpCriteria {
    fn default() -> Self {
        Self {
            min_word_count: 30,
            min_themes_covered: 2,
            min_sentiment_strength: 0.3,
            target_hypothesis_coverage: 0.7,
            prioritize_uncovered: true,
        }
    }
}

impl FollowUpCriteria {
    /// Render the criteria as guidance lines for the facilitator input.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!(
                "- A complete answer has at least {} words",
                self.min_word_count
            ),
            format!(
                "- A complete answer touches at least {} themes",
                self.min_themes_covered
            ),
            format!(
                "- Sentiment weaker than {:.2} in magnitude is unclear",
                self.min_sentiment_strength
            ),
            format!(
                "- Target coverage per hypothesis is {:.0}%",
                self.target_hypothesis_coverage * 100.0
            ),
        ];
        if self.prioritize_uncovered {
            lines.push("- Prefer questions that target uncovered hypotheses".to_string());
        }
        lines.join("\n")
    }
}

/// Complete description of one board session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    pub product: Product,
    pub hypotheses: Vec<Hypothesis>,
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub questions: QuestionsConfig,
    #[serde(default)]
    pub phase_config: PhaseConfig,
    #[serde(default)]
    pub followup_criteria: FollowUpCriteria,
    #[serde(default)]
    pub policy: BTreeMap<String, serde_json::Value>,
}

const DEFAULT_WARMUP: &[&str] = &[
    "What are your initial thoughts on {product_name}?",
    "What challenges do you currently face in this area?",
];

const DEFAULT_DIVERGE: &[&str] = &[
    "What are your thoughts on this product concept?",
    "What features would be most valuable to you?",
    "What concerns or challenges do you see?",
];

const DEFAULT_REFLECT: &[&str] = &[
    "Based on the themes we've discussed, which resonate most with you?",
    "Are there any important perspectives we haven't considered?",
];

const DEFAULT_CONVERGE: &[&str] = &[
    "If you had to choose between ease of use and advanced features, which would you prioritize?",
    "What's the maximum you would pay for this solution?",
];

const DEFAULT_CLOSURE: &[&str] = &[
    "What's the biggest risk you see with this product?",
    "What would make you NOT use this product?",
    "What are we missing or overlooking?",
];

impl BoardConfig {
    /// Load a board configuration from a `.yml`/`.yaml` file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if !is_yaml {
            return Err(AppError::Board {
                message: format!(
                    "Configuration file must be a YAML file (.yml or .yaml): {}",
                    path.display()
                ),
            });
        }

        if !path.exists() {
            return Err(AppError::Board {
                message: format!("Configuration file not found: {}", path.display()),
            });
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parse a board configuration from YAML text.
    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Err(AppError::Board {
                message: "Configuration file is empty".to_string(),
            });
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn hypothesis_ids(&self) -> Vec<String> {
        self.hypotheses.iter().map(|h| h.id.clone()).collect()
    }

    pub fn persona_ids(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.id.clone()).collect()
    }

    pub fn persona(&self, persona_id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == persona_id)
    }

    /// Display name for a persona, falling back to its id.
    pub fn persona_name<'a>(&'a self, persona_id: &'a str) -> &'a str {
        self.persona(persona_id)
            .map(|p| p.name.as_str())
            .unwrap_or(persona_id)
    }

    /// Questions for a phase: configured ones, or the built-in defaults with
    /// `{product_name}` substituted.
    pub fn phase_questions(&self, phase: Phase) -> Vec<Question> {
        let configured: Vec<Question> = match phase {
            Phase::Warmup => plain(&self.questions.warmup),
            Phase::Diverge => self
                .questions
                .diverge
                .iter()
                .cloned()
                .map(Question::from)
                .collect(),
            Phase::Reflect => plain(&self.questions.reflect),
            Phase::Converge => plain(&self.questions.converge),
            Phase::Closure => plain(&self.questions.closure),
        };

        if !configured.is_empty() {
            return configured;
        }

        let defaults = match phase {
            Phase::Warmup => DEFAULT_WARMUP,
            Phase::Diverge => DEFAULT_DIVERGE,
            Phase::Reflect => DEFAULT_REFLECT,
            Phase::Converge => DEFAULT_CONVERGE,
            Phase::Closure => DEFAULT_CLOSURE,
        };
        defaults
            .iter()
            .map(|q| Question::plain(q.replace("{product_name}", &self.product.name)))
            .collect()
    }

    /// Non-fatal configuration warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let covered: BTreeSet<&str> = self
            .questions
            .diverge
            .iter()
            .filter_map(|q| match q {
                QuestionSpec::Targeted { covers, .. } => Some(covers),
                QuestionSpec::Plain(_) => None,
            })
            .flatten()
            .map(String::as_str)
            .collect();
        let uncovered: Vec<&str> = self
            .hypotheses
            .iter()
            .map(|h| h.id.as_str())
            .filter(|id| !covered.contains(id))
            .collect();
        if !uncovered.is_empty() {
            warnings.push(format!(
                "Hypotheses not covered by any question: {}",
                uncovered.join(", ")
            ));
        }

        if self.personas.len() < 2 {
            warnings.push(
                "At least 2 personas are recommended for meaningful discussion".to_string(),
            );
        }

        if self.questions.warmup.is_empty() {
            warnings.push("No warmup questions defined".to_string());
        }
        if self.questions.diverge.is_empty() {
            warnings.push("No diverge questions defined".to_string());
        }
        if self.questions.converge.is_empty() {
            warnings.push("No convergence questions defined".to_string());
        }
        if self.questions.closure.is_empty() {
            warnings.push("No closure questions defined".to_string());
        }

        warnings
    }

    /// Errors that make a session impossible to run.
    pub fn validate_strict(&self) -> AppResult<()> {
        if self.personas.is_empty() {
            return Err(board_error("At least one persona is required"));
        }
        if self.hypotheses.is_empty() {
            return Err(board_error("At least one hypothesis is required"));
        }

        let mut persona_ids = BTreeSet::new();
        for persona in &self.personas {
            if !persona_ids.insert(persona.id.as_str()) {
                return Err(board_error(format!("Duplicate persona id: {}", persona.id)));
            }
            if RoleId::is_reserved_agent_id(&persona.id) {
                return Err(board_error(format!(
                    "Persona id '{}' is reserved for a board role",
                    persona.id
                )));
            }
        }

        let mut hypothesis_ids = BTreeSet::new();
        for hypothesis in &self.hypotheses {
            if !hypothesis_ids.insert(hypothesis.id.as_str()) {
                return Err(board_error(format!(
                    "Duplicate hypothesis id: {}",
                    hypothesis.id
                )));
            }
        }

        for question in &self.questions.diverge {
            if let QuestionSpec::Targeted { text, covers, .. } = question {
                if let Some(unknown) = covers.iter().find(|c| !hypothesis_ids.contains(c.as_str()))
                {
                    return Err(board_error(format!(
                        "Question '{}' covers unknown hypothesis: {}",
                        text, unknown
                    )));
                }
            }
        }

        Ok(())
    }
}

fn plain(questions: &[String]) -> Vec<Question> {
    questions.iter().map(Question::plain).collect()
}

fn board_error(message: impl Into<String>) -> AppError {
    AppError::Board {
        message: message.into(),
    }
}

/// Example board file written by `virtual-board init`.
pub const EXAMPLE_BOARD_CONFIG: &str = r#"# Virtual Board configuration

product:
  name: "AI Code Assistant"
  description: "An AI-powered coding assistant that helps developers write better code faster"

hypotheses:
  - id: "h1"
    description: "Developers struggle with understanding complex codebases"
  - id: "h2"
    description: "AI assistance can significantly speed up development"
  - id: "h3"
    description: "Developers are willing to pay for AI coding tools"

personas:
  - id: "p1"
    name: "Sarah"
    background: "Senior full-stack developer at a startup, 8 years experience, uses VS Code"
  - id: "p2"
    name: "Mike"
    background: "Junior developer learning Python, 2 years experience, self-taught"
  - id: "p3"
    name: "Elena"
    background: "Tech lead at enterprise company, 12 years experience, focuses on Java"

questions:
  warmup:
    - "How do you usually get oriented in an unfamiliar codebase?"
  diverge:
    - text: "What are your biggest pain points when working with code you didn't write?"
      covers: ["h1"]
      rationale: "Targets comprehension pain directly"
    - text: "Where would an assistant save you the most time in a typical week?"
      covers: ["h2"]
    - text: "What have you paid for developer tooling, and what made it worth it?"
      covers: ["h3"]
  converge:
    - "Would you rather have faster completions or better explanations?"
  closure:
    - "What would make you uninstall this assistant after a week?"

phase_config:
  diverge:
    drift_check_interval: 3
  reflect:
    min_coverage: 0.7
    share_synthesized_themes: true

policy:
  min_personas: 3
  target_coverage: 0.8
"#;
