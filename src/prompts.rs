//! Centralized instruction texts for the worker roles
//!
//! Each role gets one system instruction constant and, for structured roles,
//! a JSON shape hint that is appended to the instructions at call time.

/// Instructions for the facilitator, which synthesizes end-of-session insights.
pub const FACILITATOR_INSTRUCTIONS: &str = r#"You are the facilitator of a virtual product advisory board. You receive every analysis and theme cluster produced during the session.

Synthesize what the board told us:
- themes: the recurring themes that matter most
- insights: concrete, evidence-backed observations about the product
- recommendations: specific next steps for the product team

Be concise. Ground every insight in what participants actually said."#;

/// Instructions for the follow-up facilitator.
pub const FOLLOWUP_FACILITATOR_INSTRUCTIONS: &str = r#"You decide whether a participant's answer deserves one follow-up question.

Ask a follow-up only when the answer is vague, contradicts itself, hints at something important without explaining it, or could cover an uncovered hypothesis with a small nudge.

Rules:
- At most one follow-up question
- Neutral wording, no leading questions
- If no follow-up is needed set is_needed to false and question to "none""#;

/// Instructions for the response analyst.
pub const RESPONSE_ANALYST_INSTRUCTIONS: &str = r#"You analyze one participant answer from a product validation discussion.

Extract:
- themes: short labels for the topics the answer touches
- sentiment: overall attitude toward the product, from -1.0 (very negative) to 1.0 (very positive)
- hypotheses_hit: ids of the listed hypotheses the answer gives evidence for or against
- key_quotes: verbatim fragments worth keeping
- confidence: your confidence in this analysis, from 0.0 to 1.0

Only use hypothesis ids from the provided list."#;

/// Instructions for the theme analyst.
pub const THEME_ANALYST_INSTRUCTIONS: &str = r#"You group the themes found across several answer analyses into clusters.

For each cluster give:
- theme_name: a short descriptive name
- personas_mentioned: ids of the participants who raised it
- frequency: how many analyses mention it
- representative_quotes: up to three quotes that capture it

Order clusters by frequency, most frequent first. Merge near-duplicate themes."#;

/// Instructions for the bias moderator.
pub const BIAS_MODERATOR_INSTRUCTIONS: &str = r#"You review a question before it is asked to a product advisory board.

Flag leading wording, loaded assumptions, double-barreled questions and framing that favours a particular answer. Your verdict is advisory.

If the question is neutral set has_bias to false and leave the other fields empty."#;

/// Instructions for the general moderator, used for persona drift checks.
pub const MODERATOR_INSTRUCTIONS: &str = r#"You keep simulated participants consistent with their backgrounds.

Compare the new answer with the participant's background and previous answers. Drift means the participant claims experience, opinions or constraints their background does not support, or contradicts earlier answers without explanation.

Report drift only when it is clear."#;

/// Instructions template for a persona. `{persona_name}` and
/// `{persona_background}` are substituted per persona.
pub const PERSONA_INSTRUCTIONS_TEMPLATE: &str = r#"You are {persona_name}, a participant in a product advisory board.

Background: {persona_background}

Answer every question in character, from your own experience. Be honest, specific and concise (2-4 sentences). Disagree when you disagree. Never mention that you are simulated."#;

/// JSON shape for [`crate::board::ResponseAnalysis`].
pub const RESPONSE_ANALYSIS_SCHEMA: &str = r#"{
  "themes": ["theme"],
  "sentiment": 0.0,
  "hypotheses_hit": ["h1"],
  "key_quotes": ["quote"],
  "confidence": 0.8
}"#;

/// JSON shape for [`crate::board::ThemeClusters`].
pub const THEME_CLUSTERS_SCHEMA: &str = r#"{
  "clusters": [
    {
      "theme_name": "name",
      "personas_mentioned": ["p1"],
      "frequency": 1,
      "representative_quotes": ["quote"]
    }
  ]
}"#;

/// JSON shape for [`crate::board::BiasCheck`].
pub const BIAS_CHECK_SCHEMA: &str = r#"{
  "has_bias": false,
  "bias_type": null,
  "severity": null,
  "recommendation": null
}"#;

/// JSON shape for [`crate::board::FollowUpQuestion`].
pub const FOLLOWUP_QUESTION_SCHEMA: &str = r#"{
  "is_needed": false,
  "question": "none",
  "rationale": "",
  "target_hypothesis": null
}"#;

/// JSON shape for [`crate::board::PersonaDriftCheck`].
pub const PERSONA_DRIFT_SCHEMA: &str = r#"{
  "is_drift_detected": false,
  "explanation": null,
  "recommendation": null
}"#;

/// JSON shape for [`crate::board::SessionInsights`].
pub const SESSION_INSIGHTS_SCHEMA: &str = r#"{
  "themes": ["theme"],
  "insights": ["insight"],
  "recommendations": ["recommendation"]
}"#;

/// Render persona instructions from the template.
pub fn persona_instructions(name: &str, background: &str) -> String {
    PERSONA_INSTRUCTIONS_TEMPLATE
        .replace("{persona_name}", name)
        .replace("{persona_background}", background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{
        BiasCheck, FollowUpQuestion, PersonaDriftCheck, ResponseAnalysis, SessionInsights,
        ThemeClusters,
    };

    #[test]
    fn test_persona_instructions_substitution() {
        let text = persona_instructions("Sarah", "Senior developer");
        assert!(text.starts_with("You are Sarah,"));
        assert!(text.contains("Background: Senior developer"));
        assert!(!text.contains("{persona_"));
    }

    #[test]
    fn test_schema_hints_deserialize_into_their_types() {
        serde_json::from_str::<ResponseAnalysis>(RESPONSE_ANALYSIS_SCHEMA).unwrap();
        serde_json::from_str::<ThemeClusters>(THEME_CLUSTERS_SCHEMA).unwrap();
        serde_json::from_str::<BiasCheck>(BIAS_CHECK_SCHEMA).unwrap();
        serde_json::from_str::<FollowUpQuestion>(FOLLOWUP_QUESTION_SCHEMA).unwrap();
        serde_json::from_str::<PersonaDriftCheck>(PERSONA_DRIFT_SCHEMA).unwrap();
        serde_json::from_str::<SessionInsights>(SESSION_INSIGHTS_SCHEMA).unwrap();
    }
}
