//! Discussion session.
//!
//! A [`Session`] owns the [`BoardState`] and the [`KnowledgeStore`] of one
//! board run and exposes the discussion operations. Every gateway call goes
//! through the shared [`ProductionMiddleware`]; only unknown errors escape
//! as `Err`, everything else degrades to a neutral result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::board::{
    Analysis, BiasCheck, BoardState, ClusterReport, FollowUp, FollowUpQuestion, Phase,
    PersonaDriftCheck, ResponseAnalysis, SessionInsights, ThemeCluster, ThemeClusters,
};
use crate::config::{BoardConfig, PipeConfig};
use crate::error::{AppError, AppResult};
use crate::gateway::{serialize_for_log, CapabilityGateway};
use crate::knowledge::KnowledgeStore;
use crate::middleware::{error_text, fallback_error_text, Outcome, ProductionMiddleware};
use crate::roles::{RoleId, RoleRegistry};

/// Hypotheses below this coverage are offered to the follow-up facilitator.
pub const FOLLOWUP_COVERAGE_THRESHOLD: f64 = 0.5;

/// Answers compared against the background in a drift check.
pub const DRIFT_HISTORY_LEN: usize = 5;

/// Reply of one persona to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum PersonaReply {
    Answered(String),
    /// Always starts with `"Error: "`.
    Failed(String),
}

impl PersonaReply {
    pub fn text(&self) -> &str {
        match self {
            PersonaReply::Answered(text) | PersonaReply::Failed(text) => text,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            PersonaReply::Answered(text) => Some(text),
            PersonaReply::Failed(_) => None,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, PersonaReply::Answered(_))
    }
}

/// Snapshot of session progress for exports.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub current_phase: Phase,
    pub coverage: f64,
    pub total_answers: usize,
    pub total_analyses: usize,
    pub hypothesis_coverage: BTreeMap<String, f64>,
}

/// One board run: state, knowledge and the operations over them.
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: BoardConfig,
    roles: RoleRegistry,
    gateway: Arc<dyn CapabilityGateway>,
    middleware: Arc<ProductionMiddleware>,
    state: BoardState,
    knowledge: KnowledgeStore,
}

impl Session {
    /// Create a session over a board that passes strict validation.
    pub fn new(
        config: BoardConfig,
        pipes: &PipeConfig,
        gateway: Arc<dyn CapabilityGateway>,
        middleware: Arc<ProductionMiddleware>,
    ) -> AppResult<Self> {
        config.validate_strict()?;
        let roles = RoleRegistry::new(&config, pipes);
        let state = BoardState::new(config.hypothesis_ids());
        Ok(Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            roles,
            gateway,
            middleware,
            state,
            knowledge: KnowledgeStore::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn middleware(&self) -> &ProductionMiddleware {
        &self.middleware
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Advance to a strictly later phase.
    pub fn transition_phase(&mut self, next: Phase) -> AppResult<()> {
        let from = self.state.phase;
        self.state.advance_to(next)?;
        info!(from = %from, to = %next, session_id = %self.id, "Phase transition");
        Ok(())
    }

    pub fn session_metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.id,
            start_time: self.started_at,
            current_phase: self.state.phase,
            coverage: self.state.average_coverage(),
            total_answers: self.state.answers.len(),
            total_analyses: self.state.analyses.len(),
            hypothesis_coverage: self.state.hypothesis_coverage.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Persona calls
    // ------------------------------------------------------------------------

    fn persona_prompt(&self, persona_id: &str, question: &str, context: Option<&str>) -> String {
        let mut parts = vec![self.knowledge.persona_context(persona_id)];
        if let Some(context) = context {
            parts.push(context.to_string());
        }
        format!("{}\n\nQuestion: {}", parts.join("\n\n"), question)
    }

    fn record_answer(&mut self, persona_id: &str, question: &str, response: &str) {
        let phase = self.state.record_answer(persona_id, question, response).phase;
        self.knowledge
            .store_response(persona_id, question, response, phase);
    }

    fn question_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert("phase".to_string(), json!(self.state.phase));
        metadata
    }

    /// Ask one persona. Degraded calls come back as [`PersonaReply::Failed`]
    /// and are not recorded.
    pub async fn ask_persona(
        &mut self,
        persona_id: &str,
        question: &str,
        context: Option<&str>,
    ) -> AppResult<PersonaReply> {
        let prompt = self.persona_prompt(persona_id, question, context);
        let request = self
            .roles
            .request(&RoleId::Persona(persona_id.to_string()), prompt)?;

        let metadata = self.question_metadata();
        self.knowledge
            .store_question(question, &[persona_id.to_string()], metadata);

        let outcome = self
            .middleware
            .invoke_text(self.gateway.as_ref(), &request, Some(question))
            .await?;

        Ok(match outcome {
            Outcome::Completed(text) => {
                self.record_answer(persona_id, question, &text);
                PersonaReply::Answered(text)
            }
            Outcome::Degraded(fallback) => PersonaReply::Failed(fallback_error_text(&fallback)),
        })
    }

    /// Ask every persona concurrently and wait for all of them.
    ///
    /// Each persona is isolated: any failure, including an unknown error or
    /// a panicked task, becomes a `Failed` entry for that persona only. The
    /// map always holds one entry per persona.
    pub async fn ask_all_personas(
        &mut self,
        question: &str,
        context: Option<&str>,
    ) -> AppResult<BTreeMap<String, PersonaReply>> {
        let persona_ids = self.roles.persona_ids().to_vec();

        let metadata = self.question_metadata();
        self.knowledge.store_question(question, &persona_ids, metadata);

        let mut tasks = JoinSet::new();
        for persona_id in &persona_ids {
            let prompt = self.persona_prompt(persona_id, question, context);
            let request = self
                .roles
                .request(&RoleId::Persona(persona_id.clone()), prompt)?;
            let gateway = Arc::clone(&self.gateway);
            let middleware = Arc::clone(&self.middleware);
            let subject = question.to_string();
            let persona_id = persona_id.clone();

            tasks.spawn(async move {
                let result = middleware
                    .invoke_text(gateway.as_ref(), &request, Some(&subject))
                    .await;
                (persona_id, result)
            });
        }

        info!(personas = persona_ids.len(), phase = %self.state.phase, "Asking all personas");

        let mut replies = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((persona_id, Ok(Outcome::Completed(text)))) => {
                    replies.insert(persona_id, PersonaReply::Answered(text));
                }
                Ok((persona_id, Ok(Outcome::Degraded(fallback)))) => {
                    warn!(persona_id = %persona_id, reason = %fallback.reason, "Persona reply degraded");
                    replies.insert(persona_id, PersonaReply::Failed(fallback_error_text(&fallback)));
                }
                Ok((persona_id, Err(e))) => {
                    warn!(persona_id = %persona_id, error = %e, "Persona call failed");
                    replies.insert(persona_id, PersonaReply::Failed(error_text(&e)));
                }
                Err(e) => {
                    warn!(error = %e, "Persona task did not complete");
                }
            }
        }

        for persona_id in &persona_ids {
            replies.entry(persona_id.clone()).or_insert_with(|| {
                PersonaReply::Failed("Error: persona task did not complete".to_string())
            });
        }

        for persona_id in &persona_ids {
            if let Some(PersonaReply::Answered(text)) = replies.get(persona_id) {
                let text = text.clone();
                self.record_answer(persona_id, question, &text);
            }
        }

        debug!(
            answered = replies.values().filter(|r| r.is_answered()).count(),
            total = replies.len(),
            "Persona round complete"
        );
        Ok(replies)
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    /// Analyze one answer and raise hypothesis coverage.
    ///
    /// A degraded analyst call yields an empty analysis that is neither
    /// recorded nor counted towards coverage.
    pub async fn analyze_response(
        &mut self,
        persona_id: &str,
        response: &str,
        question: &str,
    ) -> AppResult<Analysis> {
        let phase = self
            .state
            .answer_phase(persona_id, question)
            .unwrap_or(self.state.phase);

        let (persona_name, persona_background) = match self.config.persona(persona_id) {
            Some(p) => (p.name.as_str(), p.background.as_str()),
            None => (persona_id, ""),
        };
        let hypotheses: Vec<String> = self
            .config
            .hypotheses
            .iter()
            .map(|h| format!("- {}: {}", h.id, h.description))
            .collect();

        let mut input = format!(
            "Participant: {} ({})\n\nQuestion: {}\n\nAnswer: {}\n\nHypotheses:\n{}",
            persona_name,
            persona_background,
            question,
            response,
            hypotheses.join("\n")
        );
        let context = self.knowledge.analysis_context();
        if !context.is_empty() {
            input.push_str("\n\nSession context:\n");
            input.push_str(&context);
        }

        let request = self.roles.request(&RoleId::ResponseAnalyst, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<ResponseAnalysis>(self.gateway.as_ref(), &request, None)
            .await?;

        let Outcome::Completed(raw) = outcome else {
            return Ok(Analysis::empty(persona_id, question, phase));
        };

        let analysis = Analysis::from_response(persona_id, question, phase, raw);
        self.knowledge.store_analysis(&analysis);
        self.state.record_analysis(analysis.clone());
        self.middleware
            .tracer()
            .add_tool_call(
                request.agent_id.as_str(),
                "store_analysis",
                json!({ "persona_id": persona_id, "question": question }),
                &format!("hypotheses_hit={:?}", analysis.hypotheses_hit),
            )
            .await;

        debug!(
            persona_id = %persona_id,
            themes = analysis.themes.len(),
            hits = ?analysis.hypotheses_hit,
            coverage = self.state.average_coverage(),
            "Response analyzed"
        );
        Ok(analysis)
    }

    /// Advisory bias check of a candidate question.
    pub async fn check_question_bias(
        &self,
        question: &str,
        context: Option<&str>,
    ) -> AppResult<BiasCheck> {
        let input = format!(
            "Question: {}\n\nContext: {}",
            question,
            context.unwrap_or("Product validation discussion")
        );
        let request = self.roles.request(&RoleId::BiasModerator, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<BiasCheck>(self.gateway.as_ref(), &request, Some(question))
            .await?;

        let check = outcome.completed().unwrap_or_default();
        if check.has_bias {
            warn!(
                bias_type = ?check.bias_type,
                severity = ?check.severity,
                recommendation = ?check.recommendation,
                "Question may be biased"
            );
        }
        Ok(check)
    }

    /// Ask the follow-up facilitator whether an answer needs a follow-up.
    ///
    /// Returns `None` without a gateway call when a follow-up already exists
    /// for the same (persona, question).
    pub async fn generate_followup(
        &mut self,
        persona_id: &str,
        response: &str,
        analysis: &Analysis,
    ) -> AppResult<Option<FollowUp>> {
        if self.state.has_follow_up(persona_id, &analysis.question) {
            debug!(persona_id = %persona_id, "Follow-up already generated for this question");
            return Ok(None);
        }

        let uncovered = self.state.uncovered_hypotheses(FOLLOWUP_COVERAGE_THRESHOLD);
        let input = format!(
            "Phase: {}\n\nQuestion: {}\n\nAnswer: {}\n\nAnalysis:\n{}\n\nUncovered hypotheses: {}\n\nCriteria:\n{}",
            self.state.phase,
            analysis.question,
            response,
            serialize_for_log(analysis, "followup analysis"),
            if uncovered.is_empty() {
                "none".to_string()
            } else {
                uncovered.join(", ")
            },
            self.config.followup_criteria.render()
        );

        let request = self.roles.request(&RoleId::FollowupFacilitator, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<FollowUpQuestion>(self.gateway.as_ref(), &request, None)
            .await?;

        let Some(candidate) = outcome.completed() else {
            return Ok(None);
        };
        if !candidate.is_actionable() {
            return Ok(None);
        }

        let followup = FollowUp {
            persona_id: persona_id.to_string(),
            source_question: analysis.question.clone(),
            question: candidate.question,
            rationale: candidate.rationale,
            target_hypothesis: candidate.target_hypothesis,
        };
        info!(
            persona_id = %persona_id,
            target = ?followup.target_hypothesis,
            "Follow-up generated"
        );
        self.state.follow_ups.push(followup.clone());
        Ok(Some(followup))
    }

    /// Cluster the themes of every analysis from `phase`.
    pub async fn cluster_themes_for_phase(&mut self, phase: Phase) -> AppResult<Vec<ThemeCluster>> {
        let analyses = self.state.phase_analyses(phase);
        if analyses.is_empty() {
            debug!(phase = %phase, "No analyses to cluster");
            return Ok(Vec::new());
        }

        let input = format!(
            "Analyses from the {} phase:\n{}",
            phase,
            serialize_for_log(&analyses, "theme clustering")
        );
        let request = self.roles.request(&RoleId::ThemeAnalyst, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<ThemeClusters>(self.gateway.as_ref(), &request, None)
            .await?;

        let Some(ThemeClusters { clusters }) = outcome.completed() else {
            return Ok(Vec::new());
        };

        info!(phase = %phase, clusters = clusters.len(), "Themes clustered");
        self.state
            .cluster_reports
            .push(ClusterReport::new(phase, clusters.clone()));
        Ok(clusters)
    }

    /// Whether the persona's new response drifted from its background.
    pub async fn check_persona_drift(&self, persona_id: &str, response: &str) -> AppResult<bool> {
        let background = self
            .config
            .persona(persona_id)
            .map(|p| p.background.as_str())
            .unwrap_or_default();

        let answers = self.state.persona_answers(persona_id);
        let recent: Vec<serde_json::Value> = answers
            .iter()
            .skip(answers.len().saturating_sub(DRIFT_HISTORY_LEN))
            .map(|a| json!({ "question": a.question, "response": a.response }))
            .collect();

        let input = format!(
            "Background: {}\n\nPrevious answers:\n{}\n\nNew answer: {}",
            background,
            serialize_for_log(&recent, "drift history"),
            response
        );
        let request = self.roles.request(&RoleId::Moderator, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<PersonaDriftCheck>(self.gateway.as_ref(), &request, None)
            .await?;

        let check = outcome.completed().unwrap_or_default();
        if check.is_drift_detected {
            warn!(
                persona_id = %persona_id,
                explanation = ?check.explanation,
                "Persona drift detected"
            );
        }
        Ok(check.is_drift_detected)
    }

    /// Best-effort synthesis over all analyses and cluster reports.
    pub async fn synthesize_session_insights(&mut self) -> AppResult<SessionInsights> {
        let input = format!(
            "Analyses:\n{}\n\nTheme clusters:\n{}\n\nDiscussion state:\n{}",
            serialize_for_log(&self.state.analyses, "insight analyses"),
            serialize_for_log(&self.state.cluster_reports, "insight clusters"),
            self.knowledge.facilitator_context()
        );
        let request = self.roles.request(&RoleId::Facilitator, input)?;
        let outcome = self
            .middleware
            .invoke_structured::<SessionInsights>(self.gateway.as_ref(), &request, None)
            .await?;

        let insights = outcome.completed().unwrap_or_default();
        for insight in &insights.insights {
            self.knowledge
                .store_insight(insight, json!({ "themes": insights.themes }));
        }
        info!(
            themes = insights.themes.len(),
            insights = insights.insights.len(),
            "Session insights synthesized"
        );
        Ok(insights)
    }
}

/// Wrap a failure in the context of the phase it aborted.
pub fn phase_failed(phase: Phase, err: AppError) -> AppError {
    match err {
        AppError::PhaseFailed { .. } => err,
        other => AppError::PhaseFailed {
            phase,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, EXAMPLE_BOARD_CONFIG};
    use crate::error::GatewayError;
    use crate::gateway::MockCapabilityGateway;

    fn session_with(gateway: MockCapabilityGateway) -> Session {
        let config = BoardConfig::from_yaml_str(EXAMPLE_BOARD_CONFIG).unwrap();
        let middleware = Arc::new(ProductionMiddleware::new(RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 0,
        }));
        Session::new(config, &PipeConfig::default(), Arc::new(gateway), middleware).unwrap()
    }

    fn analysis_json(hits: &[&str]) -> String {
        json!({
            "themes": ["pricing"],
            "sentiment": 0.4,
            "hypotheses_hit": hits,
            "key_quotes": [],
            "confidence": 0.9
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_ask_persona_records_answer() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|req| {
                assert!(req.input.contains("This is your first response in the discussion."));
                assert!(req.input.ends_with("Question: How do you onboard?"));
                Ok("I read the tests first, then the README.".to_string())
            });

        let mut session = session_with(gateway);
        let reply = session
            .ask_persona("p1", "How do you onboard?", None)
            .await
            .unwrap();

        assert!(reply.is_answered());
        assert_eq!(session.state().answers.len(), 1);
        assert_eq!(session.state().answers[0].phase, Phase::Warmup);
        assert_eq!(session.knowledge().persona_history("p1").len(), 1);
    }

    #[tokio::test]
    async fn test_ask_all_personas_isolates_failures() {
        let mut gateway = MockCapabilityGateway::new();
        gateway.expect_invoke().times(3).returning(|req| match req.agent_id.as_str() {
            "p2" => Err(GatewayError::Timeout { timeout_ms: 100 }),
            "p3" => Err(GatewayError::other("connection reset")),
            _ => Ok("Mostly I rely on grep and patience.".to_string()),
        });

        let mut session = session_with(gateway);
        let replies = session.ask_all_personas("Q?", None).await.unwrap();

        assert_eq!(replies.len(), 3);
        assert!(replies["p1"].is_answered());
        assert!(replies["p2"].text().starts_with("Error: "));
        assert!(replies["p3"].text().starts_with("Error: "));
        assert_eq!(session.state().answers.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_response_updates_coverage() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|_| Ok(analysis_json(&["h1", "h9"])));

        let mut session = session_with(gateway);
        let analysis = session
            .analyze_response("p1", "It is too expensive", "Q")
            .await
            .unwrap();

        assert_eq!(analysis.hypotheses_hit, vec!["h1", "h9"]);
        let coverage = &session.state().hypothesis_coverage;
        assert!((coverage["h1"] - 0.2).abs() < 1e-9);
        assert_eq!(coverage["h2"], 0.0);
        assert_eq!(coverage.len(), 3);
        assert_eq!(session.knowledge().hypothesis_coverage()["h1"], 1.0);

        let events = session.middleware().tracer().export().await;
        assert!(events.iter().any(|e| e.operation == "store_analysis"));
    }

    #[tokio::test]
    async fn test_degraded_analysis_is_not_recorded() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|_| Ok("not json".to_string()));

        let mut session = session_with(gateway);
        let analysis = session.analyze_response("p1", "answer", "Q").await.unwrap();
        assert!(analysis.themes.is_empty());
        assert!(session.state().analyses.is_empty());
        assert_eq!(session.state().average_coverage(), 0.0);
    }

    #[tokio::test]
    async fn test_generate_followup_once_per_question() {
        let mut gateway = MockCapabilityGateway::new();
        gateway.expect_invoke().times(1).returning(|req| {
            assert!(req.input.contains("Uncovered hypotheses: h1, h2, h3"));
            Ok(r#"{"is_needed": true, "question": "Which tools?", "rationale": "vague", "target_hypothesis": "h2"}"#.to_string())
        });

        let mut session = session_with(gateway);
        let analysis = Analysis::empty("p1", "Q", Phase::Diverge);

        let first = session
            .generate_followup("p1", "It depends", &analysis)
            .await
            .unwrap();
        assert_eq!(first.unwrap().question, "Which tools?");

        let second = session
            .generate_followup("p1", "It depends", &analysis)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(session.state().follow_ups.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_followup_none_when_not_needed() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(2)
            .returning(|req| {
                if req.input.contains("Question: Q1") {
                    Ok(r#"{"is_needed": false, "question": "Why?"}"#.to_string())
                } else {
                    Ok(r#"{"is_needed": true, "question": "none"}"#.to_string())
                }
            });

        let mut session = session_with(gateway);
        for question in ["Q1", "Q2"] {
            let analysis = Analysis::empty("p1", question, Phase::Diverge);
            assert!(session
                .generate_followup("p1", "fine", &analysis)
                .await
                .unwrap()
                .is_none());
        }
        assert!(session.state().follow_ups.is_empty());
    }

    #[tokio::test]
    async fn test_cluster_without_analyses_skips_gateway() {
        let mut gateway = MockCapabilityGateway::new();
        gateway.expect_invoke().times(0);

        let mut session = session_with(gateway);
        let clusters = session.cluster_themes_for_phase(Phase::Diverge).await.unwrap();
        assert!(clusters.is_empty());
        assert!(session.state().cluster_reports.is_empty());
    }

    #[tokio::test]
    async fn test_drift_check_uses_verdict() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|_| Ok(r#"{"is_drift_detected": true, "explanation": "claims 30 years"}"#.to_string()));

        let session = session_with(gateway);
        assert!(session.check_persona_drift("p2", "In my 30 years...").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_error_propagates_from_bias_check() {
        let mut gateway = MockCapabilityGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|_| Err(GatewayError::other("connection reset")));

        let session = session_with(gateway);
        let err = session.check_question_bias("Q?", None).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
    }

    #[tokio::test]
    async fn test_synthesize_stores_insights() {
        let mut gateway = MockCapabilityGateway::new();
        gateway.expect_invoke().times(1).returning(|_| {
            Ok(r#"{"themes": ["onboarding"], "insights": ["a", "b"], "recommendations": []}"#.to_string())
        });

        let mut session = session_with(gateway);
        let insights = session.synthesize_session_insights().await.unwrap();
        assert_eq!(insights.insights.len(), 2);
        assert_eq!(session.knowledge().snapshot().total_insights, 2);
    }

    #[test]
    fn test_transition_phase_rejects_regression() {
        let mut session = session_with(MockCapabilityGateway::new());
        session.transition_phase(Phase::Diverge).unwrap();
        assert!(matches!(
            session.transition_phase(Phase::Warmup),
            Err(AppError::PhaseTransition { .. })
        ));
        assert_eq!(session.session_metadata().current_phase, Phase::Diverge);
    }

    #[test]
    fn test_phase_failed_wraps_once() {
        let err = phase_failed(
            Phase::Diverge,
            AppError::Internal {
                message: "x".to_string(),
            },
        );
        let err = phase_failed(Phase::Converge, err);
        assert!(matches!(
            err,
            AppError::PhaseFailed {
                phase: Phase::Diverge,
                ..
            }
        ));
    }
}
