//! Phase orchestrator.
//!
//! Drives one [`Session`] through WARMUP, DIVERGE, the optional REFLECT,
//! CONVERGE and CLOSURE. Each question is a full fan-out round: every
//! persona is asked concurrently and the round is joined before anything
//! else happens. A phase that fails with an unknown error aborts the run;
//! the exporter still writes whatever exists for post-mortem analysis.

mod export;
mod report;

pub use export::SessionExporter;
pub use report::{average_sentiment, ReportData, SessionReport};

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::board::{Analysis, FollowUp, Phase, SessionInsights, ThemeCluster};
use crate::config::Question;
use crate::error::AppResult;
use crate::knowledge::{truncate, ConflictingView};
use crate::middleware::MAX_INPUT_CHARS;
use crate::session::{phase_failed, PersonaReply, Session};

/// Clusters offered to personas in the reflect question.
const REFLECT_MAX_CLUSTERS: usize = 5;

/// Characters of a representative quote shown in the reflect question.
const REFLECT_QUOTE_CHARS: usize = 256;

/// Slack when comparing averaged coverage against the reflect threshold.
const COVERAGE_EPSILON: f64 = 1e-9;

/// Steps enabled for one ask-and-analyze round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOptions {
    pub check_bias: bool,
    pub check_drift: bool,
    pub generate_followups: bool,
}

impl RoundOptions {
    pub fn with_bias_check(mut self) -> Self {
        self.check_bias = true;
        self
    }

    pub fn with_drift_check(mut self, enabled: bool) -> Self {
        self.check_drift = enabled;
        self
    }

    pub fn with_followups(mut self) -> Self {
        self.generate_followups = true;
        self
    }
}

/// Follow-up asked during a round.
#[derive(Debug, Clone, Serialize)]
pub struct FollowUpRound {
    pub followup: FollowUp,
    pub reply: PersonaReply,
    pub analysis: Option<Analysis>,
}

/// What happened for one persona during a round.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaRound {
    pub reply: PersonaReply,
    /// `None` when the persona did not answer.
    pub analysis: Option<Analysis>,
    pub drift_detected: bool,
    pub followup: Option<FollowUpRound>,
}

/// Result of one question asked to the whole board.
#[derive(Debug, Clone, Serialize)]
pub struct RoundResult {
    pub phase: Phase,
    pub question: String,
    pub personas: BTreeMap<String, PersonaRound>,
}

impl RoundResult {
    pub fn answered(&self) -> usize {
        self.personas
            .values()
            .filter(|round| round.reply.is_answered())
            .count()
    }
}

/// Runs a board session phase by phase.
pub struct Orchestrator {
    session: Session,
    exporter: Option<SessionExporter>,
    product_context: String,
    insights: SessionInsights,
    conflicts: Vec<ConflictingView>,
}

impl Orchestrator {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            exporter: None,
            product_context: String::new(),
            insights: SessionInsights::default(),
            conflicts: Vec::new(),
        }
    }

    /// Export session files when the run ends, successfully or not.
    pub fn with_exporter(mut self, exporter: SessionExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn insights(&self) -> &SessionInsights {
        &self.insights
    }

    pub fn conflicts(&self) -> &[ConflictingView] {
        &self.conflicts
    }

    /// Run every phase, then build and export the report.
    ///
    /// Export failures are logged; the report is returned regardless.
    pub async fn run(&mut self) -> AppResult<SessionReport> {
        let config = self.session.config();
        info!(
            session_id = %self.session.id(),
            product = %config.product.name,
            personas = ?config.persona_ids(),
            hypotheses = ?config.hypothesis_ids(),
            "Starting virtual board session"
        );

        if let Err(e) = self.run_phases().await {
            error!(error = %e, phase = %self.session.phase(), "Session failed");
            if let Some(exporter) = &self.exporter {
                if let Err(export_err) = exporter.export(&self.session, None).await {
                    error!(error = %export_err, "Post-mortem export failed");
                }
            }
            return Err(e);
        }

        let metrics = self.session.middleware().metrics().await;
        let report = SessionReport::build(
            &self.session,
            &self.insights,
            self.conflicts.clone(),
            metrics,
        );

        if let Some(exporter) = &self.exporter {
            if let Err(e) = exporter.export(&self.session, Some(&report)).await {
                error!(error = %e, "Session export failed");
            }
        }

        info!(
            coverage = report.coverage_achieved,
            insights = report.key_insights.len(),
            recommendations = report.recommendations.len(),
            "Session complete"
        );
        Ok(report)
    }

    async fn run_phases(&mut self) -> AppResult<()> {
        self.introduce_product();

        self.run_phase(Phase::Warmup).await?;
        self.run_phase(Phase::Diverge).await?;

        let coverage = self.session.state().average_coverage();
        let min_coverage = self.session.config().phase_config.reflect.min_coverage;
        if coverage + COVERAGE_EPSILON >= min_coverage {
            self.run_phase(Phase::Reflect).await?;
        } else {
            warn!(
                coverage,
                min_coverage, "Skipping reflect phase due to low coverage"
            );
        }

        self.run_phase(Phase::Converge).await?;
        self.run_phase(Phase::Closure).await?;
        Ok(())
    }

    fn introduce_product(&mut self) {
        let product = &self.session.config().product;
        self.product_context = format!(
            "Product: {}\nDescription: {}",
            product.name, product.description
        );
        debug!(product = %product.name, "Product introduced to the board");
    }

    async fn run_phase(&mut self, phase: Phase) -> AppResult<()> {
        if self.session.phase() != phase {
            self.session.transition_phase(phase)?;
        }
        info!(phase = %phase, "Phase started");

        let result = match phase {
            Phase::Warmup => self.run_warmup().await,
            Phase::Diverge => self.run_diverge().await,
            Phase::Reflect => self.run_reflect().await,
            Phase::Converge => self.run_converge().await,
            Phase::Closure => self.run_closure().await,
        };
        result.map_err(|e| phase_failed(phase, e))?;

        info!(
            phase = %phase,
            coverage = self.session.state().average_coverage(),
            answers = self.session.state().phase_answers(phase).len(),
            "Phase completed"
        );
        Ok(())
    }

    async fn run_warmup(&mut self) -> AppResult<()> {
        let questions = self.session.config().phase_questions(Phase::Warmup);
        let context = self.product_context.clone();
        for (idx, question) in questions.iter().enumerate() {
            debug!(index = idx + 1, total = questions.len(), question = %question.text, "Warmup question");
            self.ask_and_analyze_all(
                &question.text,
                &context,
                RoundOptions::default().with_bias_check(),
            )
            .await?;
        }
        Ok(())
    }

    async fn run_diverge(&mut self) -> AppResult<()> {
        let questions = self.session.config().phase_questions(Phase::Diverge);
        let interval = self
            .session
            .config()
            .phase_config
            .diverge
            .drift_check_interval;
        let context = self.product_context.clone();

        for (idx, Question { text, covers, .. }) in questions.iter().enumerate() {
            let number = idx + 1;
            debug!(
                index = number,
                total = questions.len(),
                targets = ?covers,
                question = %text,
                "Diverge question"
            );

            let drift = interval > 0 && number % interval == 0;
            self.ask_and_analyze_all(
                text,
                &context,
                RoundOptions::default()
                    .with_bias_check()
                    .with_drift_check(drift)
                    .with_followups(),
            )
            .await?;

            info!(
                coverage = self.session.state().average_coverage(),
                question = number,
                "Hypothesis coverage"
            );
        }
        Ok(())
    }

    async fn run_reflect(&mut self) -> AppResult<()> {
        let clusters = self.session.cluster_themes_for_phase(Phase::Diverge).await?;
        info!(clusters = clusters.len(), "Theme clusters from diverge");

        let share = self
            .session
            .config()
            .phase_config
            .reflect
            .share_synthesized_themes;
        let questions = match reflect_question(&clusters).filter(|_| share) {
            Some(question) => vec![question],
            None => self
                .session
                .config()
                .phase_questions(Phase::Reflect)
                .into_iter()
                .map(|q| q.text)
                .collect(),
        };

        let context = format!("{}\n\nTheme validation phase", self.product_context);
        for question in &questions {
            self.ask_and_analyze_all(question, &context, RoundOptions::default())
                .await?;
        }
        Ok(())
    }

    async fn run_converge(&mut self) -> AppResult<()> {
        let questions = self.session.config().phase_questions(Phase::Converge);
        let context = self.product_context.clone();
        for question in &questions {
            self.ask_and_analyze_all(
                &question.text,
                &context,
                RoundOptions::default().with_bias_check(),
            )
            .await?;
        }

        let knowledge = self.session.knowledge();
        self.conflicts = knowledge
            .consensus_themes(2)
            .iter()
            .filter_map(|theme| knowledge.conflicting_views(theme))
            .collect();
        if !self.conflicts.is_empty() {
            info!(
                conflicts = self.conflicts.len(),
                "Conflicting viewpoints identified"
            );
        }
        Ok(())
    }

    async fn run_closure(&mut self) -> AppResult<()> {
        self.insights = self.session.synthesize_session_insights().await?;

        let questions = self.session.config().phase_questions(Phase::Closure);
        let context = self.product_context.clone();
        for question in &questions {
            self.ask_and_analyze_all(&question.text, &context, RoundOptions::default())
                .await?;
        }
        Ok(())
    }

    /// Ask one question to the whole board and process every answer.
    ///
    /// Personas that failed to answer are reported but not analyzed.
    pub async fn ask_and_analyze_all(
        &mut self,
        question: &str,
        context: &str,
        options: RoundOptions,
    ) -> AppResult<RoundResult> {
        if options.check_bias {
            self.session.check_question_bias(question, Some(context)).await?;
        }

        let replies = self
            .session
            .ask_all_personas(question, Some(context))
            .await?;

        let mut personas = BTreeMap::new();
        for (persona_id, reply) in replies {
            let Some(response) = reply.answer().map(str::to_string) else {
                personas.insert(
                    persona_id,
                    PersonaRound {
                        reply,
                        analysis: None,
                        drift_detected: false,
                        followup: None,
                    },
                );
                continue;
            };

            let analysis = self
                .session
                .analyze_response(&persona_id, &response, question)
                .await?;
            debug!(
                persona_id = %persona_id,
                themes = ?analysis.themes.iter().take(3).collect::<Vec<_>>(),
                hits = ?analysis.hypotheses_hit,
                sentiment = analysis.sentiment,
                "Answer analyzed"
            );

            let drift_detected = if options.check_drift {
                self.session.check_persona_drift(&persona_id, &response).await?
            } else {
                false
            };

            let followup = if options.generate_followups {
                self.ask_followup(&persona_id, &response, &analysis, context)
                    .await?
            } else {
                None
            };

            personas.insert(
                persona_id,
                PersonaRound {
                    reply,
                    analysis: Some(analysis),
                    drift_detected,
                    followup,
                },
            );
        }

        let round = RoundResult {
            phase: self.session.phase(),
            question: question.to_string(),
            personas,
        };
        debug!(
            phase = %round.phase,
            answered = round.answered(),
            total = round.personas.len(),
            "Round complete"
        );
        Ok(round)
    }

    async fn ask_followup(
        &mut self,
        persona_id: &str,
        response: &str,
        analysis: &Analysis,
        context: &str,
    ) -> AppResult<Option<FollowUpRound>> {
        let Some(followup) = self
            .session
            .generate_followup(persona_id, response, analysis)
            .await?
        else {
            debug!(persona_id = %persona_id, "No follow-up needed");
            return Ok(None);
        };

        let reply = self
            .session
            .ask_persona(persona_id, &followup.question, Some(context))
            .await?;
        let analysis = match reply.answer() {
            Some(text) => {
                let text = text.to_string();
                Some(
                    self.session
                        .analyze_response(persona_id, &text, &followup.question)
                        .await?,
                )
            }
            None => None,
        };

        Ok(Some(FollowUpRound {
            followup,
            reply,
            analysis,
        }))
    }
}

/// Build the shared reflect question from the top clusters.
///
/// Clusters are dropped from the tail until the question fits the input
/// guardrail; `None` when no cluster fits.
pub fn reflect_question(clusters: &[ThemeCluster]) -> Option<String> {
    let lines: Vec<String> = clusters
        .iter()
        .take(REFLECT_MAX_CLUSTERS)
        .map(|cluster| {
            let quote = cluster
                .representative_quotes
                .first()
                .map(|q| truncate(q, REFLECT_QUOTE_CHARS))
                .unwrap_or_default();
            format!("- {}: {}...", cluster.theme_name, quote)
        })
        .collect();

    (1..=lines.len()).rev().find_map(|count| {
        let question = format!(
            "Here are the main themes we've heard so far:\n{}\n\nWhich of these resonate most with you and why?",
            lines[..count].join("\n")
        );
        (question.chars().count() <= MAX_INPUT_CHARS).then_some(question)
    })
}
