//! Session file exports.
//!
//! All files land in one directory and share the session start timestamp
//! as suffix, so a run can be reassembled from its files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::report::SessionReport;
use crate::board::Phase;
use crate::error::{AppError, AppResult};
use crate::knowledge::truncate;
use crate::session::Session;

const RULE: &str = "==================================================";
const THIN_RULE: &str = "----------------------------------------";

/// Writes session artifacts to an export directory.
#[derive(Debug, Clone)]
pub struct SessionExporter {
    output_dir: PathBuf,
}

impl SessionExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every artifact of `session`; the report file only when given.
    ///
    /// Every file is attempted even when an earlier one fails. Returns the
    /// written paths in write order, or [`AppError::Export`] naming every
    /// file that could not be written.
    pub async fn export(
        &self,
        session: &Session,
        report: Option<&SessionReport>,
    ) -> AppResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let ts = timestamp(session);
        let mut progress = ExportProgress::default();

        let snapshot = session.knowledge().snapshot();
        let name = format!("memory_vb_{}.json", ts);
        progress.track(&name, self.write_json(&name, &snapshot).await);

        let name = format!("state_vb_{}.json", ts);
        progress.track(&name, self.write_json(&name, &state_export(session)).await);

        let name = format!("conversation_flow_{}.json", ts);
        progress.track(&name, self.write_json(&name, &conversation_flow(session)).await);

        let name = format!("session_summary_{}.md", ts);
        progress.track(&name, self.write_text(&name, &markdown_summary(session)).await);

        let name = format!("conversation_log_{}.txt", ts);
        progress.track(&name, self.write_text(&name, &conversation_log(session)).await);

        let middleware = session.middleware();
        let traces = middleware.tracer().export().await;
        let error_count = middleware.tracer().error_traces().await.len();
        let name = format!("traces_vb_{}.json", ts);
        let body = json!({
            "traces": traces,
            "error_count": error_count,
            "total_traces": traces.len(),
        });
        progress.track(&name, self.write_json(&name, &body).await);

        let violations = middleware.guardrails().violations().await;
        if !violations.is_empty() {
            warn!(violations = violations.len(), "Guardrail violations logged");
            let name = format!("violations_vb_{}.json", ts);
            progress.track(&name, self.write_json(&name, &violations).await);
        }

        let errors = middleware.errors().error_counts().await;
        if !errors.is_empty() {
            warn!(
                errors = errors.iter().map(|e| e.count).sum::<u64>(),
                "Errors handled during session"
            );
            let name = format!("errors_vb_{}.json", ts);
            progress.track(&name, self.write_json(&name, &errors).await);
        }

        if let Some(report) = report {
            let name = format!("report_vb_{}.json", ts);
            progress.track(&name, self.write_json(&name, report).await);
        }

        info!(
            dir = %self.output_dir.display(),
            files = progress.written.len(),
            failed = progress.failed.len(),
            "Session data exported"
        );
        progress.finish()
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> AppResult<PathBuf> {
        let body = serde_json::to_string_pretty(value)?;
        self.write_text(name, &body).await
    }

    async fn write_text(&self, name: &str, body: &str) -> AppResult<PathBuf> {
        let path = self.output_dir.join(name);
        tokio::fs::write(&path, body).await?;
        info!(file = %path.display(), "Exported");
        Ok(path)
    }
}

/// Written paths and failed files of one export.
#[derive(Debug, Default)]
struct ExportProgress {
    written: Vec<PathBuf>,
    failed: Vec<String>,
}

impl ExportProgress {
    fn track(&mut self, name: &str, result: AppResult<PathBuf>) {
        match result {
            Ok(path) => self.written.push(path),
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to export file");
                self.failed.push(format!("{} ({})", name, e));
            }
        }
    }

    fn finish(self) -> AppResult<Vec<PathBuf>> {
        if self.failed.is_empty() {
            return Ok(self.written);
        }
        Err(AppError::Export {
            failed: self.failed.len(),
            message: self.failed.join(", "),
        })
    }
}

fn timestamp(session: &Session) -> String {
    session.started_at().format("%Y%m%d_%H%M%S").to_string()
}

fn elapsed_seconds(session: &Session) -> f64 {
    (Utc::now() - session.started_at()).num_milliseconds() as f64 / 1000.0
}

fn state_export(session: &Session) -> serde_json::Value {
    let config = session.config();
    json!({
        "session_metadata": session.session_metadata(),
        "final_state": session.state(),
        "product": config.product,
        "personas": config.personas,
        "hypotheses": config.hypotheses,
        "configuration": {
            "questions": config.questions,
            "phase_config": config.phase_config,
            "followup_criteria": config.followup_criteria,
            "policy": config.policy,
        },
    })
}

fn conversation_flow(session: &Session) -> serde_json::Value {
    let config = session.config();
    let state = session.state();

    let personas: BTreeMap<&str, serde_json::Value> = config
        .personas
        .iter()
        .map(|persona| {
            let responses: Vec<serde_json::Value> = state
                .persona_answers(&persona.id)
                .into_iter()
                .map(|a| {
                    json!({
                        "question": a.question,
                        "response": a.response,
                        "phase": a.phase,
                        "timestamp": a.timestamp,
                    })
                })
                .collect();
            (
                persona.id.as_str(),
                json!({
                    "name": persona.name,
                    "background": persona.background,
                    "responses": responses,
                }),
            )
        })
        .collect();

    let phases: BTreeMap<&str, serde_json::Value> = Phase::ALL
        .iter()
        .map(|phase| {
            (
                phase.as_str(),
                json!({
                    "questions": config.phase_questions(*phase),
                    "responses": state.phase_answers(*phase),
                }),
            )
        })
        .collect();

    json!({
        "session_info": {
            "product": config.product.name,
            "start_time": session.started_at(),
            "duration_seconds": elapsed_seconds(session),
            "total_responses": state.answers.len(),
            "total_analyses": state.analyses.len(),
            "total_followups": state.follow_ups.len(),
        },
        "personas": personas,
        "phases": phases,
        "analyses": state.analyses,
        "follow_ups": state.follow_ups,
        "hypothesis_coverage": state.hypothesis_coverage,
        "final_coverage_percentage": state.average_coverage(),
    })
}

fn markdown_summary(session: &Session) -> String {
    let config = session.config();
    let state = session.state();
    let ts = timestamp(session);

    let mut md = String::from("# Virtual Board Session Summary\n\n");
    md.push_str(&format!(
        "## Product\n**{}**\n\n{}\n\n",
        config.product.name, config.product.description
    ));

    md.push_str("## Session Overview\n");
    md.push_str(&format!(
        "- **Start Time**: {}\n",
        session.started_at().format("%Y-%m-%d %H:%M:%S")
    ));
    md.push_str(&format!("- **Duration**: {:.1} seconds\n", elapsed_seconds(session)));
    md.push_str(&format!("- **Total Responses**: {}\n", state.answers.len()));
    md.push_str(&format!("- **Total Analyses**: {}\n", state.analyses.len()));
    md.push_str(&format!(
        "- **Hypothesis Coverage**: {:.1}%\n",
        state.average_coverage() * 100.0
    ));

    md.push_str("\n## Hypotheses\n");
    for hypothesis in &config.hypotheses {
        let coverage = state
            .hypothesis_coverage
            .get(&hypothesis.id)
            .copied()
            .unwrap_or(0.0);
        md.push_str(&format!(
            "- **{}**: {} ({:.1}% coverage)\n",
            hypothesis.id,
            hypothesis.description,
            coverage * 100.0
        ));
    }

    md.push_str("\n## Personas\n");
    for persona in &config.personas {
        let answers = state.persona_answers(&persona.id);
        md.push_str(&format!("\n### {} ({})\n", persona.name, persona.id));
        md.push_str(&format!("{}\n", persona.background));
        md.push_str(&format!("**Total Responses**: {}\n", answers.len()));
        if !answers.is_empty() {
            md.push_str("\n**Key Responses**:\n");
            for answer in answers.iter().take(3) {
                md.push_str(&format!("- Q: {}...\n", truncate(&answer.question, 80)));
                md.push_str(&format!("  A: {}...\n\n", truncate(&answer.response, 150)));
            }
        }
    }

    md.push_str("\n## Key Themes\n");
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for theme in state.analyses.iter().flat_map(|a| a.themes.iter()) {
        *counts.entry(theme.as_str()).or_insert(0) += 1;
    }
    let mut themes: Vec<(&str, usize)> = counts.into_iter().collect();
    themes.sort_by(|a, b| b.1.cmp(&a.1));
    for (theme, count) in themes.into_iter().take(10) {
        md.push_str(&format!("- **{}**: {} mentions\n", theme, count));
    }

    md.push_str("\n## Session Files\n");
    md.push_str(&format!("- `memory_vb_{}.json` - Complete memory state\n", ts));
    md.push_str(&format!("- `state_vb_{}.json` - Session state and configuration\n", ts));
    md.push_str(&format!(
        "- `conversation_flow_{}.json` - Detailed conversation flow\n",
        ts
    ));
    md.push_str(&format!(
        "- `conversation_log_{}.txt` - Simple conversation log\n",
        ts
    ));
    md.push_str(&format!("- `traces_vb_{}.json` - Execution traces and metrics\n", ts));
    md
}

fn conversation_log(session: &Session) -> String {
    let config = session.config();
    let state = session.state();

    let mut log = String::from("VIRTUAL BOARD CONVERSATION LOG\n");
    log.push_str(RULE);
    log.push('\n');
    log.push_str(&format!("Product: {}\n", config.product.name));
    log.push_str(&format!(
        "Start Time: {}\n",
        session.started_at().format("%Y-%m-%d %H:%M:%S")
    ));
    log.push_str(&format!("Duration: {:.1}s\n", elapsed_seconds(session)));
    log.push_str(&format!("Total Interactions: {}\n", state.answers.len()));
    log.push_str(RULE);
    log.push_str("\n\n");

    // Questions in first-asked order, answers in recording order.
    let mut questions: Vec<&str> = Vec::new();
    for answer in &state.answers {
        if !questions.contains(&answer.question.as_str()) {
            questions.push(&answer.question);
        }
    }

    for question in questions {
        let answers: Vec<_> = state
            .answers
            .iter()
            .filter(|a| a.question == question)
            .collect();
        let phase = answers
            .first()
            .map(|a| a.phase.as_str().to_uppercase())
            .unwrap_or_default();

        log.push_str(&format!("[{}] QUESTION:\n{}\n{}\n", phase, question, THIN_RULE));
        for answer in answers {
            log.push_str(&format!(
                "\n{}:\n{}\n",
                answer.persona_id.to_uppercase(),
                answer.response
            ));
            let analysis = state
                .analyses
                .iter()
                .find(|a| a.persona_id == answer.persona_id && a.question == answer.question);
            if let Some(analysis) = analysis {
                let themes = if analysis.themes.is_empty() {
                    "None".to_string()
                } else {
                    analysis.themes.join(", ")
                };
                log.push_str(&format!("  Themes: {}\n", themes));
                log.push_str(&format!("  Hypotheses hit: {:?}\n", analysis.hypotheses_hit));
                log.push_str(&format!("  Sentiment: {:+.2}\n", analysis.sentiment));
            }
        }
        log.push_str(&format!("\n{}\n\n", RULE));
    }

    if !state.follow_ups.is_empty() {
        log.push_str(&format!("FOLLOW-UP QUESTIONS GENERATED:\n{}\n", THIN_RULE));
        for followup in &state.follow_ups {
            log.push_str(&format!("\nFor {}:\n", followup.persona_id));
            log.push_str(&format!("Q: {}\n", followup.question));
            log.push_str(&format!("Rationale: {}\n", followup.rationale));
            if let Some(target) = &followup.target_hypothesis {
                log.push_str(&format!("Target: {}\n", target));
            }
        }
        log.push_str(&format!("\n{}\n\n", RULE));
    }

    log.push_str(&format!("SESSION SUMMARY:\n{}\n", THIN_RULE));
    log.push_str(&format!(
        "Hypothesis Coverage: {:.1}%\n",
        state.average_coverage() * 100.0
    ));
    log.push_str(&format!("Total Responses: {}\n", state.answers.len()));
    log.push_str(&format!("Total Analyses: {}\n", state.analyses.len()));
    log.push_str(&format!("Follow-ups Generated: {}\n\n", state.follow_ups.len()));

    log.push_str("HYPOTHESIS COVERAGE:\n");
    for hypothesis in &config.hypotheses {
        let coverage = state
            .hypothesis_coverage
            .get(&hypothesis.id)
            .copied()
            .unwrap_or(0.0);
        log.push_str(&format!(
            "- {}: {:.1}% - {}\n",
            hypothesis.id,
            coverage * 100.0,
            hypothesis.description
        ));
    }

    log.push_str(&format!("\n{}\nEnd of conversation log\n", RULE));
    log
}
