//! Session report.
//!
//! Built once after the closure phase from the board state, the knowledge
//! store and the middleware counters. Renders to JSON and markdown.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::board::{Analysis, SessionInsights};
use crate::knowledge::{ConflictingView, MemorySnapshot};
use crate::middleware::ProductionMetrics;
use crate::session::Session;

/// Coverage below which more research is recommended.
const LOW_COVERAGE: f64 = 0.6;

/// Synthesized insights carried into the report.
const MAX_SYNTHESIZED_INSIGHTS: usize = 3;

/// Raw data attached to the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub memory_state: MemorySnapshot,
    pub production_metrics: ProductionMetrics,
    pub conflicting_views: Vec<ConflictingView>,
}

/// Final report of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub product_name: String,
    pub hypotheses_tested: Vec<String>,
    pub coverage_achieved: f64,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub raw_data: ReportData,
}

impl SessionReport {
    pub fn build(
        session: &Session,
        insights: &SessionInsights,
        conflicting_views: Vec<ConflictingView>,
        metrics: ProductionMetrics,
    ) -> Self {
        let memory_state = session.knowledge().snapshot();
        let coverage = session.state().average_coverage();
        let sentiment = average_sentiment(&session.state().analyses);

        let mut key_insights = Vec::new();
        if !memory_state.consensus_themes.is_empty() {
            key_insights.push(format!(
                "Consensus themes: {}",
                memory_state.consensus_themes.join(", ")
            ));
        }
        key_insights.push(format!("Hypothesis coverage: {:.0}%", coverage * 100.0));
        if let Some(sentiment) = sentiment {
            key_insights.push(format!(
                "Overall sentiment: {} ({:+.2})",
                sentiment_label(sentiment),
                sentiment
            ));
        }
        key_insights.extend(
            insights
                .insights
                .iter()
                .take(MAX_SYNTHESIZED_INSIGHTS)
                .cloned(),
        );

        let mut recommendations = Vec::new();
        if coverage < LOW_COVERAGE {
            recommendations.push("Low hypothesis coverage - consider additional research".to_string());
        }
        match sentiment {
            Some(s) if s > 0.5 => recommendations
                .push("Strong positive response - proceed with development".to_string()),
            Some(s) if s < -0.2 => recommendations
                .push("Significant concerns raised - address before proceeding".to_string()),
            _ => {}
        }
        if metrics.error_traces > 0 {
            recommendations.push(format!(
                "Session had {} errors - review traces for improvements",
                metrics.error_traces
            ));
        }
        recommendations.extend(insights.recommendations.iter().cloned());

        Self {
            start_time: session.started_at(),
            end_time: Utc::now(),
            product_name: session.config().product.name.clone(),
            hypotheses_tested: session.config().hypothesis_ids(),
            coverage_achieved: coverage,
            key_insights,
            recommendations,
            raw_data: ReportData {
                memory_state,
                production_metrics: metrics,
                conflicting_views,
            },
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!("# Virtual Board Report: {}\n\n", self.product_name);
        md.push_str(&format!(
            "- **Start**: {}\n- **End**: {}\n- **Duration**: {:.1}s\n- **Coverage**: {:.1}%\n- **Hypotheses tested**: {}\n",
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.end_time.format("%Y-%m-%d %H:%M:%S"),
            self.duration_seconds(),
            self.coverage_achieved * 100.0,
            self.hypotheses_tested.join(", ")
        ));

        md.push_str("\n## Key Insights\n");
        for insight in &self.key_insights {
            md.push_str(&format!("- {}\n", insight));
        }

        md.push_str("\n## Recommendations\n");
        if self.recommendations.is_empty() {
            md.push_str("- None\n");
        }
        for recommendation in &self.recommendations {
            md.push_str(&format!("- {}\n", recommendation));
        }

        let views = &self.raw_data.conflicting_views;
        if !views.is_empty() {
            md.push_str("\n## Conflicting Views\n");
            for view in views {
                md.push_str(&format!(
                    "- **{}**: positive {} / negative {}\n",
                    view.theme,
                    view.positive_personas.join(", "),
                    view.negative_personas.join(", ")
                ));
            }
        }

        let metrics = &self.raw_data.production_metrics;
        md.push_str(&format!(
            "\n## Production Metrics\n- Traces: {}\n- Error traces: {}\n- Guardrail violations: {}\n",
            metrics.total_traces, metrics.error_traces, metrics.guardrail_violations
        ));
        md
    }
}

/// Mean sentiment over all analyses; `None` without analyses.
pub fn average_sentiment(analyses: &[Analysis]) -> Option<f64> {
    if analyses.is_empty() {
        return None;
    }
    Some(analyses.iter().map(|a| a.sentiment).sum::<f64>() / analyses.len() as f64)
}

fn sentiment_label(sentiment: f64) -> &'static str {
    if sentiment > 0.3 {
        "positive"
    } else if sentiment < -0.3 {
        "negative"
    } else {
        "mixed"
    }
}
