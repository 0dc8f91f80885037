//! Execution tracer.
//!
//! Every gateway attempt is bracketed by a start event and a complete or
//! error event carrying the measured duration. Auxiliary tool calls can be
//! recorded in between.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tool call results are truncated to this many characters.
const TOOL_RESULT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    ToolCall,
    Complete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::ToolCall => "tool_call",
            EventType::Complete => "complete",
            EventType::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub event_type: EventType,
    /// Operation being traced, e.g. `ask_persona`.
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

#[derive(Debug)]
struct ActiveTrace {
    agent_id: String,
    operation: String,
    started: Instant,
}

#[derive(Debug, Default)]
struct TracerState {
    events: Vec<TraceEvent>,
    active: HashMap<Uuid, ActiveTrace>,
}

/// Append-only trace log.
#[derive(Debug, Default)]
pub struct ExecutionTracer {
    state: RwLock<TracerState>,
}

impl ExecutionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start event and return its trace id.
    pub async fn start_trace(
        &self,
        agent_id: &str,
        operation: &str,
        input: Option<serde_json::Value>,
    ) -> Uuid {
        let trace_id = Uuid::new_v4();
        let mut state = self.state.write().await;
        state.active.insert(
            trace_id,
            ActiveTrace {
                agent_id: agent_id.to_string(),
                operation: operation.to_string(),
                started: Instant::now(),
            },
        );
        state.events.push(TraceEvent {
            trace_id,
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            event_type: EventType::Start,
            operation: operation.to_string(),
            duration_ms: None,
            input,
            output: None,
            error: None,
            metadata: serde_json::Value::Null,
        });
        debug!(agent_id = %agent_id, operation = %operation, trace_id = %trace_id, "Trace started");
        trace_id
    }

    /// Close a trace with a complete event, or an error event when `error`
    /// is set. Unknown ids are logged and ignored.
    pub async fn end_trace(
        &self,
        trace_id: Uuid,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let Some(active) = state.active.remove(&trace_id) else {
            warn!(trace_id = %trace_id, "Unknown trace id");
            return;
        };

        let duration_ms = active.started.elapsed().as_secs_f64() * 1000.0;
        let event_type = if error.is_some() {
            EventType::Error
        } else {
            EventType::Complete
        };
        debug!(
            agent_id = %active.agent_id,
            operation = %active.operation,
            event_type = %event_type,
            duration_ms,
            "Trace ended"
        );

        state.events.push(TraceEvent {
            trace_id,
            timestamp: Utc::now(),
            agent_id: active.agent_id,
            event_type,
            operation: active.operation,
            duration_ms: Some(duration_ms),
            input: None,
            output,
            error,
            metadata: serde_json::Value::Null,
        });
    }

    /// Record an auxiliary tool call.
    pub async fn add_tool_call(
        &self,
        agent_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        result: &str,
    ) {
        let truncated: String = result.chars().take(TOOL_RESULT_MAX_CHARS).collect();
        let mut state = self.state.write().await;
        state.events.push(TraceEvent {
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            event_type: EventType::ToolCall,
            operation: tool_name.to_string(),
            duration_ms: None,
            input: None,
            output: None,
            error: None,
            metadata: serde_json::json!({
                "tool_name": tool_name,
                "args": args,
                "result": truncated,
            }),
        });
    }

    /// All events as a flat list ordered by timestamp.
    pub async fn export(&self) -> Vec<TraceEvent> {
        let mut events = self.state.read().await.events.clone();
        events.sort_by_key(|e| e.timestamp);
        events
    }

    pub async fn error_traces(&self) -> Vec<TraceEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Error)
            .cloned()
            .collect()
    }

    pub async fn agent_traces(&self, agent_id: &str) -> Vec<TraceEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.events.is_empty()
    }
}
