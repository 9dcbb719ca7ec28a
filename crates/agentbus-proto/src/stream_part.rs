//! UI-facing stream parts.
//!
//! A stream part is already correlated and de-duplicated; the presentation
//! layer folds a list of them straight into its message state.

use crate::{TaskItem, WorkflowStepStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPartEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta {
        delta: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ThinkingMeta {
        thinking_source_key: String,
        thinking_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_message_id: Option<String>,
        /// Run generation the reasoning belongs to.
        stream_generation: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolStart {
        tool_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolComplete {
        tool_id: String,
        tool_name: String,
        output: Value,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolPartialResult {
        tool_id: String,
        partial_output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TextComplete { message_id: String, full_text: String },
    #[serde(rename_all = "camelCase")]
    WorkflowStepStart {
        workflow_id: String,
        node_id: String,
        node_name: String,
        started_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    WorkflowStepComplete {
        workflow_id: String,
        node_id: String,
        node_name: String,
        status: WorkflowStepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        completed_at: i64,
    },
    /// Replaces the whole task list snapshot.
    #[serde(rename_all = "camelCase")]
    TaskListUpdate { tasks: Vec<TaskItem> },
}

impl StreamPartEvent {
    /// Returns the kebab-case tag of this part.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamPartEvent::TextDelta { .. } => "text-delta",
            StreamPartEvent::ThinkingMeta { .. } => "thinking-meta",
            StreamPartEvent::ToolStart { .. } => "tool-start",
            StreamPartEvent::ToolComplete { .. } => "tool-complete",
            StreamPartEvent::ToolPartialResult { .. } => "tool-partial-result",
            StreamPartEvent::TextComplete { .. } => "text-complete",
            StreamPartEvent::WorkflowStepStart { .. } => "workflow-step-start",
            StreamPartEvent::WorkflowStepComplete { .. } => "workflow-step-complete",
            StreamPartEvent::TaskListUpdate { .. } => "task-list-update",
        }
    }
}
