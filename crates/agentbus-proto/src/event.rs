//! Event envelope and per-type payloads.
//!
//! Every backend adapter translates its native messages into a [`BusEvent`].
//! The payload is a sum type keyed by the event-type tag, so the tag always
//! determines the payload shape. Field-level checks that the type system
//! cannot express live next to each payload in its [`Validate`] impl.

use crate::{Error, Result, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Field-level schema check for a payload type.
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), ValidationError>;
}

fn require_non_empty(
    event_type: EventType,
    field: &'static str,
    value: &str,
) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(event_type, field, "must not be empty"));
    }
    Ok(())
}

fn require_non_empty_opt(
    event_type: EventType,
    field: &'static str,
    value: Option<&str>,
) -> std::result::Result<(), ValidationError> {
    match value {
        Some(value) => require_non_empty(event_type, field, value),
        None => Ok(()),
    }
}

/// The event-type vocabulary understood by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "stream.text.delta")]
    TextDelta,
    #[serde(rename = "stream.text.complete")]
    TextComplete,
    #[serde(rename = "stream.thinking.delta")]
    ThinkingDelta,
    #[serde(rename = "stream.thinking.complete")]
    ThinkingComplete,
    #[serde(rename = "stream.tool.start")]
    ToolStart,
    #[serde(rename = "stream.tool.complete")]
    ToolComplete,
    #[serde(rename = "stream.tool.partial_result")]
    ToolPartialResult,
    #[serde(rename = "stream.agent.start")]
    AgentStart,
    #[serde(rename = "stream.agent.update")]
    AgentUpdate,
    #[serde(rename = "stream.agent.complete")]
    AgentComplete,
    #[serde(rename = "stream.session.start")]
    SessionStart,
    #[serde(rename = "stream.session.idle")]
    SessionIdle,
    #[serde(rename = "stream.session.error")]
    SessionError,
    #[serde(rename = "stream.permission.requested")]
    PermissionRequested,
    #[serde(rename = "stream.usage")]
    Usage,
    #[serde(rename = "workflow.step.start")]
    WorkflowStepStart,
    #[serde(rename = "workflow.step.complete")]
    WorkflowStepComplete,
    #[serde(rename = "workflow.task.update")]
    WorkflowTaskUpdate,
}

impl EventType {
    pub const ALL: [EventType; 18] = [
        EventType::TextDelta,
        EventType::TextComplete,
        EventType::ThinkingDelta,
        EventType::ThinkingComplete,
        EventType::ToolStart,
        EventType::ToolComplete,
        EventType::ToolPartialResult,
        EventType::AgentStart,
        EventType::AgentUpdate,
        EventType::AgentComplete,
        EventType::SessionStart,
        EventType::SessionIdle,
        EventType::SessionError,
        EventType::PermissionRequested,
        EventType::Usage,
        EventType::WorkflowStepStart,
        EventType::WorkflowStepComplete,
        EventType::WorkflowTaskUpdate,
    ];

    /// Returns the wire tag for this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TextDelta => "stream.text.delta",
            EventType::TextComplete => "stream.text.complete",
            EventType::ThinkingDelta => "stream.thinking.delta",
            EventType::ThinkingComplete => "stream.thinking.complete",
            EventType::ToolStart => "stream.tool.start",
            EventType::ToolComplete => "stream.tool.complete",
            EventType::ToolPartialResult => "stream.tool.partial_result",
            EventType::AgentStart => "stream.agent.start",
            EventType::AgentUpdate => "stream.agent.update",
            EventType::AgentComplete => "stream.agent.complete",
            EventType::SessionStart => "stream.session.start",
            EventType::SessionIdle => "stream.session.idle",
            EventType::SessionError => "stream.session.error",
            EventType::PermissionRequested => "stream.permission.requested",
            EventType::Usage => "stream.usage",
            EventType::WorkflowStepStart => "workflow.step.start",
            EventType::WorkflowStepComplete => "workflow.step.complete",
            EventType::WorkflowTaskUpdate => "workflow.task.update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| Error::UnknownEventType(s.to_string()))
    }
}

/// How a backend identifies a reasoning block.
///
/// Claude streams thinking as positional content blocks, OpenCode as
/// message parts with ids, Copilot with server-issued reasoning ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ThinkingSource {
    Index(u32),
    PartId(String),
    ReasoningId(String),
}

impl ThinkingSource {
    fn validate(&self, event_type: EventType) -> std::result::Result<(), ValidationError> {
        match self {
            ThinkingSource::Index(_) => Ok(()),
            ThinkingSource::PartId(id) | ThinkingSource::ReasoningId(id) => {
                require_non_empty(event_type, "source", id)
            }
        }
    }
}

impl fmt::Display for ThinkingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkingSource::Index(index) => write!(f, "index:{index}"),
            ThinkingSource::PartId(id) => write!(f, "part:{id}"),
            ThinkingSource::ReasoningId(id) => write!(f, "reasoning:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDeltaData {
    pub delta: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl Validate for TextDeltaData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::TextDelta, "messageId", &self.message_id)?;
        require_non_empty_opt(EventType::TextDelta, "agentId", self.agent_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextCompleteData {
    pub message_id: String,
    pub full_text: String,
}

impl Validate for TextCompleteData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::TextComplete, "messageId", &self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingDeltaData {
    pub delta: String,
    pub source: ThinkingSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl Validate for ThinkingDeltaData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.source.validate(EventType::ThinkingDelta)?;
        require_non_empty_opt(EventType::ThinkingDelta, "messageId", self.message_id.as_deref())?;
        require_non_empty_opt(EventType::ThinkingDelta, "agentId", self.agent_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingCompleteData {
    pub source: ThinkingSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Validate for ThinkingCompleteData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.source.validate(EventType::ThinkingComplete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartData {
    pub tool_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    /// Native id of the tool call that spawned the sub-agent running this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
}

impl Validate for ToolStartData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::ToolStart, "toolId", &self.tool_id)?;
        require_non_empty(EventType::ToolStart, "toolName", &self.tool_name)?;
        require_non_empty_opt(
            EventType::ToolStart,
            "parentToolCallId",
            self.parent_tool_call_id.as_deref(),
        )?;
        require_non_empty_opt(
            EventType::ToolStart,
            "parentAgentId",
            self.parent_agent_id.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompleteData {
    pub tool_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_result: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
}

impl Validate for ToolCompleteData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::ToolComplete, "toolId", &self.tool_id)?;
        require_non_empty(EventType::ToolComplete, "toolName", &self.tool_name)?;
        if self.success && self.error.is_some() {
            return Err(ValidationError::new(
                EventType::ToolComplete,
                "error",
                "must be absent when success is true",
            ));
        }
        require_non_empty_opt(
            EventType::ToolComplete,
            "parentToolCallId",
            self.parent_tool_call_id.as_deref(),
        )?;
        require_non_empty_opt(
            EventType::ToolComplete,
            "parentAgentId",
            self.parent_agent_id.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPartialResultData {
    pub tool_id: String,
    pub partial_output: String,
}

impl Validate for ToolPartialResultData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::ToolPartialResult, "toolId", &self.tool_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStartData {
    pub agent_id: String,
    pub agent_type: String,
    pub task: String,
    /// Native id of the tool call (e.g. `Task`) that launched this sub-agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Validate for AgentStartData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::AgentStart, "agentId", &self.agent_id)?;
        require_non_empty(EventType::AgentStart, "agentType", &self.agent_type)?;
        require_non_empty_opt(EventType::AgentStart, "toolCallId", self.tool_call_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdateData {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_uses: Option<u32>,
}

impl Validate for AgentUpdateData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::AgentUpdate, "agentId", &self.agent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCompleteData {
    pub agent_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Validate for AgentCompleteData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::AgentComplete, "agentId", &self.agent_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl Validate for SessionStartData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        match &self.config {
            Some(config) if !config.is_object() => Err(ValidationError::new(
                EventType::SessionStart,
                "config",
                "must be an object",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdleData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validate for SessionIdleData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Validate for SessionErrorData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::SessionError, "error", &self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestedData {
    pub request_id: String,
    pub tool_name: String,
    pub question: String,
    pub options: Vec<PermissionOption>,
}

impl Validate for PermissionRequestedData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let ty = EventType::PermissionRequested;
        require_non_empty(ty, "requestId", &self.request_id)?;
        require_non_empty(ty, "toolName", &self.tool_name)?;
        if self.options.is_empty() {
            return Err(ValidationError::new(ty, "options", "must offer at least one choice"));
        }
        for option in &self.options {
            require_non_empty(ty, "options.value", &option.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageData {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Validate for UsageData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty_opt(EventType::Usage, "model", self.model.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepStartData {
    pub workflow_id: String,
    pub node_id: String,
    pub node_name: String,
}

impl Validate for WorkflowStepStartData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::WorkflowStepStart, "workflowId", &self.workflow_id)?;
        require_non_empty(EventType::WorkflowStepStart, "nodeId", &self.node_id)
    }
}

/// Terminal status of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepStatus {
    Completed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepCompleteData {
    pub workflow_id: String,
    pub node_id: String,
    pub node_name: String,
    pub status: WorkflowStepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Validate for WorkflowStepCompleteData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty(EventType::WorkflowStepComplete, "workflowId", &self.workflow_id)?;
        require_non_empty(EventType::WorkflowStepComplete, "nodeId", &self.node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// One entry of a workflow task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateData {
    pub tasks: Vec<TaskItem>,
}

impl Validate for TaskUpdateData {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        for task in &self.tasks {
            require_non_empty(EventType::WorkflowTaskUpdate, "tasks.title", &task.title)?;
            require_non_empty_opt(EventType::WorkflowTaskUpdate, "tasks.id", task.id.as_deref())?;
        }
        Ok(())
    }
}

/// Typed payload of a [`BusEvent`], keyed by its event-type tag.
///
/// Serializes adjacently tagged: `{"type": "<tag>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "stream.text.delta")]
    TextDelta(TextDeltaData),
    #[serde(rename = "stream.text.complete")]
    TextComplete(TextCompleteData),
    #[serde(rename = "stream.thinking.delta")]
    ThinkingDelta(ThinkingDeltaData),
    #[serde(rename = "stream.thinking.complete")]
    ThinkingComplete(ThinkingCompleteData),
    #[serde(rename = "stream.tool.start")]
    ToolStart(ToolStartData),
    #[serde(rename = "stream.tool.complete")]
    ToolComplete(ToolCompleteData),
    #[serde(rename = "stream.tool.partial_result")]
    ToolPartialResult(ToolPartialResultData),
    #[serde(rename = "stream.agent.start")]
    AgentStart(AgentStartData),
    #[serde(rename = "stream.agent.update")]
    AgentUpdate(AgentUpdateData),
    #[serde(rename = "stream.agent.complete")]
    AgentComplete(AgentCompleteData),
    #[serde(rename = "stream.session.start")]
    SessionStart(SessionStartData),
    #[serde(rename = "stream.session.idle")]
    SessionIdle(SessionIdleData),
    #[serde(rename = "stream.session.error")]
    SessionError(SessionErrorData),
    #[serde(rename = "stream.permission.requested")]
    PermissionRequested(PermissionRequestedData),
    #[serde(rename = "stream.usage")]
    Usage(UsageData),
    #[serde(rename = "workflow.step.start")]
    WorkflowStepStart(WorkflowStepStartData),
    #[serde(rename = "workflow.step.complete")]
    WorkflowStepComplete(WorkflowStepCompleteData),
    #[serde(rename = "workflow.task.update")]
    WorkflowTaskUpdate(TaskUpdateData),
}

impl EventPayload {
    /// Returns the type tag of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TextDelta(_) => EventType::TextDelta,
            EventPayload::TextComplete(_) => EventType::TextComplete,
            EventPayload::ThinkingDelta(_) => EventType::ThinkingDelta,
            EventPayload::ThinkingComplete(_) => EventType::ThinkingComplete,
            EventPayload::ToolStart(_) => EventType::ToolStart,
            EventPayload::ToolComplete(_) => EventType::ToolComplete,
            EventPayload::ToolPartialResult(_) => EventType::ToolPartialResult,
            EventPayload::AgentStart(_) => EventType::AgentStart,
            EventPayload::AgentUpdate(_) => EventType::AgentUpdate,
            EventPayload::AgentComplete(_) => EventType::AgentComplete,
            EventPayload::SessionStart(_) => EventType::SessionStart,
            EventPayload::SessionIdle(_) => EventType::SessionIdle,
            EventPayload::SessionError(_) => EventType::SessionError,
            EventPayload::PermissionRequested(_) => EventType::PermissionRequested,
            EventPayload::Usage(_) => EventType::Usage,
            EventPayload::WorkflowStepStart(_) => EventType::WorkflowStepStart,
            EventPayload::WorkflowStepComplete(_) => EventType::WorkflowStepComplete,
            EventPayload::WorkflowTaskUpdate(_) => EventType::WorkflowTaskUpdate,
        }
    }

    /// Decodes a raw `(type, data)` pair coming from an adapter or a log.
    ///
    /// Unknown tags and payloads that do not match the tag's shape are
    /// rejected; nothing is coerced.
    pub fn decode(type_tag: &str, data: Value) -> Result<Self> {
        EventType::from_str(type_tag)?;
        let envelope = serde_json::json!({ "type": type_tag, "data": data });
        serde_json::from_value(envelope).map_err(|source| Error::Decode {
            event_type: type_tag.to_string(),
            source,
        })
    }

    /// Returns the `data` half of the serialized payload.
    pub fn data_json(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

impl Validate for EventPayload {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            EventPayload::TextDelta(data) => data.validate(),
            EventPayload::TextComplete(data) => data.validate(),
            EventPayload::ThinkingDelta(data) => data.validate(),
            EventPayload::ThinkingComplete(data) => data.validate(),
            EventPayload::ToolStart(data) => data.validate(),
            EventPayload::ToolComplete(data) => data.validate(),
            EventPayload::ToolPartialResult(data) => data.validate(),
            EventPayload::AgentStart(data) => data.validate(),
            EventPayload::AgentUpdate(data) => data.validate(),
            EventPayload::AgentComplete(data) => data.validate(),
            EventPayload::SessionStart(data) => data.validate(),
            EventPayload::SessionIdle(data) => data.validate(),
            EventPayload::SessionError(data) => data.validate(),
            EventPayload::PermissionRequested(data) => data.validate(),
            EventPayload::Usage(data) => data.validate(),
            EventPayload::WorkflowStepStart(data) => data.validate(),
            EventPayload::WorkflowStepComplete(data) => data.validate(),
            EventPayload::WorkflowTaskUpdate(data) => data.validate(),
        }
    }
}

/// The canonical envelope carrying one normalized occurrence from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    /// Session the event belongs to.
    pub session_id: String,

    /// Per-session generation counter; newer runs supersede older ones.
    pub run_id: u64,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Typed payload; its variant is the event type.
    pub payload: EventPayload,
}

impl BusEvent {
    /// Creates an event stamped with the current wall-clock time.
    pub fn new(session_id: impl Into<String>, run_id: u64, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            run_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builds an event from a raw `(type, data)` pair.
    pub fn decode(
        session_id: impl Into<String>,
        run_id: u64,
        timestamp: i64,
        type_tag: &str,
        data: Value,
    ) -> Result<Self> {
        Ok(Self {
            session_id: session_id.into(),
            run_id,
            timestamp,
            payload: EventPayload::decode(type_tag, data)?,
        })
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

impl Validate for BusEvent {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let ty = self.event_type();
        require_non_empty(ty, "sessionId", &self.session_id)?;
        if self.run_id == 0 {
            return Err(ValidationError::new(ty, "runId", "must be at least 1"));
        }
        if self.timestamp < 0 {
            return Err(ValidationError::new(ty, "timestamp", "must not be negative"));
        }
        self.payload.validate()
    }
}

/// A [`BusEvent`] with correlation metadata attached.
///
/// Produced right before batching and dropped after the batch is consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedBusEvent {
    pub event: BusEvent,

    /// Stable key for the reasoning stream a thinking delta belongs to.
    pub thinking_source_key: Option<String>,

    /// Sub-agent the event is attributed to.
    pub parent_agent_id: Option<String>,

    /// True when the event's run has been superseded by a newer run.
    pub stale: bool,
}

impl From<BusEvent> for EnrichedBusEvent {
    fn from(event: BusEvent) -> Self {
        Self {
            event,
            thinking_source_key: None,
            parent_agent_id: None,
            stale: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_delta(delta: &str, message_id: &str) -> EventPayload {
        EventPayload::TextDelta(TextDeltaData {
            delta: delta.to_string(),
            message_id: message_id.to_string(),
            agent_id: None,
        })
    }

    #[test]
    fn test_event_type_tags_round_trip() {
        for ty in EventType::ALL {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
            assert_eq!(
                serde_json::to_value(ty).unwrap(),
                Value::String(ty.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = EventPayload::decode("stream.nope", json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownEventType(tag) if tag == "stream.nope"));
    }

    #[test]
    fn test_decode_text_delta() {
        let payload =
            EventPayload::decode("stream.text.delta", json!({"delta": "Hello", "messageId": "m1"}))
                .unwrap();
        assert_eq!(payload, text_delta("Hello", "m1"));
        assert_eq!(payload.event_type(), EventType::TextDelta);
    }

    #[test]
    fn test_decode_rejects_mismatched_shape() {
        // A tool.start payload under a text.delta tag must not be coerced.
        let err = EventPayload::decode(
            "stream.text.delta",
            json!({"toolId": "t1", "toolName": "bash"}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));

        let usage = json!({"inputTokens": "12", "outputTokens": 3});
        let err = EventPayload::decode("stream.usage", usage).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_data_json_strips_tag() {
        let data = text_delta("hi", "m1").data_json().unwrap();
        assert_eq!(data, json!({"delta": "hi", "messageId": "m1"}));
    }

    #[test]
    fn test_envelope_validation() {
        let ok = BusEvent::new("s1", 1, text_delta("x", "m1"));
        assert!(ok.validate().is_ok());

        let err = BusEvent::new("", 1, text_delta("x", "m1")).validate().unwrap_err();
        assert_eq!(err.field, "sessionId");

        let err = BusEvent::new("s1", 0, text_delta("x", "m1")).validate().unwrap_err();
        assert_eq!(err.field, "runId");

        let err = BusEvent::new("s1", 1, text_delta("x", "m1"))
            .with_timestamp(-5)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "timestamp");
    }

    #[test]
    fn test_payload_field_validation() {
        let err = BusEvent::new("s1", 1, text_delta("x", " ")).validate().unwrap_err();
        assert_eq!(err.event_type, EventType::TextDelta);
        assert_eq!(err.field, "messageId");

        let contradictory = EventPayload::ToolComplete(ToolCompleteData {
            tool_id: "t1".into(),
            tool_name: "bash".into(),
            tool_result: json!("ok"),
            success: true,
            error: Some("boom".into()),
            parent_tool_call_id: None,
            parent_agent_id: None,
        });
        assert_eq!(contradictory.validate().unwrap_err().field, "error");

        let no_options = EventPayload::PermissionRequested(PermissionRequestedData {
            request_id: "r1".into(),
            tool_name: "bash".into(),
            question: "Run it?".into(),
            options: vec![],
        });
        assert_eq!(no_options.validate().unwrap_err().field, "options");

        let empty_part = EventPayload::ThinkingDelta(ThinkingDeltaData {
            delta: "hmm".into(),
            source: ThinkingSource::PartId(String::new()),
            message_id: None,
            agent_id: None,
        });
        assert_eq!(empty_part.validate().unwrap_err().field, "source");
    }

    #[test]
    fn test_validation_error_message_names_type_and_field() {
        let err = ValidationError::new(EventType::ToolStart, "toolId", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid stream.tool.start event: field `toolId` must not be empty"
        );
    }

    #[test]
    fn test_thinking_source_serialization() {
        let source = ThinkingSource::ReasoningId("rs_1".into());
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({"kind": "reasoningId", "value": "rs_1"})
        );
        assert_eq!(ThinkingSource::Index(2).to_string(), "index:2");
    }
}
