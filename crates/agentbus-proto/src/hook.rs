//! Unified hook vocabulary.
//!
//! Backends expose lifecycle callbacks in incompatible shapes. These types are
//! the one semantic set every backend is translated into, so behavior can be
//! attached without knowing which backend is running.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Backend that produced a hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    OpenCode,
    Copilot,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentType::Claude => "claude",
            AgentType::OpenCode => "opencode",
            AgentType::Copilot => "copilot",
        })
    }
}

/// The unified hook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "session.error")]
    SessionError,
    #[serde(rename = "tool.before")]
    ToolBefore,
    #[serde(rename = "tool.after")]
    ToolAfter,
    #[serde(rename = "tool.error")]
    ToolError,
    #[serde(rename = "message.before")]
    MessageBefore,
    #[serde(rename = "message.after")]
    MessageAfter,
    #[serde(rename = "permission.request")]
    PermissionRequest,
    #[serde(rename = "subagent.start")]
    SubagentStart,
    #[serde(rename = "subagent.end")]
    SubagentEnd,
}

impl HookEvent {
    pub const ALL: [HookEvent; 11] = [
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::SessionError,
        HookEvent::ToolBefore,
        HookEvent::ToolAfter,
        HookEvent::ToolError,
        HookEvent::MessageBefore,
        HookEvent::MessageAfter,
        HookEvent::PermissionRequest,
        HookEvent::SubagentStart,
        HookEvent::SubagentEnd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::SessionStart => "session.start",
            HookEvent::SessionEnd => "session.end",
            HookEvent::SessionError => "session.error",
            HookEvent::ToolBefore => "tool.before",
            HookEvent::ToolAfter => "tool.after",
            HookEvent::ToolError => "tool.error",
            HookEvent::MessageBefore => "message.before",
            HookEvent::MessageAfter => "message.after",
            HookEvent::PermissionRequest => "permission.request",
            HookEvent::SubagentStart => "subagent.start",
            HookEvent::SubagentEnd => "subagent.end",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| Error::UnknownHookEvent(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartHook {
    /// How the session began (`startup`, `resume`, ...), when the backend says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndHook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorHook {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBeforeHook {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAfterHook {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolErrorHook {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBeforeHook {
    /// User prompt about to be sent.
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAfterHook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestHook {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentStartHook {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentEndHook {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event-specific hook payload; one shape per [`HookEvent`].
///
/// Unknown keys are kept in each shape's `extra` map, so a handler can pass
/// data the unified shape does not name down the chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HookData {
    SessionStart(SessionStartHook),
    SessionEnd(SessionEndHook),
    SessionError(SessionErrorHook),
    ToolBefore(ToolBeforeHook),
    ToolAfter(ToolAfterHook),
    ToolError(ToolErrorHook),
    MessageBefore(MessageBeforeHook),
    MessageAfter(MessageAfterHook),
    PermissionRequest(PermissionRequestHook),
    SubagentStart(SubagentStartHook),
    SubagentEnd(SubagentEndHook),
}

impl HookData {
    /// The hook event this shape belongs to.
    pub fn event(&self) -> HookEvent {
        match self {
            HookData::SessionStart(_) => HookEvent::SessionStart,
            HookData::SessionEnd(_) => HookEvent::SessionEnd,
            HookData::SessionError(_) => HookEvent::SessionError,
            HookData::ToolBefore(_) => HookEvent::ToolBefore,
            HookData::ToolAfter(_) => HookEvent::ToolAfter,
            HookData::ToolError(_) => HookEvent::ToolError,
            HookData::MessageBefore(_) => HookEvent::MessageBefore,
            HookData::MessageAfter(_) => HookEvent::MessageAfter,
            HookData::PermissionRequest(_) => HookEvent::PermissionRequest,
            HookData::SubagentStart(_) => HookEvent::SubagentStart,
            HookData::SubagentEnd(_) => HookEvent::SubagentEnd,
        }
    }

    /// Serializes the shape into a flat JSON object.
    pub fn to_object(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(source) => Err(self.shape_error(source)),
        }
    }

    /// Rebuilds the shape for `event` from a flat JSON object.
    pub fn from_object(event: HookEvent, object: Map<String, Value>) -> Result<Self> {
        fn parse<T: serde::de::DeserializeOwned>(
            event: HookEvent,
            object: Map<String, Value>,
        ) -> Result<T> {
            serde_json::from_value(Value::Object(object)).map_err(|source| Error::HookData {
                event: event.to_string(),
                source,
            })
        }

        Ok(match event {
            HookEvent::SessionStart => HookData::SessionStart(parse(event, object)?),
            HookEvent::SessionEnd => HookData::SessionEnd(parse(event, object)?),
            HookEvent::SessionError => HookData::SessionError(parse(event, object)?),
            HookEvent::ToolBefore => HookData::ToolBefore(parse(event, object)?),
            HookEvent::ToolAfter => HookData::ToolAfter(parse(event, object)?),
            HookEvent::ToolError => HookData::ToolError(parse(event, object)?),
            HookEvent::MessageBefore => HookData::MessageBefore(parse(event, object)?),
            HookEvent::MessageAfter => HookData::MessageAfter(parse(event, object)?),
            HookEvent::PermissionRequest => HookData::PermissionRequest(parse(event, object)?),
            HookEvent::SubagentStart => HookData::SubagentStart(parse(event, object)?),
            HookEvent::SubagentEnd => HookData::SubagentEnd(parse(event, object)?),
        })
    }

    /// Shallow-merges `patch` into this shape.
    ///
    /// Top-level keys in `patch` replace existing keys. On error the data is
    /// left unchanged.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<()> {
        let mut object = self.to_object()?;
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
        *self = HookData::from_object(self.event(), object)?;
        Ok(())
    }

    /// Looks up a top-level key by its camelCase name.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_object().ok()?.remove(key)
    }

    fn shape_error(&self, source: serde_json::Error) -> Error {
        Error::HookData {
            event: self.event().to_string(),
            source,
        }
    }
}

/// Input to one hook handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    pub session_id: String,
    pub agent_type: AgentType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: HookData,
}

impl HookContext {
    /// Creates a context stamped with the current time.
    pub fn new(session_id: impl Into<String>, agent_type: AgentType, data: HookData) -> Self {
        Self {
            session_id: session_id.into(),
            agent_type,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn event(&self) -> HookEvent {
        self.data.event()
    }
}

/// Outcome of a hook handler, or of a whole hook chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    /// `Some(false)` stops the chain; absent means "no opinion".
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub proceed: Option<bool>,

    /// Partial data merged into the context seen by later handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HookResult {
    /// `{continue: true}`.
    pub fn proceed() -> Self {
        Self {
            proceed: Some(true),
            ..Self::default()
        }
    }

    /// `{continue: false}` without an error.
    pub fn halt() -> Self {
        Self {
            proceed: Some(false),
            ..Self::default()
        }
    }

    /// Terminal failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            proceed: Some(false),
            modified_data: None,
            error: Some(error.into()),
        }
    }

    /// Result that only modifies data.
    pub fn modify(data: Map<String, Value>) -> Self {
        Self {
            modified_data: Some(data),
            ..Self::default()
        }
    }

    /// True unless the chain was denied or failed.
    pub fn should_continue(&self) -> bool {
        self.proceed != Some(false) && self.error.is_none()
    }
}
