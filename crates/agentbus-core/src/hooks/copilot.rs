//! Copilot session-event adapter.
//!
//! Copilot delivers session events as `{"type": "...", "data": {...}}`
//! notifications that cannot be vetoed. Permission prompts go through a
//! single permission handler whose decision is returned to Copilot.

use super::manager::HookManager;
use super::{bool_field, pick, str_field};
use agentbus_proto::hook::{
    MessageAfterHook, MessageBeforeHook, PermissionRequestHook, SessionEndHook, SessionErrorHook,
    SessionStartHook, SubagentEndHook, SubagentStartHook, ToolAfterHook, ToolBeforeHook,
    ToolErrorHook,
};
use agentbus_proto::{AgentType, HookContext, HookData, HookEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub const SESSION_START: &str = "session.start";
pub const SESSION_SHUTDOWN: &str = "session.shutdown";
pub const SESSION_ERROR: &str = "session.error";
pub const TOOL_EXECUTION_START: &str = "tool.execution_start";
pub const TOOL_EXECUTION_COMPLETE: &str = "tool.execution_complete";
pub const USER_MESSAGE: &str = "user.message";
pub const ASSISTANT_MESSAGE: &str = "assistant.message";
pub const SUBAGENT_STARTED: &str = "subagent.started";
pub const SUBAGENT_COMPLETED: &str = "subagent.completed";

/// Answer to a Copilot permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CopilotPermissionDecision {
    Approved,
    DeniedInteractivelyByUser {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Native event listener: receives the whole event object.
pub type CopilotEventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
/// Decides a Copilot permission request.
pub type CopilotPermissionHandler = Arc<dyn Fn(&Value) -> CopilotPermissionDecision + Send + Sync>;

/// A Copilot session accepting event listeners.
pub trait CopilotSessionEvents {
    fn session_id(&self) -> String;
    fn on(&mut self, event_type: &str, callback: CopilotEventCallback);
    fn set_permission_handler(&mut self, handler: CopilotPermissionHandler);
}

/// Native events needed to produce a unified one.
///
/// Tool completions carry no tool name or input, so they also need the
/// start event to recover them.
pub fn copilot_native_events(event: HookEvent) -> &'static [&'static str] {
    match event {
        HookEvent::SessionStart => &[SESSION_START],
        HookEvent::SessionEnd => &[SESSION_SHUTDOWN],
        HookEvent::SessionError => &[SESSION_ERROR],
        HookEvent::ToolBefore => &[TOOL_EXECUTION_START],
        HookEvent::ToolAfter | HookEvent::ToolError => {
            &[TOOL_EXECUTION_START, TOOL_EXECUTION_COMPLETE]
        }
        HookEvent::MessageBefore => &[USER_MESSAGE],
        HookEvent::MessageAfter => &[ASSISTANT_MESSAGE],
        HookEvent::PermissionRequest => &[],
        HookEvent::SubagentStart => &[SUBAGENT_STARTED],
        HookEvent::SubagentEnd => &[SUBAGENT_COMPLETED],
    }
}

/// Tool name and arguments by tool call id.
type ToolCalls = Arc<Mutex<HashMap<String, (String, Value)>>>;

impl HookManager {
    /// Installs one listener per native event needed by the registered
    /// handlers, plus the permission handler when permission hooks exist.
    /// Returns the number of native callbacks installed.
    pub fn apply_to_copilot_client<C>(&self, session: &mut C) -> usize
    where
        C: CopilotSessionEvents + ?Sized,
    {
        let registered = self.registered_events();
        let mut natives: Vec<&'static str> = Vec::new();
        for event in &registered {
            for native in copilot_native_events(*event) {
                if !natives.contains(native) {
                    natives.push(*native);
                }
            }
        }

        // Starts are only remembered when a completion listener will drain
        // them; shutdown drops whatever never completed.
        let tool_calls: Option<ToolCalls> =
            natives.contains(&TOOL_EXECUTION_COMPLETE).then(ToolCalls::default);
        if tool_calls.is_some() && !natives.contains(&SESSION_SHUTDOWN) {
            natives.push(SESSION_SHUTDOWN);
        }

        let session_id = session.session_id();
        for native in &natives {
            let native = *native;
            let manager = self.clone();
            let session_id = session_id.clone();
            let tool_calls = tool_calls.clone();
            session.on(
                native,
                Arc::new(move |event: &Value| {
                    let data = event.get("data").unwrap_or(event);
                    let Some(hook_data) = copilot_hook_data(native, data, tool_calls.as_ref())
                    else {
                        return;
                    };
                    let hook_event = hook_data.event();
                    let context =
                        HookContext::new(session_id.clone(), AgentType::Copilot, hook_data);
                    if !manager.emit(hook_event, context).should_continue() {
                        debug!(
                            event = %hook_event,
                            "Copilot event is observational; chain result ignored"
                        );
                    }
                }),
            );
        }

        let mut installed = natives.len();
        if registered.contains(&HookEvent::PermissionRequest) {
            let manager = self.clone();
            session.set_permission_handler(Arc::new(move |request: &Value| {
                let context = HookContext::new(
                    session_id.clone(),
                    AgentType::Copilot,
                    copilot_permission_data(request),
                );
                let result = manager.emit(HookEvent::PermissionRequest, context);
                if result.should_continue() {
                    CopilotPermissionDecision::Approved
                } else {
                    CopilotPermissionDecision::DeniedInteractivelyByUser {
                        reason: result.error,
                    }
                }
            }));
            installed += 1;
        }
        installed
    }
}

/// Translates the `data` of a native event.
///
/// With a tracker, tool starts are remembered so completions can be
/// reported with the tool's name and input.
fn copilot_hook_data(
    native: &str,
    data: &Value,
    tool_calls: Option<&ToolCalls>,
) -> Option<HookData> {
    let hook = match native {
        SESSION_START => HookData::SessionStart(SessionStartHook {
            cwd: data.pointer("/context/cwd").and_then(Value::as_str).map(str::to_string),
            extra: pick(data, &["copilotVersion", "selectedModel"]),
            ..SessionStartHook::default()
        }),
        SESSION_SHUTDOWN => {
            if let Some(tool_calls) = tool_calls {
                tool_calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
            }
            HookData::SessionEnd(SessionEndHook {
                reason: str_field(data, "shutdownType"),
                ..SessionEndHook::default()
            })
        }
        SESSION_ERROR => HookData::SessionError(SessionErrorHook {
            error: str_field(data, "message").unwrap_or_else(|| "unknown error".to_string()),
            code: str_field(data, "errorType"),
            ..SessionErrorHook::default()
        }),
        TOOL_EXECUTION_START => {
            let call_id = str_field(data, "toolCallId")?;
            let tool_name = str_field(data, "toolName").unwrap_or_default();
            let tool_input = data.get("arguments").cloned().unwrap_or(Value::Null);
            if let Some(tool_calls) = tool_calls {
                tool_calls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(call_id.clone(), (tool_name.clone(), tool_input.clone()));
            }
            HookData::ToolBefore(ToolBeforeHook {
                tool_name,
                tool_input,
                tool_use_id: Some(call_id),
                ..ToolBeforeHook::default()
            })
        }
        TOOL_EXECUTION_COMPLETE => {
            let call_id = str_field(data, "toolCallId")?;
            let (tool_name, tool_input) = tool_calls
                .and_then(|calls| {
                    calls.lock().unwrap_or_else(PoisonError::into_inner).remove(&call_id)
                })
                .unwrap_or_default();
            if bool_field(data, "success").unwrap_or(false) {
                HookData::ToolAfter(ToolAfterHook {
                    tool_name,
                    tool_input,
                    tool_result: data
                        .pointer("/result/content")
                        .cloned()
                        .unwrap_or(Value::Null),
                    tool_use_id: Some(call_id),
                    ..ToolAfterHook::default()
                })
            } else {
                HookData::ToolError(ToolErrorHook {
                    tool_name,
                    tool_input,
                    error: data
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("tool failed")
                        .to_string(),
                    tool_use_id: Some(call_id),
                    ..ToolErrorHook::default()
                })
            }
        }
        USER_MESSAGE => HookData::MessageBefore(MessageBeforeHook {
            content: str_field(data, "content").unwrap_or_default(),
            ..MessageBeforeHook::default()
        }),
        ASSISTANT_MESSAGE => HookData::MessageAfter(MessageAfterHook {
            content: str_field(data, "content"),
            message_id: str_field(data, "messageId"),
            ..MessageAfterHook::default()
        }),
        SUBAGENT_STARTED => HookData::SubagentStart(SubagentStartHook {
            agent_id: str_field(data, "toolCallId")?,
            agent_type: str_field(data, "agentName"),
            ..SubagentStartHook::default()
        }),
        SUBAGENT_COMPLETED => HookData::SubagentEnd(SubagentEndHook {
            agent_id: str_field(data, "toolCallId")?,
            success: Some(true),
            ..SubagentEndHook::default()
        }),
        _ => return None,
    };
    Some(hook)
}

fn copilot_permission_data(request: &Value) -> HookData {
    HookData::PermissionRequest(PermissionRequestHook {
        tool_name: str_field(request, "kind").unwrap_or_default(),
        tool_input: request.clone(),
        request_id: str_field(request, "toolCallId"),
        ..PermissionRequestHook::default()
    })
}
