//! Claude hook callbacks.
//!
//! Claude invokes registered hooks synchronously with a snake_case JSON
//! input and acts on the returned output, so a hook chain can block a tool
//! call or rewrite its input.

use super::manager::HookManager;
use super::{bool_field, pick, str_field};
use agentbus_proto::hook::{
    MessageAfterHook, MessageBeforeHook, PermissionRequestHook, SessionEndHook, SessionErrorHook,
    SessionStartHook, SubagentEndHook, SubagentStartHook, ToolAfterHook, ToolBeforeHook,
    ToolErrorHook,
};
use agentbus_proto::{AgentType, HookContext, HookData, HookEvent, HookResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Native Claude hook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaudeHookEvent {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    UserPromptSubmit,
    Stop,
    PermissionRequest,
    SubagentStart,
    SubagentStop,
}

impl ClaudeHookEvent {
    /// Native event for a unified one. Claude has no session error hook.
    pub fn from_unified(event: HookEvent) -> Option<Self> {
        match event {
            HookEvent::SessionStart => Some(Self::SessionStart),
            HookEvent::SessionEnd => Some(Self::SessionEnd),
            HookEvent::SessionError => None,
            HookEvent::ToolBefore => Some(Self::PreToolUse),
            HookEvent::ToolAfter => Some(Self::PostToolUse),
            HookEvent::ToolError => Some(Self::PostToolUseFailure),
            HookEvent::MessageBefore => Some(Self::UserPromptSubmit),
            HookEvent::MessageAfter => Some(Self::Stop),
            HookEvent::PermissionRequest => Some(Self::PermissionRequest),
            HookEvent::SubagentStart => Some(Self::SubagentStart),
            HookEvent::SubagentEnd => Some(Self::SubagentStop),
        }
    }

    /// Events whose output can block the pending action.
    fn is_gate(self) -> bool {
        matches!(
            self,
            Self::PreToolUse | Self::PermissionRequest | Self::UserPromptSubmit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeDecision {
    Approve,
    Block,
}

/// Output returned to Claude from a hook callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeHookOutput {
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ClaudeDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
}

impl Default for ClaudeHookOutput {
    fn default() -> Self {
        Self {
            proceed: true,
            stop_reason: None,
            decision: None,
            reason: None,
            hook_specific_output: None,
        }
    }
}

/// Native hook callback: receives the hook input JSON.
pub type ClaudeHookCallback = Arc<dyn Fn(&Value) -> ClaudeHookOutput + Send + Sync>;

/// A Claude client that accepts hook callbacks.
pub trait ClaudeHookRegistry {
    fn register_hook(&mut self, event: ClaudeHookEvent, callback: ClaudeHookCallback);
}

impl HookManager {
    /// Installs one native callback per unified event that has handlers.
    ///
    /// Returns the number of callbacks installed. Handlers added to events
    /// that had none at apply time are not picked up.
    pub fn apply_to_claude_client<C>(&self, client: &mut C) -> usize
    where
        C: ClaudeHookRegistry + ?Sized,
    {
        let mut installed = 0;
        for event in self.registered_events() {
            let Some(native) = ClaudeHookEvent::from_unified(event) else {
                debug!(%event, "Claude has no native equivalent for hook");
                continue;
            };
            let manager = self.clone();
            client.register_hook(
                native,
                Arc::new(move |input: &Value| {
                    let session_id = str_field(input, "session_id").unwrap_or_default();
                    let data = claude_hook_data(event, input);
                    let context = HookContext::new(session_id, AgentType::Claude, data);
                    let result = manager.emit(event, context);
                    claude_output(native, &result)
                }),
            );
            installed += 1;
        }
        installed
    }
}

/// Translates a native hook input into the unified shape.
pub fn claude_hook_data(event: HookEvent, input: &Value) -> HookData {
    let tool_name = || str_field(input, "tool_name").unwrap_or_default();
    let tool_input = || input.get("tool_input").cloned().unwrap_or(Value::Null);
    let tool_use_id = || str_field(input, "tool_use_id");

    match event {
        HookEvent::SessionStart => HookData::SessionStart(SessionStartHook {
            source: str_field(input, "source"),
            cwd: str_field(input, "cwd"),
            extra: pick(input, &["transcript_path", "model"]),
        }),
        HookEvent::SessionEnd => HookData::SessionEnd(SessionEndHook {
            reason: str_field(input, "reason"),
            ..SessionEndHook::default()
        }),
        HookEvent::SessionError => HookData::SessionError(SessionErrorHook {
            error: str_field(input, "error").unwrap_or_default(),
            ..SessionErrorHook::default()
        }),
        HookEvent::ToolBefore => HookData::ToolBefore(ToolBeforeHook {
            tool_name: tool_name(),
            tool_input: tool_input(),
            tool_use_id: tool_use_id(),
            ..ToolBeforeHook::default()
        }),
        HookEvent::ToolAfter => HookData::ToolAfter(ToolAfterHook {
            tool_name: tool_name(),
            tool_input: tool_input(),
            tool_result: input.get("tool_response").cloned().unwrap_or(Value::Null),
            tool_use_id: tool_use_id(),
            ..ToolAfterHook::default()
        }),
        HookEvent::ToolError => HookData::ToolError(ToolErrorHook {
            tool_name: tool_name(),
            tool_input: tool_input(),
            error: str_field(input, "error").unwrap_or_default(),
            tool_use_id: tool_use_id(),
            ..ToolErrorHook::default()
        }),
        HookEvent::MessageBefore => HookData::MessageBefore(MessageBeforeHook {
            content: str_field(input, "prompt").unwrap_or_default(),
            ..MessageBeforeHook::default()
        }),
        HookEvent::MessageAfter => HookData::MessageAfter(MessageAfterHook {
            extra: pick(input, &["stop_hook_active"]),
            ..MessageAfterHook::default()
        }),
        HookEvent::PermissionRequest => HookData::PermissionRequest(PermissionRequestHook {
            tool_name: tool_name(),
            tool_input: tool_input(),
            request_id: tool_use_id(),
            extra: pick(input, &["permission_suggestions"]),
        }),
        HookEvent::SubagentStart => HookData::SubagentStart(SubagentStartHook {
            agent_id: str_field(input, "agent_id").unwrap_or_default(),
            agent_type: str_field(input, "agent_type"),
            ..SubagentStartHook::default()
        }),
        HookEvent::SubagentEnd => HookData::SubagentEnd(SubagentEndHook {
            agent_id: str_field(input, "agent_id").unwrap_or_default(),
            success: bool_field(input, "success"),
            ..SubagentEndHook::default()
        }),
    }
}

/// Translates a chain result into Claude's hook output.
///
/// For gating events a denied chain blocks the pending action; for the rest
/// it stops the agent.
pub fn claude_output(event: ClaudeHookEvent, result: &HookResult) -> ClaudeHookOutput {
    let mut output = ClaudeHookOutput::default();

    if !result.should_continue() {
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "Blocked by hook".to_string());
        if event.is_gate() {
            output.decision = Some(ClaudeDecision::Block);
            output.reason = Some(reason.clone());
            if event == ClaudeHookEvent::PreToolUse {
                output.hook_specific_output = Some(json!({
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": reason,
                }));
            }
        } else {
            output.proceed = false;
            output.stop_reason = Some(reason);
        }
        return output;
    }

    if event == ClaudeHookEvent::PreToolUse {
        if let Some(tool_input) = result
            .modified_data
            .as_ref()
            .and_then(|data| data.get("toolInput"))
        {
            output.hook_specific_output = Some(json!({
                "hookEventName": "PreToolUse",
                "updatedInput": tool_input,
            }));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeClaude {
        hooks: HashMap<ClaudeHookEvent, Vec<ClaudeHookCallback>>,
    }

    impl ClaudeHookRegistry for FakeClaude {
        fn register_hook(&mut self, event: ClaudeHookEvent, callback: ClaudeHookCallback) {
            self.hooks.entry(event).or_default().push(callback);
        }
    }

    impl FakeClaude {
        fn fire(&self, event: ClaudeHookEvent, input: &Value) -> ClaudeHookOutput {
            self.hooks[&event][0](input)
        }
    }

    fn pre_tool_use() -> Value {
        json!({
            "session_id": "claude-1",
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "rm -rf /"},
            "tool_use_id": "toolu_1"
        })
    }

    #[test]
    fn test_installs_only_events_with_handlers() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::proceed()));
        manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::proceed()));
        manager.on(HookEvent::SessionError, |_| Ok(HookResult::proceed()));

        let mut client = FakeClaude::default();
        assert_eq!(manager.apply_to_claude_client(&mut client), 1);
        assert_eq!(client.hooks.len(), 1);
        assert_eq!(client.hooks[&ClaudeHookEvent::PreToolUse].len(), 1);
    }

    #[test]
    fn test_denied_tool_is_blocked() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |ctx| {
            let command = ctx.data.get("toolInput").unwrap_or_default();
            if command["command"].as_str().is_some_and(|c| c.contains("rm -rf")) {
                Ok(HookResult::failed("destructive command"))
            } else {
                Ok(HookResult::proceed())
            }
        });

        let mut client = FakeClaude::default();
        manager.apply_to_claude_client(&mut client);
        let output = client.fire(ClaudeHookEvent::PreToolUse, &pre_tool_use());

        assert!(output.proceed);
        assert_eq!(output.decision, Some(ClaudeDecision::Block));
        assert_eq!(output.reason.as_deref(), Some("destructive command"));
        assert_eq!(
            output.hook_specific_output.unwrap()["permissionDecision"],
            json!("deny")
        );
    }

    #[test]
    fn test_context_built_from_native_input() {
        let manager = HookManager::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = Arc::clone(&seen);
        manager.on(HookEvent::ToolBefore, move |ctx| {
            *s.lock().unwrap() = Some(ctx.clone());
            Ok(HookResult::proceed())
        });

        let mut client = FakeClaude::default();
        manager.apply_to_claude_client(&mut client);
        let output = client.fire(ClaudeHookEvent::PreToolUse, &pre_tool_use());
        assert_eq!(output, ClaudeHookOutput::default());

        let ctx = seen.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.session_id, "claude-1");
        assert_eq!(ctx.agent_type, AgentType::Claude);
        assert_eq!(ctx.data.get("toolName"), Some(json!("Bash")));
        assert_eq!(ctx.data.get("toolUseId"), Some(json!("toolu_1")));
    }

    #[test]
    fn test_updated_input_forwarded() {
        let mut patch = Map::new();
        patch.insert("toolInput".to_string(), json!({"command": "ls"}));
        let result = HookResult {
            proceed: Some(true),
            modified_data: Some(patch),
            error: None,
        };
        let output = claude_output(ClaudeHookEvent::PreToolUse, &result);
        assert_eq!(
            output.hook_specific_output.unwrap()["updatedInput"],
            json!({"command": "ls"})
        );
    }

    #[test]
    fn test_halt_on_non_gate_stops_agent() {
        let output = claude_output(ClaudeHookEvent::Stop, &HookResult::halt());
        assert!(!output.proceed);
        assert_eq!(output.stop_reason.as_deref(), Some("Blocked by hook"));
        assert_eq!(output.decision, None);

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["continue"], json!(false));
        assert_eq!(json["stopReason"], json!("Blocked by hook"));
    }

    #[test]
    fn test_session_error_has_no_native_event() {
        assert_eq!(ClaudeHookEvent::from_unified(HookEvent::SessionError), None);
        assert_eq!(
            ClaudeHookEvent::from_unified(HookEvent::MessageAfter),
            Some(ClaudeHookEvent::Stop)
        );
    }
}
