//! OpenCode event-stream adapter.
//!
//! OpenCode reports lifecycle changes as server-sent events of the form
//! `{"type": "...", "properties": {...}}`. Most are observational; only
//! permission prompts are answered, through the client's responder.
//! Several unified events share one native event, and OpenCode re-sends
//! updates for the same part or message, so each unified occurrence is
//! emitted at most once.

use super::manager::HookManager;
use super::{pick, str_field};
use agentbus_proto::hook::{
    MessageAfterHook, MessageBeforeHook, PermissionRequestHook, SessionEndHook, SessionErrorHook,
    SessionStartHook, ToolAfterHook, ToolBeforeHook, ToolErrorHook,
};
use agentbus_proto::{AgentType, HookContext, HookData, HookEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_DELETED: &str = "session.deleted";
pub const SESSION_ERROR: &str = "session.error";
pub const MESSAGE_UPDATED: &str = "message.updated";
pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";
pub const PERMISSION_UPDATED: &str = "permission.updated";

/// Finished occurrences remembered for dropping re-sent updates.
const FINISHED_WINDOW: usize = 256;

/// Reply to an OpenCode permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionReply {
    Once,
    Always,
    Reject,
}

/// Native event callback: receives the whole event object.
pub type OpenCodeEventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Sends replies to OpenCode permission prompts.
pub trait OpenCodePermissionResponder: Send + Sync {
    fn respond(&self, session_id: &str, permission_id: &str, reply: PermissionReply);
}

/// An OpenCode client exposing its event stream.
pub trait OpenCodeEventSource {
    fn subscribe(&mut self, event_type: &str, callback: OpenCodeEventCallback);

    /// Handle used to answer permission prompts from inside callbacks.
    fn permission_responder(&self) -> Arc<dyn OpenCodePermissionResponder>;
}

/// Native event carrying a unified one. OpenCode has no sub-agent events.
pub fn opencode_native_event(event: HookEvent) -> Option<&'static str> {
    match event {
        HookEvent::SessionStart => Some(SESSION_CREATED),
        HookEvent::SessionEnd => Some(SESSION_DELETED),
        HookEvent::SessionError => Some(SESSION_ERROR),
        HookEvent::ToolBefore | HookEvent::ToolAfter | HookEvent::ToolError => {
            Some(MESSAGE_PART_UPDATED)
        }
        HookEvent::MessageBefore | HookEvent::MessageAfter => Some(MESSAGE_UPDATED),
        HookEvent::PermissionRequest => Some(PERMISSION_UPDATED),
        HookEvent::SubagentStart | HookEvent::SubagentEnd => None,
    }
}

/// A native event translated into a unified one.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCodeHook {
    pub event: HookEvent,
    pub session_id: String,
    pub data: HookData,
    /// Identity used to emit repeated updates only once.
    pub once_key: Option<String>,
}

/// Once-keys already emitted.
///
/// A running tool's key stays live until the tool completes or fails.
/// Finished occurrences only stay in a bounded window, and a deleted
/// session drops everything it left behind.
#[derive(Debug, Default)]
struct EmittedKeys {
    live: HashMap<String, HashSet<String>>,
    finished: VecDeque<(String, String)>,
}

impl EmittedKeys {
    /// Returns whether `hook` is a new occurrence that should be emitted.
    fn admit(&mut self, hook: &OpenCodeHook) -> bool {
        if hook.event == HookEvent::SessionEnd {
            self.drop_session(&hook.session_id);
            return true;
        }
        let Some(key) = &hook.once_key else {
            return true;
        };
        let session_id = &hook.session_id;
        if self.finished.iter().any(|(s, k)| s == session_id && k == key) {
            return false;
        }
        if hook.event == HookEvent::ToolBefore {
            return self
                .live
                .entry(session_id.clone())
                .or_default()
                .insert(key.clone());
        }

        // `tool:<call>:completed` retires every `tool:<call>:*` key.
        if let (Some(keys), Some((identity, _))) =
            (self.live.get_mut(session_id), key.rsplit_once(':'))
        {
            keys.retain(|live| live.rsplit_once(':').map(|(id, _)| id) != Some(identity));
            if keys.is_empty() {
                self.live.remove(session_id);
            }
        }
        if self.finished.len() == FINISHED_WINDOW {
            self.finished.pop_front();
        }
        self.finished.push_back((session_id.clone(), key.clone()));
        true
    }

    fn drop_session(&mut self, session_id: &str) {
        self.live.remove(session_id);
        self.finished.retain(|(s, _)| s != session_id);
    }

    #[cfg(test)]
    fn live_len(&self) -> usize {
        self.live.values().map(HashSet::len).sum()
    }
}

impl HookManager {
    /// Subscribes one callback per native event needed by the registered
    /// handlers, plus `session.deleted` to forget a finished session's
    /// state. Returns the number of subscriptions.
    pub fn apply_to_opencode_client<C>(&self, client: &mut C) -> usize
    where
        C: OpenCodeEventSource + ?Sized,
    {
        let mut natives: Vec<&'static str> = Vec::new();
        for event in self.registered_events() {
            match opencode_native_event(event) {
                Some(native) if !natives.contains(&native) => natives.push(native),
                Some(_) => {}
                None => debug!(%event, "OpenCode has no native equivalent for hook"),
            }
        }

        let keyed = [MESSAGE_PART_UPDATED, MESSAGE_UPDATED, PERMISSION_UPDATED];
        if natives.iter().any(|native| keyed.contains(native))
            && !natives.contains(&SESSION_DELETED)
        {
            natives.push(SESSION_DELETED);
        }

        let responder = natives
            .contains(&PERMISSION_UPDATED)
            .then(|| client.permission_responder());
        let emitted: Arc<Mutex<EmittedKeys>> = Arc::default();

        for native in &natives {
            let native = *native;
            let manager = self.clone();
            let responder = responder.clone();
            let emitted = Arc::clone(&emitted);
            client.subscribe(
                native,
                Arc::new(move |event: &Value| {
                    let properties = event.get("properties").unwrap_or(event);
                    let Some(hook) = opencode_hook(native, properties) else {
                        return;
                    };
                    if !emitted.lock().unwrap_or_else(PoisonError::into_inner).admit(&hook) {
                        return;
                    }

                    let permission_id = hook.data.get("requestId");
                    let session_id = hook.session_id.clone();
                    let context = HookContext::new(hook.session_id, AgentType::OpenCode, hook.data);
                    let result = manager.emit(hook.event, context);

                    if hook.event != HookEvent::PermissionRequest {
                        if !result.should_continue() {
                            debug!(
                                event = %hook.event,
                                "OpenCode event is observational; chain result ignored"
                            );
                        }
                        return;
                    }
                    let (Some(responder), Some(Value::String(permission_id))) =
                        (&responder, permission_id)
                    else {
                        warn!("Cannot answer OpenCode permission prompt without an id");
                        return;
                    };
                    let reply = if result.should_continue() {
                        PermissionReply::Once
                    } else {
                        PermissionReply::Reject
                    };
                    responder.respond(&session_id, &permission_id, reply);
                }),
            );
        }
        natives.len()
    }
}

/// Translates the `properties` of a native event.
///
/// Returns `None` for updates that carry no unified occurrence, such as
/// non-tool parts or pending tool calls.
pub fn opencode_hook(native: &str, properties: &Value) -> Option<OpenCodeHook> {
    match native {
        SESSION_CREATED | SESSION_DELETED => {
            let info = properties.get("info")?;
            let session_id = str_field(info, "id")?;
            let data = if native == SESSION_CREATED {
                HookData::SessionStart(SessionStartHook {
                    cwd: str_field(info, "directory"),
                    extra: pick(info, &["title", "parentID"]),
                    ..SessionStartHook::default()
                })
            } else {
                HookData::SessionEnd(SessionEndHook {
                    reason: Some("deleted".to_string()),
                    ..SessionEndHook::default()
                })
            };
            Some(OpenCodeHook {
                event: data.event(),
                session_id,
                data,
                once_key: None,
            })
        }
        SESSION_ERROR => {
            let error = properties.get("error");
            let message = error
                .and_then(|e| e.pointer("/data/message"))
                .and_then(Value::as_str)
                .or_else(|| error.and_then(|e| e.get("name")).and_then(Value::as_str))
                .unwrap_or("unknown error");
            Some(OpenCodeHook {
                event: HookEvent::SessionError,
                session_id: str_field(properties, "sessionID").unwrap_or_default(),
                data: HookData::SessionError(SessionErrorHook {
                    error: message.to_string(),
                    code: error.and_then(|e| str_field(e, "name")),
                    ..SessionErrorHook::default()
                }),
                once_key: None,
            })
        }
        MESSAGE_PART_UPDATED => tool_part_hook(properties.get("part")?),
        MESSAGE_UPDATED => message_hook(properties.get("info")?),
        PERMISSION_UPDATED => {
            let request_id = str_field(properties, "id")?;
            Some(OpenCodeHook {
                event: HookEvent::PermissionRequest,
                session_id: str_field(properties, "sessionID").unwrap_or_default(),
                data: HookData::PermissionRequest(PermissionRequestHook {
                    tool_name: str_field(properties, "type").unwrap_or_default(),
                    tool_input: properties.get("metadata").cloned().unwrap_or(Value::Null),
                    request_id: Some(request_id.clone()),
                    extra: pick(properties, &["title", "pattern", "callID"]),
                }),
                once_key: Some(format!("permission:{request_id}")),
            })
        }
        _ => None,
    }
}

fn tool_part_hook(part: &Value) -> Option<OpenCodeHook> {
    if part.get("type").and_then(Value::as_str) != Some("tool") {
        return None;
    }
    let call_id = str_field(part, "callID")?;
    let tool_name = str_field(part, "tool").unwrap_or_default();
    let state = part.get("state")?;
    let tool_input = state.get("input").cloned().unwrap_or(Value::Null);
    let status = state.get("status").and_then(Value::as_str)?;

    let data = match status {
        "running" => HookData::ToolBefore(ToolBeforeHook {
            tool_name,
            tool_input,
            tool_use_id: Some(call_id.clone()),
            ..ToolBeforeHook::default()
        }),
        "completed" => HookData::ToolAfter(ToolAfterHook {
            tool_name,
            tool_input,
            tool_result: state.get("output").cloned().unwrap_or(Value::Null),
            tool_use_id: Some(call_id.clone()),
            ..ToolAfterHook::default()
        }),
        "error" => HookData::ToolError(ToolErrorHook {
            tool_name,
            tool_input,
            error: str_field(state, "error").unwrap_or_else(|| "tool failed".to_string()),
            tool_use_id: Some(call_id.clone()),
            ..ToolErrorHook::default()
        }),
        _ => return None,
    };
    Some(OpenCodeHook {
        event: data.event(),
        session_id: str_field(part, "sessionID").unwrap_or_default(),
        once_key: Some(format!("tool:{call_id}:{status}")),
        data,
    })
}

fn message_hook(info: &Value) -> Option<OpenCodeHook> {
    let message_id = str_field(info, "id")?;
    let session_id = str_field(info, "sessionID").unwrap_or_default();
    match info.get("role").and_then(Value::as_str)? {
        "user" => Some(OpenCodeHook {
            event: HookEvent::MessageBefore,
            session_id,
            data: HookData::MessageBefore(MessageBeforeHook {
                extra: pick(info, &["id"]),
                ..MessageBeforeHook::default()
            }),
            once_key: Some(format!("message:{message_id}:before")),
        }),
        "assistant" if info.pointer("/time/completed").is_some_and(|t| !t.is_null()) => {
            Some(OpenCodeHook {
                event: HookEvent::MessageAfter,
                session_id,
                data: HookData::MessageAfter(MessageAfterHook {
                    message_id: Some(message_id.clone()),
                    ..MessageAfterHook::default()
                }),
                once_key: Some(format!("message:{message_id}:after")),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_proto::HookResult;
    use serde_json::json;

    #[derive(Default)]
    struct Replies(Mutex<Vec<(String, String, PermissionReply)>>);

    impl OpenCodePermissionResponder for Replies {
        fn respond(&self, session_id: &str, permission_id: &str, reply: PermissionReply) {
            self.0.lock().unwrap().push((
                session_id.to_string(),
                permission_id.to_string(),
                reply,
            ));
        }
    }

    #[derive(Default)]
    struct FakeOpenCode {
        subscriptions: HashMap<String, Vec<OpenCodeEventCallback>>,
        replies: Arc<Replies>,
    }

    impl OpenCodeEventSource for FakeOpenCode {
        fn subscribe(&mut self, event_type: &str, callback: OpenCodeEventCallback) {
            self.subscriptions
                .entry(event_type.to_string())
                .or_default()
                .push(callback);
        }

        fn permission_responder(&self) -> Arc<dyn OpenCodePermissionResponder> {
            self.replies.clone()
        }
    }

    impl FakeOpenCode {
        fn send(&self, event: &Value) {
            let event_type = event["type"].as_str().unwrap();
            for callback in self.subscriptions.get(event_type).into_iter().flatten() {
                callback(event);
            }
        }
    }

    fn tool_part(status: &str) -> Value {
        json!({
            "type": "message.part.updated",
            "properties": {
                "part": {
                    "type": "tool",
                    "sessionID": "ses_1",
                    "callID": "call_1",
                    "tool": "bash",
                    "state": {"status": status, "input": {"command": "ls"}, "output": "Cargo.toml"}
                }
            }
        })
    }

    fn counting(manager: &HookManager, event: HookEvent) -> Arc<Mutex<Vec<HookContext>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        manager.on(event, move |ctx| {
            s.lock().unwrap().push(ctx.clone());
            Ok(HookResult::proceed())
        });
        seen
    }

    #[test]
    fn test_shared_native_event_subscribed_once() {
        let manager = HookManager::new();
        counting(&manager, HookEvent::ToolBefore);
        counting(&manager, HookEvent::ToolAfter);
        counting(&manager, HookEvent::SubagentStart);

        let mut client = FakeOpenCode::default();
        assert_eq!(manager.apply_to_opencode_client(&mut client), 2);
        assert_eq!(client.subscriptions[MESSAGE_PART_UPDATED].len(), 1);
        assert_eq!(client.subscriptions[SESSION_DELETED].len(), 1);
    }

    fn hook_for(native: &str, properties: &Value) -> OpenCodeHook {
        opencode_hook(native, properties).unwrap()
    }

    #[test]
    fn test_finished_tool_leaves_no_live_keys() {
        let mut emitted = EmittedKeys::default();
        let part = |status: &str| tool_part(status)["properties"].clone();

        assert!(emitted.admit(&hook_for(MESSAGE_PART_UPDATED, &part("running"))));
        assert!(!emitted.admit(&hook_for(MESSAGE_PART_UPDATED, &part("running"))));
        assert_eq!(emitted.live_len(), 1);

        assert!(emitted.admit(&hook_for(MESSAGE_PART_UPDATED, &part("completed"))));
        assert!(!emitted.admit(&hook_for(MESSAGE_PART_UPDATED, &part("completed"))));
        assert_eq!(emitted.live_len(), 0);
        assert_eq!(emitted.finished.len(), 1);
    }

    #[test]
    fn test_finished_window_is_bounded() {
        let mut emitted = EmittedKeys::default();
        for i in 0..FINISHED_WINDOW + 10 {
            let info = json!({"info": {
                "id": format!("msg_{i}"),
                "sessionID": "ses_1",
                "role": "assistant",
                "time": {"completed": 2}
            }});
            assert!(emitted.admit(&hook_for(MESSAGE_UPDATED, &info)));
        }
        assert_eq!(emitted.finished.len(), FINISHED_WINDOW);
        assert_eq!(emitted.live_len(), 0);
    }

    #[test]
    fn test_deleted_session_forgets_its_keys() {
        let mut emitted = EmittedKeys::default();
        emitted.admit(&hook_for(MESSAGE_PART_UPDATED, &tool_part("running")["properties"]));
        let prompt = json!({"id": "per_1", "sessionID": "ses_1", "type": "bash"});
        emitted.admit(&hook_for(PERMISSION_UPDATED, &prompt));
        assert_eq!(emitted.live_len(), 1);
        assert_eq!(emitted.finished.len(), 1);

        let deleted = json!({"info": {"id": "ses_1"}});
        assert!(emitted.admit(&hook_for(SESSION_DELETED, &deleted)));
        assert_eq!(emitted.live_len(), 0);
        assert!(emitted.finished.is_empty());
    }

    #[test]
    fn test_tool_lifecycle_emitted_once_per_status() {
        let manager = HookManager::new();
        let before = counting(&manager, HookEvent::ToolBefore);
        let after = counting(&manager, HookEvent::ToolAfter);

        let mut client = FakeOpenCode::default();
        manager.apply_to_opencode_client(&mut client);
        client.send(&tool_part("pending"));
        client.send(&tool_part("running"));
        client.send(&tool_part("running"));
        client.send(&tool_part("completed"));

        assert_eq!(before.lock().unwrap().len(), 1);
        let after = after.lock().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].session_id, "ses_1");
        assert_eq!(after[0].agent_type, AgentType::OpenCode);
        assert_eq!(after[0].data.get("toolResult"), Some(json!("Cargo.toml")));
    }

    #[test]
    fn test_permission_denial_rejects() {
        let manager = HookManager::new();
        manager.on(HookEvent::PermissionRequest, |_| Ok(HookResult::halt()));

        let mut client = FakeOpenCode::default();
        manager.apply_to_opencode_client(&mut client);
        client.send(&json!({
            "type": "permission.updated",
            "properties": {
                "id": "per_1",
                "sessionID": "ses_1",
                "type": "bash",
                "title": "Run rm",
                "metadata": {}
            }
        }));

        assert_eq!(
            *client.replies.0.lock().unwrap(),
            vec![("ses_1".to_string(), "per_1".to_string(), PermissionReply::Reject)]
        );
    }

    #[test]
    fn test_permission_allowed_replies_once() {
        let manager = HookManager::new();
        manager.on(HookEvent::PermissionRequest, |_| Ok(HookResult::proceed()));

        let mut client = FakeOpenCode::default();
        manager.apply_to_opencode_client(&mut client);
        let prompt = json!({
            "type": "permission.updated",
            "properties": {"id": "per_2", "sessionID": "ses_1", "type": "edit"}
        });
        client.send(&prompt);
        client.send(&prompt);

        let replies = client.replies.0.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].2, PermissionReply::Once);
    }

    #[test]
    fn test_message_updates() {
        let user = json!({"info": {"id": "msg_1", "sessionID": "ses_1", "role": "user"}});
        let hook = opencode_hook(MESSAGE_UPDATED, &user).unwrap();
        assert_eq!(hook.event, HookEvent::MessageBefore);

        let streaming =
            json!({"info": {"id": "msg_2", "role": "assistant", "time": {"created": 1}}});
        assert!(opencode_hook(MESSAGE_UPDATED, &streaming).is_none());

        let done = json!({"info": {
            "id": "msg_2",
            "role": "assistant",
            "time": {"created": 1, "completed": 2}
        }});
        let hook = opencode_hook(MESSAGE_UPDATED, &done).unwrap();
        assert_eq!(hook.event, HookEvent::MessageAfter);
        assert_eq!(hook.data.get("messageId"), Some(json!("msg_2")));
    }

    #[test]
    fn test_session_events() {
        let created = json!({"info": {"id": "ses_9", "directory": "/work", "title": "Fix bug"}});
        let hook = opencode_hook(SESSION_CREATED, &created).unwrap();
        assert_eq!(hook.session_id, "ses_9");
        assert_eq!(hook.data.get("cwd"), Some(json!("/work")));
        assert_eq!(hook.data.get("title"), Some(json!("Fix bug")));

        let error = json!({
            "sessionID": "ses_9",
            "error": {"name": "ProviderAuthError", "data": {"message": "bad key"}}
        });
        let hook = opencode_hook(SESSION_ERROR, &error).unwrap();
        assert_eq!(hook.data.get("error"), Some(json!("bad key")));
        assert_eq!(hook.data.get("code"), Some(json!("ProviderAuthError")));
    }

    #[test]
    fn test_non_tool_parts_ignored() {
        let text = json!({"part": {"type": "text", "text": "hi"}});
        assert!(opencode_hook(MESSAGE_PART_UPDATED, &text).is_none());
    }
}
