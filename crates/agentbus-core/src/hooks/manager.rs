//! Backend-agnostic hook chains.

use crate::event_bus::panic_message;
use agentbus_proto::{HookContext, HookEvent, HookResult};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

/// A hook handler. Returning `Err` or panicking fails the whole chain.
pub type HookHandler = Arc<dyn Fn(&HookContext) -> anyhow::Result<HookResult> + Send + Sync>;

#[derive(Default)]
struct HookRegistry {
    next_id: u64,
    chains: HashMap<HookEvent, Vec<(u64, HookHandler)>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("events", &self.chains.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`HookManager::on`].
#[derive(Debug)]
pub struct HookSubscription {
    registry: Weak<Mutex<HookRegistry>>,
    event: HookEvent,
    id: u64,
}

impl HookSubscription {
    /// Removes the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(chain) = registry.chains.get_mut(&self.event) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|(id, _)| *id != self.id);
        let removed = chain.len() != before;
        if chain.is_empty() {
            registry.chains.remove(&self.event);
        }
        removed
    }
}

/// Registry of hook handlers shared by every backend adapter.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct HookManager {
    registry: Arc<Mutex<HookRegistry>>,
}

impl HookManager {
    /// Creates a manager with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the chain for `event`.
    pub fn on<F>(&self, event: HookEvent, handler: F) -> HookSubscription
    where
        F: Fn(&HookContext) -> anyhow::Result<HookResult> + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .chains
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        HookSubscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
        }
    }

    /// Removes every handler for `event`.
    pub fn off(&self, event: HookEvent) {
        self.lock().chains.remove(&event);
    }

    /// Removes every handler for every event.
    pub fn clear(&self) {
        self.lock().chains.clear();
    }

    /// True if `event` has at least one handler.
    pub fn has_handlers(&self, event: HookEvent) -> bool {
        self.lock()
            .chains
            .get(&event)
            .is_some_and(|chain| !chain.is_empty())
    }

    /// Total number of handlers across all events.
    pub fn handler_count(&self) -> usize {
        self.lock().chains.values().map(Vec::len).sum()
    }

    /// Events with at least one handler, in [`HookEvent::ALL`] order.
    pub fn registered_events(&self) -> Vec<HookEvent> {
        let registry = self.lock();
        HookEvent::ALL
            .into_iter()
            .filter(|event| registry.chains.get(event).is_some_and(|chain| !chain.is_empty()))
            .collect()
    }

    /// Runs the chain for `event`.
    ///
    /// Handlers run in registration order and each sees the data as modified
    /// by the handlers before it. The chain stops at the first handler that
    /// reports an error, returns `continue: false`, fails, or panics. When any
    /// handler modified the data, the final data is returned in
    /// `modified_data`.
    pub fn emit(&self, event: HookEvent, context: HookContext) -> HookResult {
        let chain: Vec<HookHandler> = match self.lock().chains.get(&event) {
            Some(chain) => chain.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => Vec::new(),
        };
        if chain.is_empty() {
            return HookResult::proceed();
        }

        if context.event() != event {
            warn!(%event, data = %context.event(), "Hook context does not match event");
            return HookResult::failed(format!(
                "{event} hook emitted with {} data",
                context.event()
            ));
        }

        let mut context = context;
        let mut modified = false;
        for (position, handler) in chain.iter().enumerate() {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| handler(&context))) {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(%event, position, error = %err, "Hook handler failed");
                    return HookResult::failed(err.to_string());
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(%event, position, panic = %message, "Hook handler panicked");
                    return HookResult::failed(message);
                }
            };

            if let Some(error) = result.error {
                debug!(%event, position, %error, "Hook handler reported an error");
                return HookResult::failed(error);
            }

            if let Some(patch) = &result.modified_data {
                if let Err(err) = context.data.merge(patch) {
                    warn!(
                        %event,
                        position,
                        error = %err,
                        "Hook handler returned incompatible data"
                    );
                    return HookResult::failed(err.to_string());
                }
                modified = true;
            }

            if result.proceed == Some(false) {
                debug!(%event, position, "Hook chain stopped");
                return HookResult {
                    proceed: Some(false),
                    modified_data: final_data(&context, modified),
                    error: None,
                };
            }
        }

        HookResult {
            proceed: Some(true),
            modified_data: final_data(&context, modified),
            error: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HookRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn final_data(
    context: &HookContext,
    modified: bool,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    if modified {
        context.data.to_object().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_proto::hook::{ToolBeforeHook, ToolErrorHook};
    use agentbus_proto::{AgentType, HookData};
    use serde_json::{Map, Value, json};

    fn tool_before() -> HookContext {
        HookContext::new(
            "s",
            AgentType::Claude,
            HookData::ToolBefore(ToolBeforeHook {
                tool_name: "bash".to_string(),
                tool_input: json!({"command": "rm -rf target"}),
                ..ToolBeforeHook::default()
            }),
        )
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_emit_without_handlers_continues() {
        let manager = HookManager::new();
        assert_eq!(
            manager.emit(HookEvent::ToolBefore, tool_before()),
            HookResult::proceed()
        );
    }

    #[test]
    fn test_modified_data_visible_to_next_handler() {
        let manager = HookManager::new();
        let seen = Arc::new(Mutex::new(None));

        manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::modify(patch(json!({"x": 1})))));
        let s = Arc::clone(&seen);
        manager.on(HookEvent::ToolBefore, move |ctx| {
            *s.lock().unwrap() = ctx.data.get("x");
            Ok(HookResult::proceed())
        });

        let result = manager.emit(HookEvent::ToolBefore, tool_before());

        assert_eq!(*seen.lock().unwrap(), Some(json!(1)));
        assert!(result.should_continue());
        assert_eq!(result.modified_data.unwrap()["x"], json!(1));
    }

    #[test]
    fn test_modified_tool_input_returned() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |_| {
            Ok(HookResult::modify(patch(json!({"toolInput": {"command": "ls"}}))))
        });

        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert_eq!(result.modified_data.unwrap()["toolInput"], json!({"command": "ls"}));
    }

    #[test]
    fn test_halt_stops_chain_without_error() {
        let manager = HookManager::new();
        let calls = Arc::new(Mutex::new(0));

        manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::halt()));
        let c = Arc::clone(&calls);
        manager.on(HookEvent::ToolBefore, move |_| {
            *c.lock().unwrap() += 1;
            Ok(HookResult::proceed())
        });

        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert_eq!(result.proceed, Some(false));
        assert_eq!(result.error, None);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_reported_error_is_terminal() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::failed("blocked by policy")));
        manager.on(HookEvent::ToolBefore, |_| panic!("must not run"));

        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert_eq!(result, HookResult::failed("blocked by policy"));
    }

    #[test]
    fn test_handler_failure_is_caught() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |_| anyhow::bail!("hook crashed"));
        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert_eq!(result.error.as_deref(), Some("hook crashed"));
        assert!(!result.should_continue());

        manager.clear();
        manager.on(HookEvent::ToolBefore, |_| panic!("exploded"));
        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert_eq!(result.error.as_deref(), Some("exploded"));
    }

    #[test]
    fn test_incompatible_patch_is_terminal() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolBefore, |_| {
            Ok(HookResult::modify(patch(json!({"toolName": 42}))))
        });
        let result = manager.emit(HookEvent::ToolBefore, tool_before());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_mismatched_context_rejected() {
        let manager = HookManager::new();
        manager.on(HookEvent::ToolError, |_| Ok(HookResult::proceed()));

        let result = manager.emit(HookEvent::ToolError, tool_before());
        assert!(result.error.is_some());

        let context = HookContext::new(
            "s",
            AgentType::Copilot,
            HookData::ToolError(ToolErrorHook {
                tool_name: "bash".to_string(),
                error: "exit 1".to_string(),
                ..ToolErrorHook::default()
            }),
        );
        assert!(manager.emit(HookEvent::ToolError, context).should_continue());
    }

    #[test]
    fn test_registration_bookkeeping() {
        let manager = HookManager::new();
        let sub = manager.on(HookEvent::ToolBefore, |_| Ok(HookResult::proceed()));
        manager.on(HookEvent::SessionStart, |_| Ok(HookResult::proceed()));
        manager.on(HookEvent::SessionStart, |_| Ok(HookResult::proceed()));

        assert_eq!(manager.handler_count(), 3);
        assert_eq!(
            manager.registered_events(),
            vec![HookEvent::SessionStart, HookEvent::ToolBefore]
        );

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!manager.has_handlers(HookEvent::ToolBefore));

        manager.off(HookEvent::SessionStart);
        assert_eq!(manager.handler_count(), 0);
    }

    #[test]
    fn test_clones_share_registry() {
        let manager = HookManager::new();
        let clone = manager.clone();
        clone.on(HookEvent::MessageBefore, |_| Ok(HookResult::halt()));
        assert!(manager.has_handlers(HookEvent::MessageBefore));
    }
}
