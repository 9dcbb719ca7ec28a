//! Typed publish/subscribe hub for normalized backend events.
//!
//! Every event is validated against its payload schema before any handler
//! sees it. Handlers registered for a specific [`EventType`] run first, then
//! wildcard handlers, each in subscription order. A failing or panicking
//! handler is logged and never prevents the remaining handlers from running.

use crate::debug_log::DebugEventLog;
use agentbus_proto::{BusEvent, EventType, Validate, ValidationError};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{trace, warn};

/// Callback invoked for each delivered event.
pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    typed: HashMap<EventType, Vec<(u64, Handler)>>,
    wildcard: Vec<(u64, Handler)>,
}

impl Registry {
    fn insert(&mut self, slot: Slot, handler: Handler) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        match slot {
            Slot::Typed(event_type) => {
                self.typed.entry(event_type).or_default().push((id, handler));
            }
            Slot::Wildcard => self.wildcard.push((id, handler)),
        }
        id
    }

    fn remove(&mut self, slot: Slot, id: u64) -> bool {
        match slot {
            Slot::Typed(event_type) => {
                let Some(handlers) = self.typed.get_mut(&event_type) else {
                    return false;
                };
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                let removed = handlers.len() != before;
                if handlers.is_empty() {
                    self.typed.remove(&event_type);
                }
                removed
            }
            Slot::Wildcard => {
                let before = self.wildcard.len();
                self.wildcard.retain(|(handler_id, _)| *handler_id != id);
                self.wildcard.len() != before
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Typed(EventType),
    Wildcard,
}

/// Handle returned by [`EventBus::on`] and [`EventBus::on_all`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    slot: Slot,
    id: u64,
}

impl Subscription {
    /// Removes the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.remove(self.slot, self.id)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("typed", &self.typed.keys().collect::<Vec<_>>())
            .field("wildcard", &self.wildcard.len())
            .finish_non_exhaustive()
    }
}

/// Central pub/sub hub for [`BusEvent`]s.
#[derive(Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,

    /// Receives every valid event before handlers run.
    debug_log: Option<Arc<DebugEventLog>>,
}

impl EventBus {
    /// Creates a bus with no handlers and no debug log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a debug event log, usually the process-wide
    /// [`DebugEventLog::shared`] handle.
    #[must_use]
    pub fn with_debug_log(mut self, log: Arc<DebugEventLog>) -> Self {
        self.debug_log = Some(log);
        self
    }

    /// The attached debug log, if any.
    pub fn debug_log(&self) -> Option<&DebugEventLog> {
        self.debug_log.as_deref()
    }

    /// Subscribes `handler` to one event type.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Slot::Typed(event_type), Arc::new(handler))
    }

    /// Subscribes `handler` to every event type.
    pub fn on_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Slot::Wildcard, Arc::new(handler))
    }

    fn subscribe(&self, slot: Slot, handler: Handler) -> Subscription {
        let id = self.lock().insert(slot, handler);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            slot,
            id,
        }
    }

    /// Validates `event` and delivers it to typed then wildcard handlers.
    ///
    /// An invalid event is logged, reaches no handler, and is returned as the
    /// error. Handler failures are logged and swallowed.
    pub fn publish(&self, event: &BusEvent) -> Result<(), ValidationError> {
        if let Err(err) = event.validate() {
            warn!(
                event_type = %err.event_type,
                field = err.field,
                reason = %err.reason,
                session_id = %event.session_id,
                "Dropping event that failed schema validation"
            );
            return Err(err);
        }

        if let Some(log) = &self.debug_log {
            log.append(event);
        }

        let event_type = event.event_type();
        let handlers: Vec<Handler> = {
            let registry = self.lock();
            registry
                .typed
                .get(&event_type)
                .into_iter()
                .flatten()
                .chain(registry.wildcard.iter())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        trace!(%event_type, handlers = handlers.len(), "Publishing event");
        for handler in &handlers {
            invoke(handler, event);
        }
        Ok(())
    }

    /// Removes every handler.
    pub fn clear(&self) {
        let mut registry = self.lock();
        registry.typed.clear();
        registry.wildcard.clear();
    }

    /// True if at least one typed handler exists for `event_type`.
    ///
    /// Wildcard handlers are not counted.
    pub fn has_handlers(&self, event_type: EventType) -> bool {
        self.lock()
            .typed
            .get(&event_type)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Total number of typed and wildcard handlers.
    pub fn handler_count(&self) -> usize {
        let registry = self.lock();
        registry.typed.values().map(Vec::len).sum::<usize>() + registry.wildcard.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invoke(handler: &Handler, event: &BusEvent) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            event_type = %event.event_type(),
            error = %err,
            "Event handler failed"
        ),
        Err(payload) => warn!(
            event_type = %event.event_type(),
            panic = %panic_message(payload.as_ref()),
            "Event handler panicked"
        ),
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_proto::{EventPayload, TextDeltaData, ToolStartData};
    use serde_json::json;

    fn text_delta(delta: &str) -> BusEvent {
        BusEvent::new(
            "session-1",
            1,
            EventPayload::TextDelta(TextDeltaData {
                delta: delta.to_string(),
                message_id: "msg-1".to_string(),
                agent_id: None,
            }),
        )
    }

    fn tool_start(tool_id: &str) -> BusEvent {
        BusEvent::new(
            "session-1",
            1,
            EventPayload::ToolStart(ToolStartData {
                tool_id: tool_id.to_string(),
                tool_name: "bash".to_string(),
                tool_input: json!({"command": "ls"}),
                parent_tool_call_id: None,
                parent_agent_id: None,
            }),
        )
    }

    fn recorder(
        bus: &EventBus,
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Subscription {
        let log = Arc::clone(log);
        bus.on(EventType::TextDelta, move |event| {
            log.lock().unwrap().push(format!("{label}:{}", event.event_type()));
            Ok(())
        })
    }

    #[test]
    fn test_typed_and_wildcard_receive_same_event() {
        let bus = EventBus::new();
        let typed = Arc::new(Mutex::new(Vec::new()));
        let wildcard = Arc::new(Mutex::new(Vec::new()));

        let typed_clone = Arc::clone(&typed);
        bus.on(EventType::TextDelta, move |event| {
            typed_clone.lock().unwrap().push(event.clone());
            Ok(())
        });
        let wildcard_clone = Arc::clone(&wildcard);
        bus.on_all(move |event| {
            wildcard_clone.lock().unwrap().push(event.clone());
            Ok(())
        });

        let event = text_delta("hi");
        bus.publish(&event).unwrap();

        assert_eq!(*typed.lock().unwrap(), vec![event.clone()]);
        assert_eq!(*wildcard.lock().unwrap(), vec![event]);
    }

    #[test]
    fn test_typed_handlers_run_before_wildcard() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        bus.on_all(move |_| {
            o.lock().unwrap().push("wildcard");
            Ok(())
        });
        let o = Arc::clone(&order);
        bus.on(EventType::TextDelta, move |_| {
            o.lock().unwrap().push("first");
            Ok(())
        });
        let o = Arc::clone(&order);
        bus.on(EventType::TextDelta, move |_| {
            o.lock().unwrap().push("second");
            Ok(())
        });

        bus.publish(&text_delta("x")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "wildcard"]);
    }

    #[test]
    fn test_typed_handler_ignores_other_types() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, "typed", &log);

        bus.publish(&tool_start("tool-1")).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_event_reaches_no_handler() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        bus.on_all(move |_| {
            *c.lock().unwrap() += 1;
            Ok(())
        });

        let err = bus.publish(&tool_start("")).unwrap_err();
        assert_eq!(err.field, "toolId");

        let mut stale_run = text_delta("x");
        stale_run.run_id = 0;
        assert!(bus.publish(&stale_run).is_err());

        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.on(EventType::TextDelta, |_| anyhow::bail!("boom"));
        recorder(&bus, "after-error", &log);
        bus.on(EventType::TextDelta, |_| panic!("handler exploded"));
        let l = Arc::clone(&log);
        bus.on_all(move |_| {
            l.lock().unwrap().push("wildcard".to_string());
            Ok(())
        });

        assert!(bus.publish(&text_delta("x")).is_ok());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["after-error:stream.text.delta".to_string(), "wildcard".to_string()]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = recorder(&bus, "a", &log);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(bus.handler_count(), 0);

        bus.publish(&text_delta("x")).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_subscription_does_not_remove_new_handler() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let old = recorder(&bus, "old", &log);
        bus.clear();
        recorder(&bus, "new", &log);

        assert!(!old.unsubscribe());
        bus.publish(&text_delta("x")).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["new:stream.text.delta".to_string()]);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.on_all(|_| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_handler_counts() {
        let bus = EventBus::new();
        assert!(!bus.has_handlers(EventType::TextDelta));

        let typed = bus.on(EventType::TextDelta, |_| Ok(()));
        bus.on(EventType::ToolStart, |_| Ok(()));
        bus.on_all(|_| Ok(()));

        assert!(bus.has_handlers(EventType::TextDelta));
        assert!(!bus.has_handlers(EventType::Usage));
        assert_eq!(bus.handler_count(), 3);

        typed.unsubscribe();
        assert!(!bus.has_handlers(EventType::TextDelta));
        assert_eq!(bus.handler_count(), 2);

        bus.clear();
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0));

        let inner_bus = Arc::clone(&bus);
        let c = Arc::clone(&calls);
        bus.on(EventType::TextDelta, move |_| {
            let c = Arc::clone(&c);
            inner_bus.on(EventType::TextDelta, move |_| {
                *c.lock().unwrap() += 1;
                Ok(())
            });
            Ok(())
        });

        bus.publish(&text_delta("a")).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
        bus.publish(&text_delta("b")).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("plain");
        assert_eq!(panic_message(payload.as_ref()), "plain");
        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted"));
        assert_eq!(panic_message(payload.as_ref()), "formatted");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
