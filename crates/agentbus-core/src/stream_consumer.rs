//! Maps enriched event batches to UI stream parts.
//!
//! This is the consumer that sits behind the [`BatchDispatcher`]: it owns
//! the correlation and echo-suppression state, drops stale events, and hands
//! the resulting [`StreamPartEvent`]s to a single registered callback.
//!
//! [`BatchDispatcher`]: crate::dispatcher::BatchDispatcher

use crate::correlation::CorrelationService;
use crate::echo::EchoSuppressor;
use agentbus_proto::{BusEvent, EnrichedBusEvent, EventPayload, StreamPartEvent};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Receives the stream parts produced from one batch.
pub type StreamPartsCallback = Arc<dyn Fn(Vec<StreamPartEvent>) + Send + Sync>;

#[derive(Default)]
struct ConsumerState {
    correlation: CorrelationService,
    echo: EchoSuppressor,
    callback: Option<StreamPartsCallback>,
}

/// Shared handle; clones see the same state.
#[derive(Clone, Default)]
pub struct StreamPipelineConsumer {
    state: Arc<Mutex<ConsumerState>>,
}

impl StreamPipelineConsumer {
    /// Creates a consumer with no callback and fresh correlation state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the callback, replacing any previous one.
    pub fn on_stream_parts<F>(&self, callback: F)
    where
        F: Fn(Vec<StreamPartEvent>) + Send + Sync + 'static,
    {
        self.lock().callback = Some(Arc::new(callback));
    }

    /// Enriches an event with correlation metadata.
    pub fn enrich(&self, event: &BusEvent) -> EnrichedBusEvent {
        self.lock().correlation.enrich(event)
    }

    /// Maps a batch and invokes the callback once, unless no parts resulted.
    pub fn process_batch(&self, events: &[EnrichedBusEvent]) {
        let (parts, callback) = {
            let mut state = self.lock();
            let mut parts = Vec::with_capacity(events.len());
            for event in events {
                state.map_event(event, &mut parts);
            }
            (parts, state.callback.clone())
        };

        if parts.is_empty() {
            return;
        }
        match callback {
            Some(callback) => callback(parts),
            None => debug!(parts = parts.len(), "No stream-part callback registered"),
        }
    }

    /// Clears correlation and echo state.
    ///
    /// Call before a new run, after error recovery, or when switching
    /// conversations. The callback stays registered.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.correlation.reset();
        state.echo.reset();
    }

    fn lock(&self) -> MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConsumerState {
    fn map_event(&mut self, enriched: &EnrichedBusEvent, parts: &mut Vec<StreamPartEvent>) {
        let event = &enriched.event;
        if enriched.stale {
            trace!(event_type = %event.event_type(), run_id = event.run_id, "Dropping stale event");
            return;
        }

        match &event.payload {
            EventPayload::TextDelta(data) => {
                if let Some(delta) = self.echo.filter_delta(&data.delta) {
                    if !delta.is_empty() {
                        parts.push(StreamPartEvent::TextDelta {
                            delta,
                            message_id: data.message_id.clone(),
                            agent_id: data
                                .agent_id
                                .clone()
                                .or_else(|| enriched.parent_agent_id.clone()),
                        });
                    }
                }
            }
            EventPayload::ThinkingDelta(data) => {
                let thinking_source_key = match &enriched.thinking_source_key {
                    Some(key) => key.clone(),
                    None => self.correlation.thinking_key(
                        event,
                        data.message_id.as_deref(),
                        &data.source,
                    ),
                };
                parts.push(StreamPartEvent::ThinkingMeta {
                    thinking_source_key,
                    thinking_text: data.delta.clone(),
                    target_message_id: data
                        .message_id
                        .clone()
                        .or_else(|| self.correlation.active_message_id().map(str::to_string)),
                    stream_generation: event.run_id,
                    agent_id: data
                        .agent_id
                        .clone()
                        .or_else(|| enriched.parent_agent_id.clone()),
                });
            }
            EventPayload::ToolStart(data) => parts.push(StreamPartEvent::ToolStart {
                tool_id: data.tool_id.clone(),
                tool_name: data.tool_name.clone(),
                input: data.tool_input.clone(),
                parent_agent_id: enriched.parent_agent_id.clone(),
            }),
            EventPayload::ToolComplete(data) => {
                if let Some(text) = echo_candidate(&data.tool_result) {
                    self.echo.expect_echo(text);
                }
                parts.push(StreamPartEvent::ToolComplete {
                    tool_id: data.tool_id.clone(),
                    tool_name: data.tool_name.clone(),
                    output: data.tool_result.clone(),
                    success: data.success,
                    error: data.error.clone(),
                    parent_agent_id: enriched.parent_agent_id.clone(),
                });
            }
            EventPayload::ToolPartialResult(data) => {
                parts.push(StreamPartEvent::ToolPartialResult {
                    tool_id: data.tool_id.clone(),
                    partial_output: data.partial_output.clone(),
                    parent_agent_id: enriched.parent_agent_id.clone(),
                });
            }
            EventPayload::TextComplete(data) => {
                if let Some(held) = self.echo.take_pending() {
                    parts.push(StreamPartEvent::TextDelta {
                        delta: held,
                        message_id: data.message_id.clone(),
                        agent_id: enriched.parent_agent_id.clone(),
                    });
                }
                parts.push(StreamPartEvent::TextComplete {
                    message_id: data.message_id.clone(),
                    full_text: data.full_text.clone(),
                });
            }
            EventPayload::WorkflowStepStart(data) => {
                parts.push(StreamPartEvent::WorkflowStepStart {
                    workflow_id: data.workflow_id.clone(),
                    node_id: data.node_id.clone(),
                    node_name: data.node_name.clone(),
                    started_at: event.timestamp,
                });
            }
            EventPayload::WorkflowStepComplete(data) => {
                parts.push(StreamPartEvent::WorkflowStepComplete {
                    workflow_id: data.workflow_id.clone(),
                    node_id: data.node_id.clone(),
                    node_name: data.node_name.clone(),
                    status: data.status,
                    duration_ms: data.duration_ms,
                    completed_at: event.timestamp,
                });
            }
            EventPayload::WorkflowTaskUpdate(data) => parts.push(StreamPartEvent::TaskListUpdate {
                tasks: data.tasks.clone(),
            }),
            EventPayload::ThinkingComplete(_)
            | EventPayload::AgentStart(_)
            | EventPayload::AgentUpdate(_)
            | EventPayload::AgentComplete(_)
            | EventPayload::SessionStart(_)
            | EventPayload::SessionIdle(_)
            | EventPayload::SessionError(_)
            | EventPayload::PermissionRequested(_)
            | EventPayload::Usage(_) => {}
        }
    }
}

/// Text a tool result might be echoed as.
fn echo_candidate(result: &Value) -> Option<&str> {
    match result {
        Value::String(text) => Some(text),
        Value::Object(map) => ["output", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}
