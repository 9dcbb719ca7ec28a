//! Correlation state used to enrich events before batching.
//!
//! Tracks the latest run per session, the message currently being streamed,
//! stable keys for reasoning streams, and which sub-agent owns which tool
//! call.

use agentbus_proto::{BusEvent, EnrichedBusEvent, EventPayload, ThinkingSource};
use std::collections::HashMap;
use tracing::debug;

/// Per-pipeline correlation state: run staleness, the streaming message,
/// reasoning keys and sub-agent ownership.
#[derive(Debug, Default)]
pub struct CorrelationService {
    latest_runs: HashMap<String, u64>,
    active_message_id: Option<String>,

    /// Raw reasoning identity to its stable key.
    thinking_keys: HashMap<String, String>,
    /// Key of the last delta per `(session, run, source)`, reused by the
    /// matching completion.
    open_thinking: HashMap<String, String>,
    next_thinking_seq: u64,

    /// Tool call that launched a sub-agent, to that agent's id.
    agent_by_launch_call: HashMap<String, String>,
    /// Tool id to the sub-agent it belongs to.
    agent_by_tool: HashMap<String, String>,
}

impl CorrelationService {
    /// Creates a service with no correlation state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches correlation metadata to `event`.
    ///
    /// Events from a superseded run are flagged stale and leave the
    /// correlation state untouched.
    pub fn enrich(&mut self, event: &BusEvent) -> EnrichedBusEvent {
        let mut enriched = EnrichedBusEvent::from(event.clone());
        if self.observe_run(&event.session_id, event.run_id) {
            debug!(
                session_id = %event.session_id,
                run_id = event.run_id,
                event_type = %event.event_type(),
                "Event belongs to a superseded run"
            );
            enriched.stale = true;
            return enriched;
        }

        match &event.payload {
            EventPayload::TextDelta(data) => {
                self.active_message_id = Some(data.message_id.clone());
                enriched.parent_agent_id = data.agent_id.clone();
            }
            EventPayload::TextComplete(data) => {
                self.active_message_id = Some(data.message_id.clone());
            }
            EventPayload::ThinkingDelta(data) => {
                let key = self.thinking_key(event, data.message_id.as_deref(), &data.source);
                enriched.thinking_source_key = Some(key);
                enriched.parent_agent_id = data.agent_id.clone();
            }
            EventPayload::ThinkingComplete(data) => {
                let identity = source_identity(event, &data.source);
                let key = self
                    .open_thinking
                    .get(&identity)
                    .cloned()
                    .unwrap_or_else(|| self.thinking_key(event, None, &data.source));
                self.open_thinking.remove(&identity);
                enriched.thinking_source_key = Some(key);
            }
            EventPayload::AgentStart(data) => {
                if let Some(call_id) = &data.tool_call_id {
                    self.agent_by_launch_call
                        .insert(call_id.clone(), data.agent_id.clone());
                }
            }
            EventPayload::ToolStart(data) => {
                let parent = data.parent_agent_id.clone().or_else(|| {
                    data.parent_tool_call_id
                        .as_ref()
                        .and_then(|call_id| self.agent_by_launch_call.get(call_id).cloned())
                });
                if let Some(agent_id) = &parent {
                    self.agent_by_tool.insert(data.tool_id.clone(), agent_id.clone());
                }
                enriched.parent_agent_id = parent;
            }
            EventPayload::ToolComplete(data) => {
                enriched.parent_agent_id = data
                    .parent_agent_id
                    .clone()
                    .or_else(|| {
                        data.parent_tool_call_id
                            .as_ref()
                            .and_then(|call_id| self.agent_by_launch_call.get(call_id).cloned())
                    })
                    .or_else(|| self.agent_by_tool.get(&data.tool_id).cloned());
            }
            EventPayload::ToolPartialResult(data) => {
                enriched.parent_agent_id = self.agent_by_tool.get(&data.tool_id).cloned();
            }
            _ => {}
        }
        enriched
    }

    /// Stable key for a reasoning stream.
    ///
    /// The same `(run, message, source)` always maps to the same key. Without
    /// an explicit message id the active message is used.
    pub fn thinking_key(
        &mut self,
        event: &BusEvent,
        message_id: Option<&str>,
        source: &ThinkingSource,
    ) -> String {
        let message_id = message_id
            .or(self.active_message_id.as_deref())
            .unwrap_or("-");
        let identity = format!("{}:{}:{message_id}:{source}", event.session_id, event.run_id);
        let key = match self.thinking_keys.get(&identity) {
            Some(key) => key.clone(),
            None => {
                self.next_thinking_seq += 1;
                let key = format!("thinking:{}:{}", event.run_id, self.next_thinking_seq);
                self.thinking_keys.insert(identity, key.clone());
                key
            }
        };
        self.open_thinking.insert(source_identity(event, source), key.clone());
        key
    }

    pub fn active_message_id(&self) -> Option<&str> {
        self.active_message_id.as_deref()
    }

    /// Highest run id seen for `session_id`.
    pub fn latest_run(&self, session_id: &str) -> Option<u64> {
        self.latest_runs.get(session_id).copied()
    }

    /// Forgets all correlation state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records `run_id` for the session and returns whether it is stale.
    fn observe_run(&mut self, session_id: &str, run_id: u64) -> bool {
        match self.latest_runs.get_mut(session_id) {
            Some(latest) if run_id < *latest => true,
            Some(latest) => {
                *latest = run_id;
                false
            }
            None => {
                self.latest_runs.insert(session_id.to_string(), run_id);
                false
            }
        }
    }
}

fn source_identity(event: &BusEvent, source: &ThinkingSource) -> String {
    format!("{}:{}:{source}", event.session_id, event.run_id)
}
