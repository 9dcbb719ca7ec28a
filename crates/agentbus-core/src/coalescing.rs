//! Coalescing keys for the batch dispatcher.
//!
//! Two events sharing a key within one flush window collapse into the later
//! one. Events that accumulate (text and thinking deltas, partial tool
//! output) or happen once (session start, errors, permission prompts) have no
//! key and are always delivered.

use agentbus_proto::{BusEvent, EventPayload};

/// Returns the coalescing key of `event`, if it has one.
///
/// Tool and workflow keys include the event type, so a start and its
/// completion landing in the same window are both delivered.
pub fn coalescing_key(event: &BusEvent) -> Option<String> {
    let session = &event.session_id;
    match &event.payload {
        EventPayload::ToolStart(data) => Some(format!("tool.start:{session}:{}", data.tool_id)),
        EventPayload::ToolComplete(data) => {
            Some(format!("tool.complete:{session}:{}", data.tool_id))
        }
        EventPayload::AgentUpdate(data) => {
            Some(format!("agent.update:{session}:{}", data.agent_id))
        }
        EventPayload::WorkflowStepStart(data) => {
            Some(format!("workflow.step.start:{session}:{}", data.node_id))
        }
        EventPayload::WorkflowStepComplete(data) => {
            Some(format!("workflow.step.complete:{session}:{}", data.node_id))
        }
        EventPayload::WorkflowTaskUpdate(_) => Some(format!("task-list:{session}")),
        EventPayload::Usage(_) => Some(format!("usage:{session}")),
        EventPayload::SessionIdle(_) => Some(format!("session.idle:{session}")),
        EventPayload::TextDelta(_)
        | EventPayload::TextComplete(_)
        | EventPayload::ThinkingDelta(_)
        | EventPayload::ThinkingComplete(_)
        | EventPayload::ToolPartialResult(_)
        | EventPayload::AgentStart(_)
        | EventPayload::AgentComplete(_)
        | EventPayload::SessionStart(_)
        | EventPayload::SessionError(_)
        | EventPayload::PermissionRequested(_) => None,
    }
}
