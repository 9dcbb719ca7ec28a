//! Error types shared across agentbus crates.

use crate::EventType;

/// A payload or envelope that failed its schema check.
///
/// Carries enough detail for the bus to log a field-level diagnostic
/// without re-inspecting the event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {event_type} event: field `{field}` {reason}")]
pub struct ValidationError {
    /// Type tag of the rejected event.
    pub event_type: EventType,
    /// Name of the offending field (envelope or payload).
    pub field: &'static str,
    /// Why the field was rejected.
    pub reason: String,
}

impl ValidationError {
    pub fn new(event_type: EventType, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            event_type,
            field,
            reason: reason.into(),
        }
    }
}

/// Errors produced while building or decoding protocol types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown event type tag `{0}`")]
    UnknownEventType(String),

    #[error("unknown hook event `{0}`")]
    UnknownHookEvent(String),

    #[error("payload for `{event_type}` does not match its schema: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("hook data for `{event}` does not match its shape: {source}")]
    HookData {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
