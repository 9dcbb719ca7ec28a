//! # agentbus-proto
//!
//! Shared types for the agentbus event pipeline.
//!
//! This crate provides the foundational data model used across agentbus
//! crates, including:
//! - The `BusEvent` envelope and its per-type payloads with validators
//! - Correlation-enriched events handed to batch consumers
//! - UI-facing `StreamPartEvent`s
//! - The unified hook vocabulary
//! - Common error types

mod error;
mod event;
pub mod hook;
mod stream_part;

pub use error::{Error, Result, ValidationError};
pub use event::{
    AgentCompleteData, AgentStartData, AgentUpdateData, BusEvent, EnrichedBusEvent, EventPayload,
    EventType, PermissionOption, PermissionRequestedData, SessionErrorData, SessionIdleData,
    SessionStartData, TaskItem, TaskStatus, TaskUpdateData, TextCompleteData, TextDeltaData,
    ThinkingCompleteData, ThinkingDeltaData, ThinkingSource, ToolCompleteData,
    ToolPartialResultData, ToolStartData, UsageData, Validate, WorkflowStepCompleteData,
    WorkflowStepStartData, WorkflowStepStatus,
};
pub use hook::{AgentType, HookContext, HookData, HookEvent, HookResult};
pub use stream_part::StreamPartEvent;
