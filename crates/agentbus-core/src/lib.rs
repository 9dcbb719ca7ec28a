//! # agentbus-core
//!
//! Event pipeline and hook unification for coding-agent backends.
//!
//! This crate provides:
//! - A typed event bus that validates every published event
//! - Frame-aligned batch dispatch with per-key coalescing
//! - Run/message correlation and echo suppression of tool output
//! - Mapping of batched events to UI stream parts
//! - A unified hook chain installable on Claude, OpenCode and Copilot clients
//! - An opt-in JSONL debug log of published events

mod coalescing;
mod config;
mod correlation;
mod debug_log;
mod dispatcher;
mod echo;
mod error;
mod event_bus;
pub mod hooks;
mod logging;
mod pipeline;
mod stream_consumer;

pub use coalescing::coalescing_key;
pub use config::{
    ConfigError, DEBUG_DIR_ENV, DEBUG_EVENTS_ENV, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_RETAINED_LOGS, DEV_ENV, DebugLogConfig, PipelineConfig,
};
pub use correlation::CorrelationService;
pub use debug_log::{
    DEV_LOG_FILE, DebugEventLog, DebugLogEntry, read_debug_log, read_debug_log_filtered,
};
pub use dispatcher::{BatchDispatcher, ConsumerId, DispatcherMetrics, KeyFn};
pub use echo::EchoSuppressor;
pub use error::PipelineError;
pub use event_bus::{EventBus, Handler, Subscription};
pub use hooks::{HookHandler, HookManager, HookSubscription};
pub use logging::init_tracing;
pub use pipeline::{EventPipeline, PipelineHandle};
pub use stream_consumer::{StreamPartsCallback, StreamPipelineConsumer};
