//! Unified hooks and their backend adapters.
//!
//! Handlers are registered once on a [`HookManager`] and installed on a
//! concrete backend client with `apply_to_claude_client`,
//! `apply_to_opencode_client` or `apply_to_copilot_client`.

pub mod claude;
pub mod copilot;
mod manager;
pub mod opencode;

pub use manager::{HookHandler, HookManager, HookSubscription};

use serde_json::{Map, Value};

/// Reads a string field from a native payload.
fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

/// Copies the listed keys of a native payload, when present.
fn pick(value: &Value, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| value.get(*key).map(|v| ((*key).to_string(), v.clone())))
        .collect()
}
