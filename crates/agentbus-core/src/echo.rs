//! Suppression of text deltas that re-send already delivered tool output.
//!
//! Some backends stream the model's final text as deltas and also embed the
//! same text in a tool result. Once a tool result has been shown, deltas that
//! spell out that result again are held back. Held text is released as soon
//! as the stream diverges from the expected echo, so nothing is lost.

use std::collections::VecDeque;
use tracing::trace;

/// Holds back text deltas that repeat registered tool output.
#[derive(Debug, Default)]
pub struct EchoSuppressor {
    expected: VecDeque<String>,
    held: String,
}

impl EchoSuppressor {
    /// Creates a suppressor with nothing expected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers text that may be echoed back as deltas.
    ///
    /// Surrounding whitespace is ignored; blank text is not registered.
    pub fn expect_echo(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.expected.push_back(text.to_string());
        }
    }

    /// Filters one delta chunk.
    ///
    /// Returns the text to deliver, or `None` while the accumulated chunks
    /// still match the expected echo. Leading whitespace before an echo is
    /// suppressed with it.
    pub fn filter_delta(&mut self, delta: &str) -> Option<String> {
        if self.expected.is_empty() && self.held.is_empty() {
            return Some(delta.to_string());
        }

        self.held.push_str(delta);
        loop {
            let Some(target) = self.expected.front() else {
                return Some(std::mem::take(&mut self.held));
            };

            let body = self.held.trim_start();
            let lead = self.held.len() - body.len();
            if target.starts_with(body) {
                if target.len() == body.len() {
                    trace!(len = target.len(), "Suppressed echoed tool output");
                    self.expected.pop_front();
                    self.held.clear();
                }
                return None;
            }

            if body.starts_with(target.as_str()) {
                let rest = self.held.split_off(lead + target.len());
                trace!(len = target.len(), "Suppressed echoed tool output");
                self.expected.pop_front();
                self.held = rest;
                if self.held.is_empty() {
                    return None;
                }
                continue;
            }

            self.expected.pop_front();
            return Some(std::mem::take(&mut self.held));
        }
    }

    /// Releases held text at the end of a message and drops pending echoes.
    pub fn take_pending(&mut self) -> Option<String> {
        self.expected.clear();
        if self.held.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.held))
        }
    }

    /// Whether chunks are currently held back.
    pub fn has_pending(&self) -> bool {
        !self.held.is_empty()
    }

    /// Drops expectations and held text without releasing it.
    pub fn reset(&mut self) {
        self.expected.clear();
        self.held.clear();
    }
}
