//! Frame-aligned batching with key-based coalescing.
//!
//! The dispatcher accumulates enriched events in a write buffer and hands
//! them to consumers in one batch per flush. The first event after an idle
//! period flushes immediately; later events wait for the next frame
//! boundary, which is tracked as a deadline the owner drives with
//! [`BatchDispatcher::poll`].
//!
//! All time-dependent operations have an `_at` variant taking the current
//! instant explicitly.

use crate::coalescing::coalescing_key;
use agentbus_proto::{BusEvent, EnrichedBusEvent};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifies a registered consumer.
pub type ConsumerId = u64;

/// Computes the coalescing key of an event.
pub type KeyFn = fn(&BusEvent) -> Option<String>;

type Consumer = Box<dyn FnMut(&[EnrichedBusEvent]) + Send>;

/// Counters describing dispatcher throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherMetrics {
    pub total_enqueued: u64,
    /// Events replaced in place by a later event with the same key.
    pub total_coalesced: u64,
    pub total_flushed: u64,
    pub flush_count: u64,
    pub last_flush_size: usize,
    /// Wall-clock time spent in consumers during the last flush.
    pub last_flush_duration: Duration,
}

/// Buffers enriched events and delivers them to consumers once per frame.
pub struct BatchDispatcher {
    flush_interval: Duration,
    key_fn: KeyFn,

    write_buffer: Vec<EnrichedBusEvent>,
    read_buffer: Vec<EnrichedBusEvent>,

    /// Coalescing key to index in `write_buffer`.
    key_index: HashMap<String, usize>,

    consumers: Vec<(ConsumerId, Consumer)>,
    next_consumer_id: ConsumerId,

    last_flush: Option<Instant>,
    deadline: Option<Instant>,

    metrics: DispatcherMetrics,
}

impl BatchDispatcher {
    /// Creates a dispatcher flushing every `flush_interval`.
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            flush_interval,
            key_fn: coalescing_key,
            write_buffer: Vec::new(),
            read_buffer: Vec::new(),
            key_index: HashMap::new(),
            consumers: Vec::new(),
            next_consumer_id: 0,
            last_flush: None,
            deadline: None,
            metrics: DispatcherMetrics::default(),
        }
    }

    /// Replaces the coalescing key function.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Configured flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Registers a batch consumer. Consumers run in registration order.
    pub fn add_consumer<F>(&mut self, consumer: F) -> ConsumerId
    where
        F: FnMut(&[EnrichedBusEvent]) + Send + 'static,
    {
        self.next_consumer_id += 1;
        let id = self.next_consumer_id;
        self.consumers.push((id, Box::new(consumer)));
        id
    }

    /// Removes a consumer. Returns `false` if it was already gone.
    pub fn remove_consumer(&mut self, id: ConsumerId) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|(consumer_id, _)| *consumer_id != id);
        self.consumers.len() != before
    }

    /// Number of registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Buffers an event, timed against the current instant.
    pub fn enqueue(&mut self, event: EnrichedBusEvent) {
        self.enqueue_at(event, Instant::now());
    }

    /// Buffers `event`, coalescing it with a pending event of the same key.
    ///
    /// A coalesced event takes the earlier event's position. An overdue
    /// deadline is honored before the event is buffered.
    pub fn enqueue_at(&mut self, event: EnrichedBusEvent, now: Instant) {
        self.metrics.total_enqueued += 1;

        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.flush_at(now);
        }

        let key = (self.key_fn)(&event.event);
        if let Some(index) = key.as_ref().and_then(|key| self.key_index.get(key)).copied() {
            trace!(key = ?key, index, "Coalescing event");
            self.write_buffer[index] = event;
            self.metrics.total_coalesced += 1;
            return;
        }

        if let Some(key) = key {
            self.key_index.insert(key, self.write_buffer.len());
        }
        self.write_buffer.push(event);
        self.schedule(now);
    }

    fn schedule(&mut self, now: Instant) {
        if self.deadline.is_some() {
            return;
        }
        match self.last_flush {
            Some(last) if now.saturating_duration_since(last) < self.flush_interval => {
                self.deadline = Some(last + self.flush_interval);
            }
            _ => self.flush_at(now),
        }
    }

    /// The instant the next scheduled flush is due, if one is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flushes if the armed deadline has passed. Returns whether it flushed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.flush_at(now);
            true
        } else {
            false
        }
    }

    /// Delivers the buffered batch now.
    pub fn flush(&mut self) {
        self.flush_at(Instant::now());
    }

    /// Delivers the buffered batch to every consumer.
    ///
    /// Flushing an empty buffer does nothing.
    pub fn flush_at(&mut self, now: Instant) {
        self.deadline = None;
        if self.write_buffer.is_empty() {
            return;
        }

        self.read_buffer.clear();
        std::mem::swap(&mut self.write_buffer, &mut self.read_buffer);
        self.key_index.clear();
        self.last_flush = Some(now);

        let started = std::time::Instant::now();
        for (_, consumer) in &mut self.consumers {
            consumer(&self.read_buffer);
        }

        let size = self.read_buffer.len();
        self.metrics.total_flushed += size as u64;
        self.metrics.flush_count += 1;
        self.metrics.last_flush_size = size;
        self.metrics.last_flush_duration = started.elapsed();
        trace!(size, consumers = self.consumers.len(), "Flushed batch");

        self.read_buffer.clear();
    }

    /// Number of events waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.write_buffer.len()
    }

    /// Snapshot of the throughput counters.
    pub fn metrics(&self) -> DispatcherMetrics {
        self.metrics
    }

    /// Drops buffered events and consumers and zeroes the metrics.
    ///
    /// Safe to call repeatedly; the dispatcher can be reused afterwards.
    pub fn dispose(&mut self) {
        if !self.write_buffer.is_empty() {
            debug!(dropped = self.write_buffer.len(), "Disposing dispatcher with pending events");
        }
        self.deadline = None;
        self.last_flush = None;
        self.write_buffer.clear();
        self.read_buffer.clear();
        self.key_index.clear();
        self.consumers.clear();
        self.metrics = DispatcherMetrics::default();
    }
}
