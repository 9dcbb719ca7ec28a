//! The assembled event pipeline.
//!
//! `publish → validate → enrich → batch → map → callback`
//!
//! [`EventPipeline`] wires an [`EventBus`], a [`BatchDispatcher`] and a
//! [`StreamPipelineConsumer`] together and can be driven synchronously (the
//! owner calls [`EventPipeline::poll`] at the deadline) or spawned as a tokio
//! task that owns the timer and is fed through a [`PipelineHandle`].

use crate::config::PipelineConfig;
use crate::debug_log::DebugEventLog;
use crate::dispatcher::{BatchDispatcher, DispatcherMetrics};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::stream_consumer::StreamPipelineConsumer;
use agentbus_proto::{BusEvent, ValidationError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bus, dispatcher and stream consumer wired together.
pub struct EventPipeline {
    bus: EventBus,
    dispatcher: BatchDispatcher,
    stream: StreamPipelineConsumer,
}

impl EventPipeline {
    /// Builds a pipeline. Pipelines in one process share one debug log; a
    /// log that fails to open is logged and skipped.
    pub fn new(config: &PipelineConfig) -> Self {
        let mut bus = EventBus::new();
        if config.debug_log.enabled {
            match DebugEventLog::shared(&config.debug_log) {
                Ok(log) => bus = bus.with_debug_log(log),
                Err(err) => warn!(error = %err, "Debug event log disabled: failed to open"),
            }
        }

        let stream = StreamPipelineConsumer::new();
        let mut dispatcher = BatchDispatcher::new(config.flush_interval());
        let consumer = stream.clone();
        dispatcher.add_consumer(move |batch| consumer.process_batch(batch));

        Self {
            bus,
            dispatcher,
            stream,
        }
    }

    /// The bus every published event passes through.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The consumer turning batches into stream parts.
    pub fn stream(&self) -> &StreamPipelineConsumer {
        &self.stream
    }

    /// Access to register extra batch consumers.
    pub fn dispatcher_mut(&mut self) -> &mut BatchDispatcher {
        &mut self.dispatcher
    }

    /// Dispatcher throughput counters.
    pub fn metrics(&self) -> DispatcherMetrics {
        self.dispatcher.metrics()
    }

    /// Publishes an event timed against the current instant.
    pub fn publish(&mut self, event: BusEvent) -> Result<(), ValidationError> {
        self.publish_at(event, Instant::now())
    }

    /// Publishes on the bus, then enriches and batches the event.
    ///
    /// An invalid event stops at the bus and is not batched.
    pub fn publish_at(&mut self, event: BusEvent, now: Instant) -> Result<(), ValidationError> {
        self.bus.publish(&event)?;
        let enriched = self.stream.enrich(&event);
        self.dispatcher.enqueue_at(enriched, now);
        Ok(())
    }

    /// Flushes if the batch deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.dispatcher.poll(now)
    }

    /// When the pending batch is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.dispatcher.next_deadline()
    }

    /// Delivers pending events immediately.
    pub fn flush(&mut self) {
        self.dispatcher.flush();
    }

    /// Delivers pending events, then clears correlation and echo state.
    pub fn reset(&mut self) {
        self.dispatcher.flush();
        self.stream.reset();
    }

    /// Drops pending events, consumers and bus handlers.
    pub fn dispose(&mut self) {
        self.dispatcher.dispose();
        self.bus.clear();
        self.stream.reset();
    }

    /// Moves the pipeline onto a tokio task.
    pub fn spawn(self) -> (PipelineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (PipelineHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(flush_interval = ?self.dispatcher.flush_interval(), "Event pipeline started");
        loop {
            let deadline = self.dispatcher.next_deadline();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Publish(event)) => {
                        if let Err(err) = self.publish(event) {
                            debug!(error = %err, "Rejected event");
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.flush();
                        let _ = ack.send(self.metrics());
                    }
                    Some(Command::Reset) => self.reset(),
                    Some(Command::Shutdown(ack)) => {
                        self.flush();
                        self.dispose();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.flush();
                        self.dispose();
                        break;
                    }
                },
                () = sleep_until(deadline) => {
                    self.poll(Instant::now());
                }
            }
        }
        info!("Event pipeline stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Command {
    Publish(BusEvent),
    Flush(oneshot::Sender<DispatcherMetrics>),
    Reset,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable sender side of a spawned pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PipelineHandle {
    /// Queues an event. Validation failures are logged by the task.
    pub fn publish(&self, event: BusEvent) -> Result<(), PipelineError> {
        self.send(Command::Publish(event))
    }

    /// Asks the task to reset the pipeline.
    pub fn reset(&self) -> Result<(), PipelineError> {
        self.send(Command::Reset)
    }

    /// Flushes everything queued before this call and returns the metrics.
    pub async fn flush(&self) -> Result<DispatcherMetrics, PipelineError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Flush(ack))?;
        done.await.map_err(|_| PipelineError::Closed)
    }

    /// Flushes, disposes the pipeline and waits for the task to stop.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown(ack))?;
        done.await.map_err(|_| PipelineError::Closed)
    }

    /// True once the pipeline task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), PipelineError> {
        self.tx.send(command).map_err(|_| PipelineError::Closed)
    }
}
