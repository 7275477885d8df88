//! Event Bus Implementation
//!
//! Transports source events from any number of producers to the single task
//! that owns the correlator. The correlator is only ever touched by that
//! task, so updates and connection changes are applied strictly one at a
//! time in arrival order.

use crate::output::{OutputError, RowSink};
use fidsync_event::SourceEvent;
use fidsync_ring::{Correlator, CorrelatorMetrics, MetricsSnapshot, RingError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel buffer size
    pub channel_size: usize,

    /// Evaluate the open output window when the bus shuts down
    pub drain_on_shutdown: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_size: 10000,
            drain_on_shutdown: false,
        }
    }
}

/// Handle for publishing events to the bus
#[derive(Debug, Clone)]
pub struct EventBusHandle {
    sender: mpsc::Sender<SourceEvent>,
    published: Arc<AtomicU64>,
    metrics: Arc<CorrelatorMetrics>,
}

impl EventBusHandle {
    /// Publish a single event
    pub async fn publish(&self, event: impl Into<SourceEvent>) -> Result<(), PublishError> {
        self.sender
            .send(event.into())
            .await
            .map_err(|_| PublishError::Closed)?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Try to publish without blocking
    pub fn try_publish(&self, event: impl Into<SourceEvent>) -> Result<(), PublishError> {
        self.sender.try_send(event.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Events accepted by the channel so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Get current correlator metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Final accounting returned by a clean shutdown
#[derive(Debug, Clone)]
pub struct BusReport {
    /// Events the worker consumed
    pub events_processed: u64,

    /// Rows written to the sink (including drained ones)
    pub rows_written: u64,

    /// Rows produced by the shutdown drain
    pub rows_drained: u64,

    /// Correlator counters at shutdown
    pub metrics: MetricsSnapshot,
}

/// Event bus owning the correlator
pub struct EventBus {
    worker: JoinHandle<Result<BusReport, BusError>>,
    handle: EventBusHandle,
}

impl EventBus {
    /// Start the worker task. Must be called inside a tokio runtime.
    ///
    /// The header is written to the sink before any event is consumed.
    pub fn new(config: EventBusConfig, correlator: Correlator, sink: Box<dyn RowSink>) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_size);
        let metrics = correlator.metrics();

        let handle = EventBusHandle {
            sender,
            published: Arc::new(AtomicU64::new(0)),
            metrics,
        };

        let worker = tokio::spawn(Self::worker(
            correlator,
            receiver,
            sink,
            config.drain_on_shutdown,
        ));

        Self { worker, handle }
    }

    /// Get a handle for publishing events
    pub fn handle(&self) -> EventBusHandle {
        self.handle.clone()
    }

    /// Close the bus and wait for the worker.
    ///
    /// The worker finishes once every handle has been dropped and the queue
    /// is empty. A fatal correlator error surfaces here.
    pub async fn shutdown(self) -> Result<BusReport, BusError> {
        let Self { worker, handle } = self;
        drop(handle);
        worker.await.map_err(|e| BusError::Worker(e.to_string()))?
    }

    async fn worker(
        mut correlator: Correlator,
        mut receiver: mpsc::Receiver<SourceEvent>,
        mut sink: Box<dyn RowSink>,
        drain_on_shutdown: bool,
    ) -> Result<BusReport, BusError> {
        sink.write_header(&correlator.source_names())?;

        let mut events_processed = 0u64;
        let mut rows_written = 0u64;

        while let Some(event) = receiver.recv().await {
            events_processed += 1;
            match event {
                SourceEvent::Update(update) => match correlator.record_update(&update) {
                    Ok(rows) => {
                        for row in &rows {
                            sink.write_row(row)?;
                        }
                        rows_written += rows.len() as u64;
                    }
                    // already reported by the correlator; the update is dropped
                    Err(e) => debug!(error = %e, "Update rejected"),
                },
                SourceEvent::Connection(change) => {
                    if let Err(e) = correlator.on_connection_change(&change) {
                        if e.is_fatal() {
                            error!(error = %e, "Fatal source configuration error, stopping");
                            receiver.close();
                            return Err(BusError::Fatal(e));
                        }
                        debug!(error = %e, "Connection change ignored");
                    }
                }
            }
        }

        let mut rows_drained = 0u64;
        if drain_on_shutdown {
            for row in correlator.drain() {
                sink.write_row(&row)?;
                rows_drained += 1;
            }
            rows_written += rows_drained;
        }
        sink.flush()?;

        let metrics = correlator.metrics().snapshot();
        info!(
            events = events_processed,
            rows = rows_written,
            dropped_slots = metrics.slots_dropped,
            "Event bus stopped"
        );

        Ok(BusReport {
            events_processed,
            rows_written,
            rows_drained,
            metrics,
        })
    }
}

/// Error publishing an event
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Event bus is full")]
    Full,
}

/// Error reported by the bus worker
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Fatal correlator error: {0}")]
    Fatal(RingError),

    #[error("Row output error: {0}")]
    Output(#[from] OutputError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}
