use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::events::SecurityEvent;
use crate::export::sinks::{EventSink, HttpSink};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Batches security events and forwards them to a sink
///
/// Delivery is fire-and-forget: a failed batch is logged and dropped, and no error
/// ever propagates to the caller. When more than `max_pending` events are waiting,
/// the oldest are dropped.
pub struct EventExporter {
    sink: Arc<dyn EventSink>,
    pending: VecDeque<SecurityEvent>,
    batch_size: usize,
    max_pending: usize,
    /// Events dropped because the buffer was full or the sink failed
    dropped: usize,
}

impl EventExporter {
    /// Create an exporter around an existing sink
    ///
    /// # Arguments
    ///
    /// * `sink` - Destination for event batches
    /// * `batch_size` - Maximum events per request
    /// * `max_pending` - Maximum events buffered between flushes
    pub fn new(sink: Arc<dyn EventSink>, batch_size: usize, max_pending: usize) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            batch_size: batch_size.max(1),
            max_pending: max_pending.max(1),
            dropped: 0,
        }
    }

    /// Create an HTTP exporter from configuration
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no endpoint is configured
    pub fn from_config(config: &ExportConfig) -> Result<Option<Self>, ExportError> {
        let Some(ref endpoint) = config.endpoint else {
            return Ok(None);
        };

        info!("Exporting security events to {}", endpoint);
        let sink = HttpSink::new(
            endpoint.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?;
        Ok(Some(Self::new(
            Arc::new(sink),
            config.batch_size,
            config.max_pending,
        )))
    }

    /// Buffer events for the next flush
    ///
    /// # Returns
    ///
    /// `true` if at least one full batch is waiting
    pub fn enqueue<I>(&mut self, events: I) -> bool
    where
        I: IntoIterator<Item = SecurityEvent>,
    {
        for event in events {
            if self.pending.len() >= self.max_pending {
                if let Some(oldest) = self.pending.pop_front() {
                    self.dropped += 1;
                    warn!(
                        "Export buffer full, dropping oldest event: {}",
                        oldest.event
                    );
                }
            }
            self.pending.push_back(event);
        }
        self.batch_ready()
    }

    pub fn batch_ready(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    /// Send every buffered event in batches
    ///
    /// # Returns
    ///
    /// Number of events the sink accepted
    pub async fn flush(&mut self) -> usize {
        let mut delivered = 0;

        while !self.pending.is_empty() {
            let take = self.batch_size.min(self.pending.len());
            let batch: Vec<SecurityEvent> = self.pending.drain(..take).collect();

            match self.sink.send(&batch).await {
                Ok(()) => {
                    debug!("Exported {} security events", batch.len());
                    delivered += batch.len();
                }
                Err(e) => {
                    self.dropped += batch.len();
                    warn!("Failed to export {} security events: {}", batch.len(), e);
                }
            }
        }

        delivered
    }

    /// Number of events waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Maximum events buffered between flushes
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Number of events lost to a full buffer or a failed send
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }
}
