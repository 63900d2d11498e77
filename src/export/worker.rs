use crate::events::SecurityEvent;
use crate::export::exporter::EventExporter;
use log::{debug, info, warn};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

/// Messages sent to the export thread
#[derive(Debug)]
enum ExportMessage {
    Events(Vec<SecurityEvent>),
    Shutdown,
}

/// Delivery totals reported when the export thread stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Events the sink accepted
    pub delivered: usize,
    /// Events lost to a full queue, a full buffer or a failed send
    pub dropped: usize,
}

/// Runs an [`EventExporter`] on its own thread and runtime
///
/// Callers hand events over with [`submit`](Self::submit), which never waits on the
/// sink. Events that do not fit in the hand-off queue are dropped.
pub struct ExportWorker {
    sender: SyncSender<ExportMessage>,
    handle: JoinHandle<ExportReport>,
    /// Events rejected because the hand-off queue was full
    rejected: usize,
}

impl ExportWorker {
    /// Start the export thread
    ///
    /// # Errors
    ///
    /// Fails if the async runtime or the thread cannot be created.
    pub fn spawn(mut exporter: EventExporter) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let (sender, receiver) = mpsc::sync_channel(exporter.max_pending());

        let handle = std::thread::Builder::new()
            .name("event-export".to_string())
            .spawn(move || {
                info!("Export thread started");
                let mut delivered = 0;

                while let Ok(message) = receiver.recv() {
                    match message {
                        ExportMessage::Events(events) => {
                            if exporter.enqueue(events) {
                                delivered += runtime.block_on(exporter.flush());
                            }
                        }
                        ExportMessage::Shutdown => {
                            info!("Export thread received shutdown signal");
                            break;
                        }
                    }
                }

                delivered += runtime.block_on(exporter.flush());
                info!("Export thread stopped");

                ExportReport {
                    delivered,
                    dropped: exporter.dropped_count(),
                }
            })?;

        Ok(Self {
            sender,
            handle,
            rejected: 0,
        })
    }

    /// Hand events to the export thread without blocking
    pub fn submit(&mut self, events: Vec<SecurityEvent>) {
        if events.is_empty() {
            return;
        }

        let count = events.len();
        match self.sender.try_send(ExportMessage::Events(events)) {
            Ok(()) => debug!("Queued {} security events for export", count),
            Err(TrySendError::Full(_)) => {
                self.rejected += count;
                warn!("Export queue full, dropping {} security events", count);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.rejected += count;
                warn!("Export thread stopped, dropping {} security events", count);
            }
        }
    }

    /// Flush what is pending, stop the thread and wait for it
    pub fn shutdown(self) -> ExportReport {
        if let Err(e) = self.sender.send(ExportMessage::Shutdown) {
            debug!("Export thread already stopped: {}", e);
        }

        match self.handle.join() {
            Ok(mut report) => {
                report.dropped += self.rejected;
                report
            }
            Err(_) => {
                warn!("Export thread panicked");
                ExportReport {
                    delivered: 0,
                    dropped: self.rejected,
                }
            }
        }
    }
}
