/// Batched, fire-and-forget forwarding of security events
pub mod exporter;
pub mod sinks;
/// Background thread keeping export off the request path
pub mod worker;

pub use exporter::EventExporter;
pub use sinks::{EventSink, HttpSink, MockSink};
pub use worker::{ExportReport, ExportWorker};
