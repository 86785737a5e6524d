//! Composition of one targeting node and its long-running services.

mod lead_worker;
mod node_context;
mod supervisor;
mod track_ingest;
#[cfg(test)]
mod tests;

pub use lead_worker::LeadWorker;
pub use node_context::NodeContext;
pub use supervisor::{SweepReport, Supervisor};
pub use track_ingest::{IngestEvent, TrackIngestSink};
