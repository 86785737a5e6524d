//! Priority-queued message routing between track ingestion, lead computation, the
//! effector boundary and the evidence ledger.

mod bus_message;
mod bus_stats;
mod message_sink;
mod priority_queue;
mod targeting_bus;
#[cfg(test)]
pub(crate) mod tests;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub use bus_message::{BusMessage, Envelope, Route};
pub use bus_stats::BusStatsSnapshot;
pub use message_sink::{DeliveryError, MessageSink};
pub use targeting_bus::{BusError, TargetingBus};

/// Delivery class of a bus message. Declaration order is the dispatch order, lowest first.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Effector telemetry.
    Low,
    /// New-track notices.
    Normal,
    /// Track updates for engaged tracks.
    High,
    /// Fire solutions, fire commands, engagement reports. Never queued.
    Critical,
}
