//! Latest-state storage for fused tracks and the data types the fusion engine hands
//! to the targeting bus.

mod track_store;
mod track_update;

pub use track_store::{RejectReason, TrackStore};
pub use track_update::{ThreatClass, TrackId, TrackNotice, TrackSnapshot, TrackUpdate};
