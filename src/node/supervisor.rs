use crate::bus::{BusMessage, Priority, TargetingBus};
use crate::effector::SolutionInbox;
use crate::lead::ExpiredSolution;
use crate::track::{TrackId, TrackStore};
use crate::{info, warn};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one supervisor sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<TrackId>,
    pub expired: usize,
}

/// Periodic housekeeping: evicts stale tracks and retires fire solutions that expired
/// unused at the effector boundary.
pub struct Supervisor {
    tracks: Arc<RwLock<TrackStore>>,
    inbox: Arc<SolutionInbox>,
    bus: Arc<TargetingBus>,
    sweep_interval: Duration,
}

impl Supervisor {
    pub fn new(
        tracks: Arc<RwLock<TrackStore>>,
        inbox: Arc<SolutionInbox>,
        bus: Arc<TargetingBus>,
        sweep_interval: Duration,
    ) -> Self {
        Self { tracks, inbox, bus, sweep_interval }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.sweep_interval) => {}
            }
            self.sweep(Utc::now());
        }
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let evicted = self.tracks.write().expect("[FATAL] RwLock poisoned: Failed to acquire lock").evict_stale(now);
        for track in &evicted {
            self.bus.forget_track(*track);
            info!("Evicted stale track {track}");
        }
        let expired = self.inbox.drain_expired(now);
        for solution in &expired {
            warn!("Solution {} for {} expired unused", solution.id(), solution.track_id());
            // the offer is already gone from the inbox, so its record must not wait in the queue
            let message = BusMessage::SolutionExpired(ExpiredSolution::of(solution, now));
            if let Err(e) = self.bus.send(message, Priority::Critical) {
                warn!("Expiry of {} not logged: {e}", solution.id());
            }
        }
        SweepReport { evicted, expired: expired.len() }
    }
}
