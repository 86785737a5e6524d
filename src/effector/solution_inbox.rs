use crate::bus::{BusMessage, DeliveryError, Envelope, MessageSink};
use crate::event;
use crate::lead::{FireSolution, SolutionId};
use crate::track::TrackId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Fire solutions offered to the effector boundary and not yet consumed.
#[derive(Debug, Default)]
pub struct SolutionInbox {
    offers: Mutex<HashMap<SolutionId, Arc<FireSolution>>>,
}

impl SolutionInbox {
    pub fn new() -> Self { Self::default() }

    fn lock_offers(&self) -> std::sync::MutexGuard<HashMap<SolutionId, Arc<FireSolution>>> {
        self.offers.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock")
    }

    pub fn offer(&self, solution: Arc<FireSolution>) { self.lock_offers().insert(solution.id(), solution); }

    /// Removes the offer, marking it consumed at the boundary.
    pub fn take(&self, id: SolutionId) -> Option<Arc<FireSolution>> { self.lock_offers().remove(&id) }

    /// Most recently generated offer for `track`.
    pub fn latest_for(&self, track: TrackId) -> Option<Arc<FireSolution>> {
        self.lock_offers()
            .values()
            .filter(|s| s.track_id() == track)
            .max_by_key(|s| s.generated_at())
            .cloned()
    }

    /// Removes and returns every offer whose `valid_until` has passed.
    pub fn drain_expired(&self, now: DateTime<Utc>) -> Vec<Arc<FireSolution>> {
        let mut offers = self.lock_offers();
        let expired: Vec<SolutionId> = offers.values().filter(|s| s.is_expired(now)).map(|s| s.id()).collect();
        expired.iter().filter_map(|id| offers.remove(id)).collect()
    }

    pub fn len(&self) -> usize { self.lock_offers().len() }

    pub fn is_empty(&self) -> bool { self.lock_offers().is_empty() }
}

impl MessageSink for SolutionInbox {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let BusMessage::FireSolution(solution) = &envelope.message else {
            return Err(DeliveryError::Rejected(format!("effector boundary cannot handle {}", envelope.message)));
        };
        event!("Offered {} for {} (TTI {:.3} s)", solution.id(), solution.track_id(), solution.time_to_intercept());
        self.offer(Arc::clone(solution));
        Ok(())
    }
}
