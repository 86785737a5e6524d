use super::track_update::{TrackId, TrackSnapshot, TrackUpdate};
use crate::common::Vec3;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reasons for rejecting a [`TrackUpdate`] at ingestion.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RejectReason {
    #[error("sequence {got} does not advance past {last} for this track")]
    NonIncreasingSequence { last: u64, got: u64 },
    #[error("retired track id reused with sequence {got} <= {retired_seq}")]
    ReusedExpiredTrack { retired_seq: u64, got: u64 },
    #[error("{which} covariance is not positive-semidefinite")]
    InvalidCovariance { which: &'static str },
    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("non-finite kinematic state")]
    NonFiniteState,
}

/// One occupied arena slot.
#[derive(Debug)]
struct TrackSlot {
    latest: Arc<TrackUpdate>,
    received_at: DateTime<Utc>,
}

/// Tombstone kept for an evicted track id.
#[derive(Debug, Clone, Copy)]
struct RetiredTrack {
    last_seq: u64,
    retired_at: DateTime<Utc>,
}

/// Latest state estimate per tracked object.
///
/// Tracks live in an arena of slots addressed through a `TrackId → slot` index, so
/// high-frequency creation and eviction recycles slots instead of growing. Entries are
/// shared as `Arc<TrackUpdate>`: a superseded update stays alive only while an
/// in-flight lead computation still holds its snapshot.
#[derive(Debug)]
pub struct TrackStore {
    slots: Vec<Option<TrackSlot>>,
    free: Vec<usize>,
    index: HashMap<TrackId, usize>,
    retired: HashMap<TrackId, RetiredTrack>,
    staleness_window: TimeDelta,
    retired_retention: TimeDelta,
}

impl TrackStore {
    /// Tolerance for rounding noise when checking covariances.
    const COV_TOL: f64 = 1e-9;

    pub fn new(staleness_window: Duration, retired_retention: Duration) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            retired: HashMap::new(),
            staleness_window: TimeDelta::from_std(staleness_window).unwrap_or(TimeDelta::MAX),
            retired_retention: TimeDelta::from_std(retired_retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Validates and stores `update`, superseding the previous estimate for its track.
    ///
    /// # Errors
    /// - [`RejectReason`] if the sequence does not advance, a covariance is not PSD, the
    ///   confidence is out of range, the state is not finite or a retired id is reused
    ///   with a stale sequence.
    pub fn ingest(&mut self, update: impl Into<Arc<TrackUpdate>>) -> Result<(), RejectReason> {
        self.ingest_at(update, Utc::now())
    }

    pub fn ingest_at(&mut self, update: impl Into<Arc<TrackUpdate>>, now: DateTime<Utc>) -> Result<(), RejectReason> {
        let update = update.into();
        Self::validate(&update)?;
        if let Some(slot) = self.index.get(&update.track_id).and_then(|idx| self.slots[*idx].as_mut()) {
            if update.seq <= slot.latest.seq {
                return Err(RejectReason::NonIncreasingSequence { last: slot.latest.seq, got: update.seq });
            }
            slot.latest = update;
            slot.received_at = now;
            return Ok(());
        }
        if let Some(retired) = self.retired.get(&update.track_id) {
            if update.seq <= retired.last_seq {
                return Err(RejectReason::ReusedExpiredTrack { retired_seq: retired.last_seq, got: update.seq });
            }
            self.retired.remove(&update.track_id);
        }
        let slot = TrackSlot { latest: update, received_at: now };
        let track_id = slot.latest.track_id;
        let slot_idx = if let Some(free_idx) = self.free.pop() {
            self.slots[free_idx] = Some(slot);
            free_idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        };
        self.index.insert(track_id, slot_idx);
        Ok(())
    }

    fn validate(update: &TrackUpdate) -> Result<(), RejectReason> {
        if !(0.0..=1.0).contains(&update.confidence) {
            return Err(RejectReason::InvalidConfidence(update.confidence));
        }
        if !update.position.is_finite() || !update.velocity.is_finite() || !update.acceleration.is_finite() {
            return Err(RejectReason::NonFiniteState);
        }
        if !update.position_cov.is_positive_semidefinite(Self::COV_TOL) {
            return Err(RejectReason::InvalidCovariance { which: "position" });
        }
        if !update.velocity_cov.is_positive_semidefinite(Self::COV_TOL) {
            return Err(RejectReason::InvalidCovariance { which: "velocity" });
        }
        Ok(())
    }

    /// Read-only snapshot of the latest update for `track_id`.
    pub fn get(&self, track_id: TrackId) -> Option<Arc<TrackUpdate>> {
        self.slot(track_id).map(|slot| Arc::clone(&slot.latest))
    }

    pub fn snapshot(&self, track_id: TrackId) -> Option<TrackSnapshot> {
        self.slot(track_id).map(|slot| slot.latest.snapshot())
    }

    /// Position of `track_id` extrapolated by `dt` seconds from its last measurement.
    pub fn predict_position(&self, track_id: TrackId, dt: f64) -> Option<Vec3<f64>> {
        self.slot(track_id).map(|slot| slot.latest.predict_position(dt))
    }

    /// Removes every track whose last update is older than the staleness window and
    /// forgets tombstones older than the retention window.
    ///
    /// # Returns
    /// - The ids of the evicted tracks.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<TrackId> {
        let stale: Vec<TrackId> = self
            .index
            .iter()
            .filter(|(_, idx)| {
                self.slots[**idx].as_ref().is_some_and(|s| now - s.received_at > self.staleness_window)
            })
            .map(|(id, _)| *id)
            .collect();
        for track_id in &stale {
            if let Some(slot_idx) = self.index.remove(track_id) {
                if let Some(slot) = self.slots[slot_idx].take() {
                    self.retired.insert(*track_id, RetiredTrack { last_seq: slot.latest.seq, retired_at: now });
                }
                self.free.push(slot_idx);
            }
        }
        let retention = self.retired_retention;
        self.retired.retain(|_, r| now - r.retired_at <= retention);
        stale
    }

    pub fn len(&self) -> usize { self.index.len() }

    pub fn is_empty(&self) -> bool { self.index.is_empty() }

    /// Number of allocated arena slots, occupied or free.
    pub fn capacity(&self) -> usize { self.slots.len() }

    fn slot(&self, track_id: TrackId) -> Option<&TrackSlot> {
        self.index.get(&track_id).and_then(|idx| self.slots[*idx].as_ref())
    }
}
