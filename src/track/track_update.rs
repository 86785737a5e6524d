use crate::bus::Priority;
use crate::common::{Mat3, Vec3};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Opaque key of one fused track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "T{:04}", self.0) }
}

/// Threat classification label as produced by the fusion engine.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatClass {
    Unknown,
    Bird,
    FriendlyAircraft,
    SmallUas,
    FixedWingUas,
}

impl ThreatClass {
    /// Only hostile uncrewed classes are engageable.
    pub fn is_threat(self) -> bool { matches!(self, ThreatClass::SmallUas | ThreatClass::FixedWingUas) }
}

/// One sensor-fusion observation of one object.
///
/// A `TrackUpdate` is never mutated; the fusion engine supersedes it by sending a new
/// update for the same [`TrackId`] with a larger sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub track_id: TrackId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub position: Vec3<f64>,
    pub position_cov: Mat3<f64>,
    pub velocity: Vec3<f64>,
    pub velocity_cov: Mat3<f64>,
    pub acceleration: Vec3<f64>,
    pub classification: ThreatClass,
    /// Classification confidence in `[0, 1]`.
    pub confidence: f64,
    pub engagement_authorized: bool,
    pub priority: Priority,
}

impl TrackUpdate {
    /// Kinematic prediction `p + v·dt + ½·a·dt²`.
    pub fn predict_position(&self, dt: f64) -> Vec3<f64> {
        self.position + self.velocity * dt + self.acceleration * (0.5 * dt * dt)
    }

    /// Seconds elapsed between the measurement and `now` (never negative).
    #[allow(clippy::cast_precision_loss)]
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let dt = now - self.timestamp;
        dt.num_microseconds().map_or(f64::MAX, |us| us.max(0) as f64 / 1e6)
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.track_id,
            seq: self.seq,
            timestamp: self.timestamp,
            position: self.position,
            velocity: self.velocity,
        }
    }
}

/// Compact sensor snapshot attached to engagement reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub track_id: TrackId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub position: Vec3<f64>,
    pub velocity: Vec3<f64>,
}

/// Announcement that the fusion engine started tracking a new object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackNotice {
    pub track_id: TrackId,
    pub classification: ThreatClass,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
}
