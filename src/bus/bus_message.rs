use super::Priority;
use crate::effector::{EffectorTelemetry, EngagementReport, SessionTransition};
use crate::evidence::{AnchorReceipt, EvidenceError, EvidenceKind, EvidenceRecord, NodeId};
use crate::lead::{ExpiredSolution, FireSolution};
use crate::track::{TrackId, TrackNotice, TrackUpdate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum_macros::Display;

/// Destination of a message, derived from its variant.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Track store ingestion and the lead worker behind it.
    TrackIngest,
    /// Solution inbox of the effector session.
    EffectorBoundary,
    /// Physical effector driver below the fire-command interface.
    EffectorDriver,
    /// Internal broadcast feed for operator displays.
    Operator,
    /// Evidence ledger only.
    Ledger,
}

/// Every message that flows through the targeting bus.
#[derive(Debug, Display, Clone)]
pub enum BusMessage {
    TrackUpdate(Arc<TrackUpdate>),
    TrackNotice(TrackNotice),
    /// Solution offered to the effector boundary.
    FireSolution(Arc<FireSolution>),
    /// Solution committed to the effector driver.
    FireCommand(Arc<FireSolution>),
    EngagementReport(Arc<EngagementReport>),
    SessionTransition(SessionTransition),
    SolutionExpired(ExpiredSolution),
    Telemetry(EffectorTelemetry),
    AnchorReceipt(AnchorReceipt),
}

impl BusMessage {
    pub fn route(&self) -> Route {
        match self {
            Self::TrackUpdate(_) => Route::TrackIngest,
            Self::FireSolution(_) => Route::EffectorBoundary,
            Self::FireCommand(_) => Route::EffectorDriver,
            Self::TrackNotice(_)
            | Self::EngagementReport(_)
            | Self::SessionTransition(_)
            | Self::SolutionExpired(_)
            | Self::Telemetry(_) => Route::Operator,
            Self::AnchorReceipt(_) => Route::Ledger,
        }
    }

    /// Kind of the evidence entry written once this message is delivered, if any.
    pub fn evidence_kind(&self) -> Option<EvidenceKind> {
        match self {
            Self::TrackUpdate(_) => Some(EvidenceKind::TrackUpdate),
            Self::FireCommand(_) => Some(EvidenceKind::FireSolution),
            Self::EngagementReport(_) => Some(EvidenceKind::EngagementReport),
            Self::SessionTransition(_) => Some(EvidenceKind::SessionTransition),
            Self::SolutionExpired(_) => Some(EvidenceKind::SolutionExpired),
            Self::AnchorReceipt(_) => Some(EvidenceKind::AnchorReceipt),
            Self::TrackNotice(_) | Self::FireSolution(_) | Self::Telemetry(_) => None,
        }
    }

    /// Track and sequence number used for per-track ordering.
    pub fn ordering_key(&self) -> Option<(TrackId, u64)> {
        match self {
            Self::TrackUpdate(u) => Some((u.track_id, u.seq)),
            Self::FireSolution(s) | Self::FireCommand(s) => Some((s.track_id(), s.track_seq())),
            _ => None,
        }
    }

    /// Sending and receiving component names.
    fn endpoints(&self) -> (&'static str, &'static str) {
        match self {
            Self::TrackUpdate(_) => ("fusion", "track-ingest"),
            Self::TrackNotice(_) => ("track-ingest", "operator"),
            Self::FireSolution(_) => ("lead-calculator", "effector-boundary"),
            Self::FireCommand(_) => ("effector-session", "effector-driver"),
            Self::EngagementReport(_) => ("effector-session", "evidence"),
            Self::SessionTransition(_) => ("effector-session", "evidence"),
            Self::SolutionExpired(_) => ("effector-boundary", "evidence"),
            Self::Telemetry(_) => ("effector-driver", "operator"),
            Self::AnchorReceipt(_) => ("anchor-scheduler", "evidence"),
        }
    }

    /// Evidence record for this message as seen by node `node`.
    ///
    /// # Errors
    /// - [`EvidenceError`] if the payload cannot be canonically encoded.
    pub fn evidence_record(&self, node: &str) -> Result<Option<EvidenceRecord>, EvidenceError> {
        let Some(kind) = self.evidence_kind() else { return Ok(None) };
        let (from, to) = self.endpoints();
        let (sender, receiver) = (NodeId::new(node, from), NodeId::new(node, to));
        let record = match self {
            Self::TrackUpdate(u) => EvidenceRecord::of(kind, u.as_ref(), sender, receiver),
            Self::FireCommand(s) => EvidenceRecord::of(kind, s.as_ref(), sender, receiver),
            Self::EngagementReport(r) => EvidenceRecord::of(kind, r.as_ref(), sender, receiver),
            Self::SessionTransition(t) => EvidenceRecord::of(kind, t, sender, receiver),
            Self::SolutionExpired(x) => EvidenceRecord::of(kind, x, sender, receiver),
            Self::AnchorReceipt(a) => EvidenceRecord::of(kind, a, sender, receiver),
            Self::TrackNotice(_) | Self::FireSolution(_) | Self::Telemetry(_) => return Ok(None),
        }?;
        Ok(Some(record))
    }
}

/// A message in flight together with its delivery metadata.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Submission order, unique per bus.
    pub ticket: u64,
    pub message: BusMessage,
    pub priority: Priority,
    /// Submission time; a retry keeps it.
    pub enqueued_at: Instant,
    pub budget: Duration,
    pub attempts: u8,
}

impl Envelope {
    pub fn new(ticket: u64, message: BusMessage, priority: Priority, budget: Duration) -> Self {
        Self { ticket, message, priority, enqueued_at: Instant::now(), budget, attempts: 0 }
    }

    pub fn age(&self) -> Duration { self.enqueued_at.elapsed() }

    pub fn is_expired(&self) -> bool { self.age() > self.budget }
}
