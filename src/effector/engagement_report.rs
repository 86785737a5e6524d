use super::effector_driver::EffectorTelemetry;
use super::session_state::SessionState;
use crate::evidence::{Digest, EvidenceError, EvidenceSigner, content_digest, verify_signature};
use crate::lead::SolutionId;
use crate::track::{TrackId, TrackSnapshot};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(pub Uuid);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortReason {
    OperatorAbort,
    DriverRefused,
}

/// Result of one dispatched fire command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngagementOutcome {
    Hit { capture_confirmed: bool },
    Miss { estimated_miss_distance: f64 },
    Aborted { reason: AbortReason },
    EffectorMalfunction { error: String },
}

impl EngagementOutcome {
    /// Session state the outcome leaves the effector in.
    pub fn resulting_state(&self) -> SessionState {
        match self {
            Self::Hit { .. } | Self::Miss { .. } => SessionState::Safed,
            Self::Aborted { .. } => SessionState::Aborted,
            Self::EffectorMalfunction { .. } => SessionState::Malfunction,
        }
    }
}

impl std::fmt::Display for EngagementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit { capture_confirmed } => write!(f, "Hit (capture confirmed: {capture_confirmed})"),
            Self::Miss { estimated_miss_distance } => write!(f, "Miss by ~{estimated_miss_distance:.1} m"),
            Self::Aborted { reason } => write!(f, "Aborted ({reason})"),
            Self::EffectorMalfunction { error } => write!(f, "Malfunction: {error}"),
        }
    }
}

/// Everything covered by the content hash of an [`EngagementReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementReportBody {
    pub id: ReportId,
    pub solution_id: SolutionId,
    pub solution_hash: Digest,
    pub track_id: TrackId,
    pub fire_command_at: DateTime<Utc>,
    /// `None` if the launcher never released.
    pub released_at: Option<DateTime<Utc>>,
    pub outcome: EngagementOutcome,
    pub pre_engagement: Option<TrackSnapshot>,
    pub post_engagement: Option<TrackSnapshot>,
    pub telemetry: EffectorTelemetry,
    pub reported_at: DateTime<Utc>,
}

/// Signed outcome record of one dispatched fire solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementReport {
    body: EngagementReportBody,
    content_hash: Digest,
    signature: Signature,
}

impl EngagementReport {
    /// # Errors
    /// - [`EvidenceError`] if the body cannot be canonically encoded.
    pub fn sign(body: EngagementReportBody, signer: &EvidenceSigner) -> Result<Self, EvidenceError> {
        let (_, content_hash) = content_digest(&body)?;
        let signature = signer.sign(&content_hash);
        Ok(Self { body, content_hash, signature })
    }

    pub fn verify(&self, key: &VerifyingKey) -> bool {
        content_digest(&self.body).is_ok_and(|(_, digest)| digest == self.content_hash)
            && verify_signature(key, &self.content_hash, &self.signature)
    }

    pub fn body(&self) -> &EngagementReportBody { &self.body }
    pub fn id(&self) -> ReportId { self.body.id }
    pub fn solution_id(&self) -> SolutionId { self.body.solution_id }
    pub fn track_id(&self) -> TrackId { self.body.track_id }
    pub fn outcome(&self) -> &EngagementOutcome { &self.body.outcome }
    pub fn content_hash(&self) -> Digest { self.content_hash }
}
