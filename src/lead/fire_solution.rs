use crate::common::Vec3;
use crate::evidence::{Digest, EvidenceError, EvidenceSigner, content_digest, verify_signature};
use crate::track::TrackId;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one fire solution. Re-computation always yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SolutionId(pub Uuid);

impl std::fmt::Display for SolutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S-{}", &self.0.simple().to_string()[..8])
    }
}

/// Reference to the authorization token a solution was computed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthTokenRef(pub String);

/// Everything covered by the content hash of a [`FireSolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireSolutionBody {
    pub id: SolutionId,
    pub track_id: TrackId,
    pub track_seq: u64,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub aim_point: Vec3<f64>,
    pub time_to_intercept: f64,
    pub hit_probability: f64,
    pub effector_id: String,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub launch_speed: Option<f64>,
    pub auth_token_ref: Option<AuthTokenRef>,
}

/// A signed, time-bounded proposal to engage one track.
///
/// The body is only reachable through getters; once signed a solution cannot change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireSolution {
    body: FireSolutionBody,
    content_hash: Digest,
    signature: Signature,
}

impl FireSolution {
    /// Hashes and signs `body`.
    ///
    /// # Errors
    /// - [`EvidenceError`] if the body cannot be canonically encoded.
    pub fn sign(body: FireSolutionBody, signer: &EvidenceSigner) -> Result<Self, EvidenceError> {
        let (_, content_hash) = content_digest(&body)?;
        let signature = signer.sign(&content_hash);
        Ok(Self { body, content_hash, signature })
    }

    /// Recomputes the content hash and checks the signature against `key`.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        content_digest(&self.body).is_ok_and(|(_, digest)| digest == self.content_hash)
            && verify_signature(key, &self.content_hash, &self.signature)
    }

    /// `true` once `now` has reached `valid_until`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.body.valid_until }

    pub fn id(&self) -> SolutionId { self.body.id }
    pub fn track_id(&self) -> TrackId { self.body.track_id }
    pub fn track_seq(&self) -> u64 { self.body.track_seq }
    pub fn generated_at(&self) -> DateTime<Utc> { self.body.generated_at }
    pub fn valid_until(&self) -> DateTime<Utc> { self.body.valid_until }
    pub fn aim_point(&self) -> Vec3<f64> { self.body.aim_point }
    pub fn time_to_intercept(&self) -> f64 { self.body.time_to_intercept }
    pub fn hit_probability(&self) -> f64 { self.body.hit_probability }
    pub fn effector_id(&self) -> &str { &self.body.effector_id }
    pub fn azimuth_deg(&self) -> f64 { self.body.azimuth_deg }
    pub fn elevation_deg(&self) -> f64 { self.body.elevation_deg }
    pub fn launch_speed(&self) -> Option<f64> { self.body.launch_speed }
    pub fn auth_token_ref(&self) -> Option<&AuthTokenRef> { self.body.auth_token_ref.as_ref() }
    pub fn content_hash(&self) -> Digest { self.content_hash }
    pub fn signature(&self) -> &Signature { &self.signature }

    #[cfg(test)]
    pub(crate) fn body_mut_unchecked(&mut self) -> &mut FireSolutionBody { &mut self.body }
}

/// Record of a solution whose `valid_until` elapsed before it was fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiredSolution {
    pub solution_id: SolutionId,
    pub track_id: TrackId,
    pub content_hash: Digest,
    pub valid_until: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

impl ExpiredSolution {
    pub fn of(solution: &FireSolution, observed_at: DateTime<Utc>) -> Self {
        Self {
            solution_id: solution.id(),
            track_id: solution.track_id(),
            content_hash: solution.content_hash(),
            valid_until: solution.valid_until(),
            observed_at,
        }
    }
}
