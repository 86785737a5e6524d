use super::effector_specs::EffectorSpecs;
use super::fire_solution::{AuthTokenRef, FireSolution, FireSolutionBody, SolutionId};
use crate::common::{Vec3, math::gaussian_capture_probability};
use crate::evidence::{EvidenceError, EvidenceSigner};
use crate::track::TrackUpdate;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LeadError {
    #[error("time-to-intercept did not converge within {iterations} iterations")]
    NoConvergence { iterations: usize },
    #[error("intercept outside effector envelope: {0}")]
    OutOfRange(String),
    #[error("track is {age_ms} ms old at calculation time")]
    StaleTrack { age_ms: i64 },
    #[error("track does not qualify for engagement: {0}")]
    NotQualified(String),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

/// Converged intercept geometry before it is packaged into a signed solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterceptEstimate {
    pub aim_point: Vec3<f64>,
    pub time_to_intercept: f64,
    pub iterations: usize,
}

/// Computes intercept ("lead") solutions for tracks.
///
/// The solve is CPU-bound and synchronous; callers run it on a worker, never on the
/// bus dispatch loop. Given its inputs (including `now`) it is purely functional.
#[derive(Debug, Clone)]
pub struct LeadCalculator {
    signer: Arc<EvidenceSigner>,
    staleness_window: TimeDelta,
    solution_validity: TimeDelta,
    min_threat_confidence: f64,
}

impl LeadCalculator {
    /// Convergence threshold on successive time-to-intercept estimates (100 µs).
    pub const CONVERGENCE_TOL_S: f64 = 100e-6;
    pub const MAX_ITERATIONS: usize = 10;

    pub fn new(
        signer: Arc<EvidenceSigner>,
        staleness_window: Duration,
        solution_validity: Duration,
        min_threat_confidence: f64,
    ) -> Self {
        Self {
            signer,
            staleness_window: TimeDelta::from_std(staleness_window).unwrap_or(TimeDelta::MAX),
            solution_validity: TimeDelta::from_std(solution_validity).unwrap_or(TimeDelta::milliseconds(250)),
            min_threat_confidence,
        }
    }

    /// Whether a track update should trigger a lead computation at all.
    pub fn qualifies(&self, track: &TrackUpdate) -> Result<(), LeadError> {
        if !track.engagement_authorized {
            return Err(LeadError::NotQualified("engagement not authorized".to_string()));
        }
        if !track.classification.is_threat() {
            return Err(LeadError::NotQualified(format!("class {} is not a threat", track.classification)));
        }
        if track.confidence < self.min_threat_confidence {
            return Err(LeadError::NotQualified(format!("confidence {:.2} too low", track.confidence)));
        }
        Ok(())
    }

    pub fn calculate_lead(
        &self,
        track: &TrackUpdate,
        effector_position: Vec3<f64>,
        effector_specs: &EffectorSpecs,
    ) -> Result<FireSolution, LeadError> {
        self.calculate_lead_at(track, effector_position, effector_specs, None, Utc::now())
    }

    /// Computes and signs a fire solution for `track` as of `now`.
    ///
    /// # Errors
    /// - [`LeadError::StaleTrack`] if the track is older than the staleness window.
    /// - [`LeadError::NoConvergence`] if the fixed-point solve does not settle.
    /// - [`LeadError::OutOfRange`] if the intercept leaves the effector envelope.
    pub fn calculate_lead_at(
        &self,
        track: &TrackUpdate,
        effector_position: Vec3<f64>,
        effector_specs: &EffectorSpecs,
        auth_token_ref: Option<AuthTokenRef>,
        now: DateTime<Utc>,
    ) -> Result<FireSolution, LeadError> {
        let age = now - track.timestamp;
        if age > self.staleness_window {
            return Err(LeadError::StaleTrack { age_ms: age.num_milliseconds() });
        }
        let target_speed = track.velocity.abs();
        if target_speed > effector_specs.max_target_speed {
            return Err(LeadError::OutOfRange(format!(
                "target speed {target_speed:.1} m/s exceeds {:.1} m/s",
                effector_specs.max_target_speed
            )));
        }

        let estimate = Self::solve_intercept(track, track.age_secs(now), effector_position, effector_specs)?;
        let aim_vec = effector_position.to(&estimate.aim_point);
        let range = aim_vec.abs();
        if range > effector_specs.max_range || range < effector_specs.min_range {
            return Err(LeadError::OutOfRange(format!(
                "intercept range {range:.1} m outside [{:.1}, {:.1}]",
                effector_specs.min_range, effector_specs.max_range
            )));
        }
        let elevation = aim_vec.elevation_deg();
        if !(effector_specs.min_elevation_deg..=effector_specs.max_elevation_deg).contains(&elevation) {
            return Err(LeadError::OutOfRange(format!("elevation {elevation:.1}° outside launcher limits")));
        }

        let body = FireSolutionBody {
            id: SolutionId(Uuid::new_v4()),
            track_id: track.track_id,
            track_seq: track.seq,
            generated_at: now,
            valid_until: now + self.solution_validity,
            aim_point: estimate.aim_point,
            time_to_intercept: estimate.time_to_intercept,
            hit_probability: Self::hit_probability(track, estimate.time_to_intercept, effector_specs.capture_radius),
            effector_id: effector_specs.effector_id.clone(),
            azimuth_deg: aim_vec.azimuth_deg(),
            elevation_deg: elevation,
            launch_speed: effector_specs.adjustable_speed.then_some(effector_specs.projectile_speed),
            auth_token_ref,
        };
        FireSolution::sign(body, &self.signer).map_err(LeadError::from)
    }

    /// Fixed-point iteration on the time-to-intercept.
    ///
    /// Seeds `t₀` with the straight-line flight time and repeats
    /// `tᵢ₊₁ = |predict(age + tᵢ) − effector| / v_projectile` until successive
    /// estimates differ by less than [`Self::CONVERGENCE_TOL_S`].
    pub fn solve_intercept(
        track: &TrackUpdate,
        age_s: f64,
        effector_position: Vec3<f64>,
        effector_specs: &EffectorSpecs,
    ) -> Result<InterceptEstimate, LeadError> {
        let speed = effector_specs.projectile_speed;
        if speed <= 0.0 || !speed.is_finite() {
            return Err(LeadError::OutOfRange("effector has no projectile speed".to_string()));
        }
        let mut t = effector_position.euclid_distance(&track.predict_position(age_s)) / speed;
        for iteration in 1..=Self::MAX_ITERATIONS {
            let predicted = track.predict_position(age_s + t);
            let t_next = effector_position.euclid_distance(&predicted) / speed;
            if !t_next.is_finite() {
                break;
            }
            if (t_next - t).abs() < Self::CONVERGENCE_TOL_S {
                return Ok(InterceptEstimate {
                    aim_point: track.predict_position(age_s + t_next),
                    time_to_intercept: t_next,
                    iterations: iteration,
                });
            }
            t = t_next;
        }
        Err(LeadError::NoConvergence { iterations: Self::MAX_ITERATIONS })
    }

    /// Probability that the net captures the target.
    ///
    /// Position covariance is propagated to the intercept time as `Σp + t²·Σv`; the
    /// per-axis RMS of the result is the σ of a Gaussian sphere compared against the
    /// capture radius.
    pub fn hit_probability(track: &TrackUpdate, time_to_intercept: f64, capture_radius: f64) -> f64 {
        let propagated = track.position_cov + track.velocity_cov.scale(time_to_intercept * time_to_intercept);
        let sigma = (propagated.trace().max(0.0) / 3.0).sqrt();
        gaussian_capture_probability(capture_radius, sigma)
    }
}
