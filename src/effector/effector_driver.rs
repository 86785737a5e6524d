use super::engagement_report::EngagementOutcome;
use crate::bus::{BusMessage, DeliveryError, Envelope, MessageSink};
use crate::lead::{FireSolution, SolutionId};
use crate::{info, warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Launcher state sampled by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectorTelemetry {
    pub effector_id: String,
    pub sampled_at: DateTime<Utc>,
    pub ready: bool,
    pub nets_remaining: u32,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub fault: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("effector not ready: {0}")]
    NotReady(String),
    #[error("effector fault: {0}")]
    Fault(String),
}

/// Physical actuation layer below the fire-command interface.
pub trait EffectorDriver: Send + Sync {
    fn effector_id(&self) -> &str;

    /// Slews to the solution and releases the net.
    fn release(&self, solution: &FireSolution) -> Result<DateTime<Utc>, DriverError>;

    /// Best-effort abort of the current shot. Returns whether release had already begun.
    fn abort(&self) -> bool;

    /// Release time of the most recent shot, if any.
    fn released_at(&self) -> Option<DateTime<Utc>>;

    /// Outcome of the most recent shot, reported once.
    fn observe_outcome(&self) -> Option<EngagementOutcome>;

    fn telemetry(&self) -> EffectorTelemetry;
}

#[derive(Debug, Clone)]
struct Shot {
    solution_id: SolutionId,
    hit_probability: f64,
    released_at: DateTime<Utc>,
    observed: bool,
}

#[derive(Debug)]
struct LauncherState {
    nets_remaining: u32,
    azimuth_deg: f64,
    elevation_deg: f64,
    fault: Option<String>,
    shot: Option<Shot>,
}

/// Net launcher model; a shot hits with the solution's hit probability.
#[derive(Debug)]
pub struct SimulatedNetLauncher {
    effector_id: String,
    state: Mutex<LauncherState>,
}

impl SimulatedNetLauncher {
    const MAX_MISS_DISTANCE: f64 = 8.0;

    pub fn new(effector_id: &str, nets: u32) -> Self {
        Self {
            effector_id: effector_id.to_string(),
            state: Mutex::new(LauncherState {
                nets_remaining: nets,
                azimuth_deg: 0.0,
                elevation_deg: 0.0,
                fault: None,
                shot: None,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<LauncherState> {
        self.state.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock")
    }

    /// Puts the launcher into a fault state; every later release fails.
    pub fn inject_fault(&self, fault: &str) { self.lock_state().fault = Some(fault.to_string()); }
}

impl EffectorDriver for SimulatedNetLauncher {
    fn effector_id(&self) -> &str { &self.effector_id }

    fn release(&self, solution: &FireSolution) -> Result<DateTime<Utc>, DriverError> {
        let mut state = self.lock_state();
        if let Some(fault) = &state.fault {
            return Err(DriverError::Fault(fault.clone()));
        }
        if state.nets_remaining == 0 {
            return Err(DriverError::NotReady("no nets loaded".to_string()));
        }
        let released_at = Utc::now();
        state.nets_remaining -= 1;
        state.azimuth_deg = solution.azimuth_deg();
        state.elevation_deg = solution.elevation_deg();
        state.shot = Some(Shot {
            solution_id: solution.id(),
            hit_probability: solution.hit_probability(),
            released_at,
            observed: false,
        });
        info!(
            "{} released on {} (az {:.1}°, el {:.1}°)",
            self.effector_id,
            solution.id(),
            solution.azimuth_deg(),
            solution.elevation_deg()
        );
        Ok(released_at)
    }

    fn abort(&self) -> bool { self.lock_state().shot.as_ref().is_some_and(|s| !s.observed) }

    fn released_at(&self) -> Option<DateTime<Utc>> { self.lock_state().shot.as_ref().map(|s| s.released_at) }

    fn observe_outcome(&self) -> Option<EngagementOutcome> {
        let mut state = self.lock_state();
        let shot = state.shot.as_mut().filter(|s| !s.observed)?;
        shot.observed = true;
        let outcome = if rand::random::<f64>() < shot.hit_probability {
            EngagementOutcome::Hit { capture_confirmed: true }
        } else {
            EngagementOutcome::Miss { estimated_miss_distance: rand::random::<f64>() * Self::MAX_MISS_DISTANCE }
        };
        info!("{} observed {outcome} for {}", self.effector_id, shot.solution_id);
        Some(outcome)
    }

    fn telemetry(&self) -> EffectorTelemetry {
        let state = self.lock_state();
        EffectorTelemetry {
            effector_id: self.effector_id.clone(),
            sampled_at: Utc::now(),
            ready: state.fault.is_none() && state.nets_remaining > 0,
            nets_remaining: state.nets_remaining,
            azimuth_deg: state.azimuth_deg,
            elevation_deg: state.elevation_deg,
            fault: state.fault.clone(),
        }
    }
}

/// Driver that never moves hardware and reports a scripted outcome.
#[derive(Debug)]
pub struct InertDriver {
    effector_id: String,
    outcome: EngagementOutcome,
    /// Release time and whether its outcome was reported.
    release: Mutex<Option<(DateTime<Utc>, bool)>>,
}

impl InertDriver {
    pub fn new(effector_id: &str, outcome: EngagementOutcome) -> Self {
        Self { effector_id: effector_id.to_string(), outcome, release: Mutex::new(None) }
    }

    fn lock_release(&self) -> std::sync::MutexGuard<Option<(DateTime<Utc>, bool)>> {
        self.release.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock")
    }
}

impl EffectorDriver for InertDriver {
    fn effector_id(&self) -> &str { &self.effector_id }

    fn release(&self, _solution: &FireSolution) -> Result<DateTime<Utc>, DriverError> {
        let now = Utc::now();
        *self.lock_release() = Some((now, false));
        Ok(now)
    }

    fn abort(&self) -> bool { self.lock_release().is_some_and(|(_, observed)| !observed) }

    fn released_at(&self) -> Option<DateTime<Utc>> { self.lock_release().map(|(at, _)| at) }

    fn observe_outcome(&self) -> Option<EngagementOutcome> {
        let mut release = self.lock_release();
        let (_, observed) = release.as_mut().filter(|(_, observed)| !observed)?;
        *observed = true;
        Some(self.outcome.clone())
    }

    fn telemetry(&self) -> EffectorTelemetry {
        EffectorTelemetry {
            effector_id: self.effector_id.clone(),
            sampled_at: Utc::now(),
            ready: true,
            nets_remaining: 1,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            fault: None,
        }
    }
}

/// Bus endpoint of the fire-command interface.
pub struct DriverSink {
    driver: Arc<dyn EffectorDriver>,
}

impl DriverSink {
    pub fn new(driver: Arc<dyn EffectorDriver>) -> Self { Self { driver } }
}

impl MessageSink for DriverSink {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let BusMessage::FireCommand(solution) = &envelope.message else {
            return Err(DeliveryError::Rejected(format!("driver cannot handle {}", envelope.message)));
        };
        self.driver.release(solution).map(|_| ()).map_err(|e| {
            warn!("{} refused fire command {}: {e}", self.driver.effector_id(), solution.id());
            match e {
                DriverError::NotReady(reason) => DeliveryError::Unavailable(reason),
                DriverError::Fault(reason) => DeliveryError::Rejected(reason),
            }
        })
    }
}
