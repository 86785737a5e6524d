use super::effector_driver::{EffectorDriver, EffectorTelemetry};
use super::engagement_report::{AbortReason, EngagementOutcome, EngagementReport, EngagementReportBody, ReportId};
use super::roe::{AuthToken, RoeReference, RoeViolation};
use super::session_state::{SessionState, SessionTransition};
use super::solution_inbox::SolutionInbox;
use crate::bus::{BusError, BusMessage, Priority, TargetingBus};
use crate::evidence::{EvidenceError, EvidenceSigner, IntegrityAlarm};
use crate::lead::{AuthTokenRef, ExpiredSolution, FireSolution, SolutionId};
use crate::track::{TrackId, TrackSnapshot, TrackStore};
use crate::{error, info, warn};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{command} not allowed in state {state}")]
    InvalidState { command: &'static str, state: SessionState },
    #[error("authorization refused: {0}")]
    Unauthorized(#[from] RoeViolation),
    #[error("engagement cooldown active for another {remaining_ms} ms")]
    CoolingDown { remaining_ms: u64 },
    #[error("engagements halted by evidence integrity alarm")]
    IntegrityHalt,
    #[error("solution {0} is past its valid_until")]
    StaleSolution(SolutionId),
    #[error("solution {0} failed signature verification")]
    InvalidSignature(SolutionId),
    #[error("solution for effector {got} offered to {expected}")]
    WrongEffector { expected: String, got: String },
    #[error("solution {0} was computed under a different authorization")]
    TokenMismatch(SolutionId),
    #[error("solution {0} was already consumed")]
    AlreadyConsumed(SolutionId),
    #[error("effector has not reported an outcome yet")]
    NoOutcome,
    #[error("{0} evidence records are still waiting to be logged")]
    UnloggedEvidence(usize),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

/// Collaborators injected into an [`EffectorSession`].
#[derive(Clone)]
pub struct SessionDeps {
    pub bus: Arc<TargetingBus>,
    pub roe: Arc<dyn RoeReference>,
    pub driver: Arc<dyn EffectorDriver>,
    pub alarm: IntegrityAlarm,
    pub inbox: Arc<SolutionInbox>,
    pub tracks: Arc<RwLock<TrackStore>>,
    /// Signs engagement reports.
    pub signer: Arc<EvidenceSigner>,
    /// Key of the lead calculator that signs fire solutions.
    pub solution_key: VerifyingKey,
}

#[derive(Debug)]
struct InFlight {
    solution: Arc<FireSolution>,
    fire_command_at: DateTime<Utc>,
    pre_engagement: Option<TrackSnapshot>,
}

#[derive(Debug)]
struct SessionCore {
    state: SessionState,
    token_ref: Option<AuthTokenRef>,
    in_flight: Option<InFlight>,
    consumed: HashSet<SolutionId>,
    engagement_ended_at: Option<Instant>,
    /// Evidence of transitions the bus refused; refiled before the next reset.
    unlogged: Vec<BusMessage>,
}

/// State machine of one effector: `Idle → Armed → Firing → {Safed, Aborted, Malfunction}`.
///
/// Commands are validated synchronously under the session lock; a rejected command
/// never changes state. Each accepted transition is reported over the bus as exactly
/// one evidence entry: a `SessionTransition` for arm, safe and reset, the fire command
/// itself for `fire`, and the engagement report for `release_complete`.
pub struct EffectorSession {
    effector_id: String,
    cooldown: Duration,
    core: Mutex<SessionCore>,
    deps: SessionDeps,
}

impl EffectorSession {
    pub fn new(effector_id: &str, cooldown: Duration, deps: SessionDeps) -> Self {
        Self {
            effector_id: effector_id.to_string(),
            cooldown,
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                token_ref: None,
                in_flight: None,
                consumed: HashSet::new(),
                engagement_ended_at: None,
                unlogged: Vec::new(),
            }),
            deps,
        }
    }

    fn lock_core(&self) -> std::sync::MutexGuard<SessionCore> {
        self.core.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock")
    }

    pub fn state(&self) -> SessionState { self.lock_core().state }

    pub fn effector_id(&self) -> &str { &self.effector_id }

    /// Token reference the session is currently armed under.
    pub fn armed_token(&self) -> Option<AuthTokenRef> { self.lock_core().token_ref.clone() }

    fn reject(command: &'static str, state: SessionState) -> SessionError {
        error!("Rejected {command} in state {state}");
        SessionError::InvalidState { command, state }
    }

    /// Verifies the whole evidence chain; a break raises the shared alarm.
    fn audit_chain(&self) -> Result<(), SessionError> {
        if !self.deps.alarm.is_raised() {
            let ledger = self.deps.bus.ledger();
            let verified = ledger.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock").verify();
            if let Err(e) = verified {
                error!("{}: arm refused, {e}", self.effector_id);
            }
        }
        self.check_alarm()
    }

    fn check_alarm(&self) -> Result<(), SessionError> {
        if self.deps.alarm.is_raised() {
            error!("Command refused, evidence integrity alarm is raised");
            return Err(SessionError::IntegrityHalt);
        }
        Ok(())
    }

    fn transition_record(
        &self,
        core: &SessionCore,
        to: SessionState,
        cause: &str,
        token_ref: Option<AuthTokenRef>,
    ) -> BusMessage {
        BusMessage::SessionTransition(SessionTransition {
            effector_id: self.effector_id.clone(),
            from: core.state,
            to,
            at: Utc::now(),
            cause: cause.to_string(),
            token_ref,
        })
    }

    /// Logs the transition and then applies it. A failed send leaves the state as is.
    fn transition(
        &self,
        core: &mut SessionCore,
        to: SessionState,
        cause: &str,
        token_ref: Option<AuthTokenRef>,
    ) -> Result<(), SessionError> {
        let record = self.transition_record(core, to, cause, token_ref);
        self.deps.bus.send(record, Priority::Critical)?;
        info!("{}: {} -> {to} ({cause})", self.effector_id, core.state);
        core.state = to;
        Ok(())
    }

    /// Sends `record`, holding it for a later refile if the bus refuses it.
    fn log_or_hold(&self, core: &mut SessionCore, record: BusMessage) {
        if let Err(e) = self.deps.bus.send(record.clone(), Priority::Critical) {
            error!("{}: {record} not logged, held for refiling: {e}", self.effector_id);
            core.unlogged.push(record);
        }
    }

    fn refile(&self, core: &mut SessionCore) -> usize {
        for record in std::mem::take(&mut core.unlogged) {
            self.log_or_hold(core, record);
        }
        core.unlogged.len()
    }

    /// Sends evidence held back by earlier failed sends again and returns how many
    /// records are still waiting.
    pub fn refile_unlogged(&self) -> usize {
        let mut core = self.lock_core();
        self.refile(&mut core)
    }

    pub fn unlogged(&self) -> usize { self.lock_core().unlogged.len() }

    fn publish_telemetry(&self, telemetry: EffectorTelemetry) {
        if let Err(e) = self.deps.bus.send(BusMessage::Telemetry(telemetry), Priority::Low) {
            warn!("{}: telemetry not published: {e}", self.effector_id);
        }
    }

    /// `Idle → Armed` after the evidence chain verifies and the token passes the rules
    /// of engagement.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless idle (arming twice is rejected).
    /// - [`SessionError::IntegrityHalt`], [`SessionError::CoolingDown`],
    ///   [`SessionError::Unauthorized`].
    pub fn arm(&self, token: &AuthToken) -> Result<(), SessionError> {
        let mut core = self.lock_core();
        if core.state != SessionState::Idle {
            return Err(Self::reject("arm", core.state));
        }
        self.audit_chain()?;
        if let Some(remaining) = core
            .engagement_ended_at
            .and_then(|ended| self.cooldown.checked_sub(ended.elapsed()))
            .filter(|remaining| !remaining.is_zero())
        {
            let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
            warn!("{}: arm refused, cooling down for {remaining_ms} ms", self.effector_id);
            return Err(SessionError::CoolingDown { remaining_ms });
        }
        let token_ref = self.deps.roe.authorize(token, &self.effector_id, Utc::now()).map_err(|e| {
            warn!("{}: arm refused by ROE: {e}", self.effector_id);
            SessionError::from(e)
        })?;
        self.transition(&mut core, SessionState::Armed, "arm", Some(token_ref.clone()))?;
        core.token_ref = Some(token_ref);
        Ok(())
    }

    /// `Armed → Firing`: commits `solution` to the effector driver.
    ///
    /// A solution past its `valid_until` is never dispatched; it is consumed, logged as
    /// expired and rejected with [`SessionError::StaleSolution`] while the session stays
    /// armed.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless armed.
    /// - [`SessionError::IntegrityHalt`], [`SessionError::AlreadyConsumed`],
    ///   [`SessionError::InvalidSignature`], [`SessionError::WrongEffector`],
    ///   [`SessionError::TokenMismatch`], [`SessionError::StaleSolution`].
    /// - [`SessionError::Bus`] if the fire command could not be delivered.
    pub fn fire(&self, solution: Arc<FireSolution>) -> Result<(), SessionError> {
        let mut core = self.lock_core();
        if core.state != SessionState::Armed {
            return Err(Self::reject("fire", core.state));
        }
        self.check_alarm()?;
        let id = solution.id();
        if core.consumed.contains(&id) {
            return Err(SessionError::AlreadyConsumed(id));
        }
        if !solution.verify(&self.deps.solution_key) {
            error!("{}: solution {id} failed verification", self.effector_id);
            return Err(SessionError::InvalidSignature(id));
        }
        if solution.effector_id() != self.effector_id {
            return Err(SessionError::WrongEffector {
                expected: self.effector_id.clone(),
                got: solution.effector_id().to_string(),
            });
        }
        if solution.auth_token_ref().is_some_and(|r| core.token_ref.as_ref() != Some(r)) {
            return Err(SessionError::TokenMismatch(id));
        }

        let now = Utc::now();
        if solution.is_expired(now) {
            core.consumed.insert(id);
            self.deps.inbox.take(id);
            warn!("{}: solution {id} expired {} ms ago, not fired", self.effector_id, (now - solution.valid_until()).num_milliseconds());
            let expired = BusMessage::SolutionExpired(ExpiredSolution::of(&solution, now));
            if let Err(e) = self.deps.bus.send(expired, Priority::Critical) {
                error!("Could not log expiry of {id}: {e}");
            }
            return Err(SessionError::StaleSolution(id));
        }

        let pre_engagement = self.track_snapshot(solution.track_id());
        self.deps.bus.send(BusMessage::FireCommand(Arc::clone(&solution)), Priority::Critical)?;
        core.consumed.insert(id);
        self.deps.inbox.take(id);
        info!(
            "{}: Armed -> Firing on {id} for {} (TTI {:.3} s, Pk {:.2})",
            self.effector_id,
            solution.track_id(),
            solution.time_to_intercept(),
            solution.hit_probability()
        );
        core.in_flight = Some(InFlight { solution, fire_command_at: now, pre_engagement });
        core.state = SessionState::Firing;
        Ok(())
    }

    /// `Firing → Safed | Aborted | Malfunction`: files the engagement report.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless firing.
    /// - [`SessionError::Bus`] or [`SessionError::Evidence`] if the report could not be
    ///   signed or filed; the session then stays in `Firing`.
    pub fn release_complete(
        &self,
        outcome: EngagementOutcome,
        telemetry: EffectorTelemetry,
    ) -> Result<Arc<EngagementReport>, SessionError> {
        let mut core = self.lock_core();
        let Some(in_flight) = core.in_flight.as_ref().filter(|_| core.state == SessionState::Firing) else {
            return Err(Self::reject("release_complete", core.state));
        };
        let next = outcome.resulting_state();
        let report = self.sign_report(in_flight, outcome, self.deps.driver.released_at(), telemetry.clone())?;
        self.deps.bus.send(BusMessage::EngagementReport(Arc::clone(&report)), Priority::Critical)?;
        info!("{}: Firing -> {next} ({})", self.effector_id, report.outcome());
        self.finish_engagement(&mut core, next);
        self.publish_telemetry(telemetry);
        Ok(report)
    }

    /// Reads the driver's observed outcome and completes the release with it.
    ///
    /// # Errors
    /// - [`SessionError::NoOutcome`] if the driver has nothing to report yet.
    /// - Any error of [`EffectorSession::release_complete`].
    pub fn observe_release(&self) -> Result<Arc<EngagementReport>, SessionError> {
        if self.state() != SessionState::Firing {
            return Err(Self::reject("observe_release", self.state()));
        }
        let outcome = self.deps.driver.observe_outcome().ok_or(SessionError::NoOutcome)?;
        self.release_complete(outcome, self.deps.driver.telemetry())
    }

    /// Safety command; always accepted.
    ///
    /// Armed sessions become `Safed`. A firing session asks the driver to abort and
    /// files an `Aborted{OperatorAbort}` report for the dispatched solution. Other
    /// states are left unchanged. Evidence the bus refuses is held and refiled before
    /// the next reset.
    pub fn safe(&self) -> SessionState {
        let mut core = self.lock_core();
        match core.state {
            SessionState::Armed => {
                let record = self.transition_record(&core, SessionState::Safed, "safe", core.token_ref.clone());
                self.log_or_hold(&mut core, record);
                info!("{}: Armed -> Safed (safe)", self.effector_id);
                core.state = SessionState::Safed;
                core.token_ref = None;
            }
            SessionState::Firing => {
                let release_began = self.deps.driver.abort();
                let released_at = if release_began { self.deps.driver.released_at() } else { None };
                let telemetry = self.deps.driver.telemetry();
                let outcome = EngagementOutcome::Aborted { reason: AbortReason::OperatorAbort };
                let signed = core
                    .in_flight
                    .as_ref()
                    .map(|in_flight| self.sign_report(in_flight, outcome, released_at, telemetry.clone()));
                match signed {
                    Some(Ok(report)) => self.log_or_hold(&mut core, BusMessage::EngagementReport(report)),
                    Some(Err(e)) => error!("{}: abort report could not be signed: {e}", self.effector_id),
                    None => {}
                }
                warn!("{}: Firing -> Aborted by operator (release began: {release_began})", self.effector_id);
                self.finish_engagement(&mut core, SessionState::Aborted);
                self.publish_telemetry(telemetry);
            }
            SessionState::Idle | SessionState::Safed | SessionState::Aborted | SessionState::Malfunction => {}
        }
        core.state
    }

    /// Terminal state → `Idle`, once every held evidence record is logged.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless the session is in a terminal state.
    /// - [`SessionError::UnloggedEvidence`] if held records still cannot be logged.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut core = self.lock_core();
        if !core.state.is_terminal() {
            return Err(Self::reject("reset", core.state));
        }
        let held = self.refile(&mut core);
        if held > 0 {
            return Err(SessionError::UnloggedEvidence(held));
        }
        self.transition(&mut core, SessionState::Idle, "reset", None)
    }

    /// Explicitly declines an offered solution without firing it.
    pub fn decline(&self, id: SolutionId) -> bool {
        let mut core = self.lock_core();
        let offered = self.deps.inbox.take(id).is_some();
        if offered {
            core.consumed.insert(id);
            info!("{}: declined solution {id}", self.effector_id);
        }
        offered
    }

    fn finish_engagement(&self, core: &mut SessionCore, next: SessionState) {
        core.state = next;
        core.in_flight = None;
        core.token_ref = None;
        core.engagement_ended_at = Some(Instant::now());
    }

    fn track_snapshot(&self, track: TrackId) -> Option<TrackSnapshot> {
        self.deps.tracks.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock").snapshot(track)
    }

    fn sign_report(
        &self,
        in_flight: &InFlight,
        outcome: EngagementOutcome,
        released_at: Option<DateTime<Utc>>,
        telemetry: EffectorTelemetry,
    ) -> Result<Arc<EngagementReport>, SessionError> {
        let solution = &in_flight.solution;
        let body = EngagementReportBody {
            id: ReportId(Uuid::new_v4()),
            solution_id: solution.id(),
            solution_hash: solution.content_hash(),
            track_id: solution.track_id(),
            fire_command_at: in_flight.fire_command_at,
            released_at,
            outcome,
            pre_engagement: in_flight.pre_engagement,
            post_engagement: self.track_snapshot(solution.track_id()),
            telemetry,
            reported_at: Utc::now(),
        };
        Ok(Arc::new(EngagementReport::sign(body, &self.deps.signer)?))
    }
}
