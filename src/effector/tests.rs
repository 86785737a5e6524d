use super::{
    AbortReason, AuthToken, DriverSink, EffectorDriver, EffectorSession, EffectorTelemetry, EngagementOutcome,
    InertDriver, RoeReference, RoeViolation, SessionDeps, SessionError, SessionState, SimulatedNetLauncher,
    SolutionInbox, StaticRoe,
};
use crate::bus::tests::relaxed_config;
use crate::bus::{BusError, BusMessage, Route, TargetingBus};
use crate::common::Vec3;
use crate::evidence::{EvidenceChain, EvidenceKind, EvidenceSigner, IntegrityAlarm, SharedChain};
use crate::lead::{EffectorSpecs, FireSolution, LeadCalculator};
use crate::track::TrackStore;
use crate::track::tests::mock_update;
use chrono::{TimeDelta, Utc};
use ed25519_dalek::VerifyingKey;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const EFFECTOR: &str = "NL-1";

struct Rig {
    session: EffectorSession,
    bus: Arc<TargetingBus>,
    chain: SharedChain,
    alarm: IntegrityAlarm,
    inbox: Arc<SolutionInbox>,
    calculator: LeadCalculator,
    report_key: VerifyingKey,
    token: AuthToken,
}

fn rig_with(driver: Arc<dyn EffectorDriver>, cooldown: Duration) -> Rig {
    let config = relaxed_config();
    let alarm = IntegrityAlarm::new();
    let chain = EvidenceChain::new(Arc::new(EvidenceSigner::generate()), alarm.clone()).shared();
    let bus = Arc::new(TargetingBus::new(&config, Arc::clone(&chain)));
    bus.register_sink(Route::EffectorDriver, Arc::new(DriverSink::new(Arc::clone(&driver))));

    let token = AuthToken::new("roe-test-token");
    let roe = StaticRoe::new().grant(&token, EFFECTOR, Utc::now() + TimeDelta::hours(1));
    let lead_signer = Arc::new(EvidenceSigner::generate());
    let report_signer = Arc::new(EvidenceSigner::generate());
    let inbox = Arc::new(SolutionInbox::new());
    let deps = SessionDeps {
        bus: Arc::clone(&bus),
        roe: Arc::new(roe),
        driver,
        alarm: alarm.clone(),
        inbox: Arc::clone(&inbox),
        tracks: Arc::new(RwLock::new(TrackStore::new(config.staleness_window, config.retired_retention))),
        signer: Arc::clone(&report_signer),
        solution_key: lead_signer.verifying_key(),
    };
    Rig {
        session: EffectorSession::new(EFFECTOR, cooldown, deps),
        bus,
        chain,
        alarm,
        inbox,
        calculator: LeadCalculator::new(lead_signer, Duration::from_millis(500), Duration::from_secs(2), 0.85),
        report_key: report_signer.verifying_key(),
        token,
    }
}

fn telemetry() -> EffectorTelemetry {
    EffectorTelemetry {
        effector_id: EFFECTOR.to_string(),
        sampled_at: Utc::now(),
        ready: true,
        nets_remaining: 0,
        azimuth_deg: 0.0,
        elevation_deg: 0.0,
        fault: None,
    }
}

fn rig() -> Rig {
    rig_with(Arc::new(InertDriver::new(EFFECTOR, EngagementOutcome::Hit { capture_confirmed: true })), Duration::ZERO)
}

impl Rig {
    /// Signed solution for a receding target, offered to the inbox.
    fn solution_from(&self, calculator: &LeadCalculator, effector_id: &str, age: TimeDelta) -> Arc<FireSolution> {
        let mut track = mock_update(1, 1, (100.0, 0.0, 0.0), (10.0, 0.0, 0.0));
        track.timestamp -= age;
        let solution = calculator
            .calculate_lead_at(
                &track,
                Vec3::zero(),
                &EffectorSpecs::standard_net_launcher(effector_id),
                self.session.armed_token(),
                track.timestamp,
            )
            .unwrap();
        let solution = Arc::new(solution);
        self.inbox.offer(Arc::clone(&solution));
        solution
    }

    fn solution(&self) -> Arc<FireSolution> { self.solution_from(&self.calculator, EFFECTOR, TimeDelta::zero()) }

    fn kinds(&self) -> Vec<EvidenceKind> { self.chain.read().unwrap().entries().iter().map(|e| e.kind()).collect() }
}

#[test]
fn test_fire_while_idle_is_rejected() {
    let rig = rig();
    let solution = rig.solution();
    assert_eq!(rig.session.fire(solution), Err(SessionError::InvalidState { command: "fire", state: SessionState::Idle }));
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(rig.kinds().is_empty());
    assert_eq!(rig.inbox.len(), 1);
}

#[test]
fn test_arm_twice_logs_one_transition() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    assert_eq!(rig.session.armed_token(), Some(rig.token.reference()));
    assert!(matches!(rig.session.arm(&rig.token), Err(SessionError::InvalidState { state: SessionState::Armed, .. })));
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition]);
}

#[test]
fn test_full_engagement_writes_one_entry_per_transition() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution();
    rig.session.fire(Arc::clone(&solution)).unwrap();
    assert_eq!(rig.session.state(), SessionState::Firing);
    assert!(rig.inbox.is_empty());

    let report = rig.session.observe_release().unwrap();
    assert_eq!(rig.session.state(), SessionState::Safed);
    assert_eq!(report.solution_id(), solution.id());
    assert_eq!(report.body().solution_hash, solution.content_hash());
    assert!(report.body().released_at.is_some());
    assert_eq!(*report.outcome(), EngagementOutcome::Hit { capture_confirmed: true });
    assert!(report.verify(&rig.report_key));
    assert_eq!(rig.session.armed_token(), None);

    assert_eq!(
        rig.kinds(),
        vec![EvidenceKind::SessionTransition, EvidenceKind::FireSolution, EvidenceKind::EngagementReport]
    );
    assert_eq!(rig.chain.read().unwrap().verify(), Ok(()));
}

#[test]
fn test_solution_is_fired_at_most_once() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution();
    rig.session.fire(Arc::clone(&solution)).unwrap();
    rig.session.release_complete(EngagementOutcome::Miss { estimated_miss_distance: 3.0 }, telemetry()).unwrap();
    rig.session.reset().unwrap();
    rig.session.arm(&rig.token).unwrap();

    assert_eq!(rig.session.fire(Arc::clone(&solution)), Err(SessionError::AlreadyConsumed(solution.id())));
    assert_eq!(rig.session.state(), SessionState::Armed);
}

#[test]
fn test_expired_solution_is_logged_not_fired() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution_from(&rig.calculator, EFFECTOR, TimeDelta::seconds(5));
    assert!(solution.is_expired(Utc::now()));

    assert_eq!(rig.session.fire(Arc::clone(&solution)), Err(SessionError::StaleSolution(solution.id())));
    assert_eq!(rig.session.state(), SessionState::Armed);
    assert!(rig.inbox.is_empty());
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition, EvidenceKind::SolutionExpired]);
    assert_eq!(rig.session.fire(Arc::clone(&solution)), Err(SessionError::AlreadyConsumed(solution.id())));
}

#[test]
fn test_safe_while_firing_files_abort_report() {
    let rig = rig();
    let mut feed = rig.bus.subscribe_operator();
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution();
    rig.session.fire(Arc::clone(&solution)).unwrap();

    assert_eq!(rig.session.safe(), SessionState::Aborted);
    let mut reports = Vec::new();
    while let Ok(message) = feed.try_recv() {
        if let BusMessage::EngagementReport(report) = message {
            reports.push(report);
        }
    }
    assert_eq!(reports.len(), 1);
    assert_eq!(*reports[0].outcome(), EngagementOutcome::Aborted { reason: AbortReason::OperatorAbort });
    assert_eq!(reports[0].solution_id(), solution.id());
    assert_eq!(rig.kinds().last(), Some(&EvidenceKind::EngagementReport));

    // further safes are no-ops
    let entries = rig.kinds().len();
    assert_eq!(rig.session.safe(), SessionState::Aborted);
    assert_eq!(rig.kinds().len(), entries);
}

#[test]
fn test_refused_evidence_is_held_until_logged() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    rig.session.fire(rig.solution()).unwrap();
    rig.bus.close();

    assert_eq!(rig.session.safe(), SessionState::Aborted);
    assert_eq!(rig.session.unlogged(), 1);
    assert_eq!(rig.session.reset(), Err(SessionError::UnloggedEvidence(1)));
    assert_eq!(rig.session.state(), SessionState::Aborted);
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition, EvidenceKind::FireSolution]);

    let armed = self::rig();
    armed.session.arm(&armed.token).unwrap();
    armed.bus.close();
    assert_eq!(armed.session.safe(), SessionState::Safed);
    assert_eq!(armed.session.refile_unlogged(), 1);
    assert_eq!(armed.session.armed_token(), None);
}

#[test]
fn test_release_and_abort_publish_telemetry() {
    let rig = rig();
    let mut feed = rig.bus.subscribe_operator();
    rig.session.arm(&rig.token).unwrap();
    rig.session.fire(rig.solution()).unwrap();
    rig.session.observe_release().unwrap();
    rig.session.reset().unwrap();
    rig.session.arm(&rig.token).unwrap();
    rig.session.fire(rig.solution()).unwrap();
    rig.session.safe();

    assert_eq!(rig.bus.drain_pending(), 2);
    let mut samples = 0;
    while let Ok(message) = feed.try_recv() {
        if let BusMessage::Telemetry(sample) = message {
            assert_eq!(sample.effector_id, EFFECTOR);
            samples += 1;
        }
    }
    assert_eq!(samples, 2);
}

#[test]
fn test_safe_from_armed_and_idle() {
    let rig = rig();
    assert_eq!(rig.session.safe(), SessionState::Idle);
    assert!(rig.kinds().is_empty());
    rig.session.arm(&rig.token).unwrap();
    assert_eq!(rig.session.safe(), SessionState::Safed);
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition; 2]);
    assert_eq!(rig.session.armed_token(), None);
}

#[test]
fn test_reset_only_from_terminal_states() {
    let rig = rig();
    assert!(matches!(rig.session.reset(), Err(SessionError::InvalidState { command: "reset", .. })));
    rig.session.arm(&rig.token).unwrap();
    assert!(rig.session.reset().is_err());
    rig.session.safe();
    rig.session.reset().unwrap();
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert_eq!(rig.kinds().len(), 3);
}

#[test]
fn test_rearm_waits_for_cooldown() {
    let driver = Arc::new(InertDriver::new(EFFECTOR, EngagementOutcome::Hit { capture_confirmed: true }));
    let rig = rig_with(driver, Duration::from_secs(10));
    rig.session.arm(&rig.token).unwrap();
    rig.session.fire(rig.solution()).unwrap();
    rig.session.observe_release().unwrap();
    rig.session.reset().unwrap();

    let Err(SessionError::CoolingDown { remaining_ms }) = rig.session.arm(&rig.token) else {
        panic!("arm must be refused during cooldown");
    };
    assert!(remaining_ms > 9_000 && remaining_ms <= 10_000);
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[test]
fn test_integrity_alarm_halts_commands() {
    let rig = rig();
    rig.alarm.raise(0);
    assert_eq!(rig.session.arm(&rig.token), Err(SessionError::IntegrityHalt));
    rig.alarm.reconcile();
    rig.session.arm(&rig.token).unwrap();

    let solution = rig.solution();
    rig.alarm.raise(0);
    assert_eq!(rig.session.fire(solution), Err(SessionError::IntegrityHalt));
    assert_eq!(rig.session.state(), SessionState::Armed);
    // safing is always possible
    assert_eq!(rig.session.safe(), SessionState::Safed);
}

#[test]
fn test_solution_checks() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();

    let rogue =
        LeadCalculator::new(Arc::new(EvidenceSigner::generate()), Duration::from_millis(500), Duration::from_secs(2), 0.85);
    let forged = rig.solution_from(&rogue, EFFECTOR, TimeDelta::zero());
    assert_eq!(rig.session.fire(Arc::clone(&forged)), Err(SessionError::InvalidSignature(forged.id())));

    let elsewhere = rig.solution_from(&rig.calculator, "NL-2", TimeDelta::zero());
    assert!(matches!(rig.session.fire(elsewhere), Err(SessionError::WrongEffector { .. })));

    let track = mock_update(1, 1, (100.0, 0.0, 0.0), (10.0, 0.0, 0.0));
    let foreign_token = AuthToken::new("someone-else").reference();
    let mismatched = Arc::new(
        rig.calculator
            .calculate_lead_at(
                &track,
                Vec3::zero(),
                &EffectorSpecs::standard_net_launcher(EFFECTOR),
                Some(foreign_token),
                track.timestamp,
            )
            .unwrap(),
    );
    assert_eq!(rig.session.fire(Arc::clone(&mismatched)), Err(SessionError::TokenMismatch(mismatched.id())));

    assert_eq!(rig.session.state(), SessionState::Armed);
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition]);
}

#[test]
fn test_roe_refusals() {
    let rig = rig();
    let unknown = AuthToken::new("not-issued");
    assert!(matches!(rig.session.arm(&unknown), Err(SessionError::Unauthorized(RoeViolation::UnknownToken(_)))));

    let expired = AuthToken::new("yesterday");
    let roe = StaticRoe::new()
        .grant(&expired, EFFECTOR, Utc::now() - TimeDelta::hours(1))
        .grant(&rig.token, "NL-9", Utc::now() + TimeDelta::hours(1));
    assert!(matches!(roe.authorize(&expired, EFFECTOR, Utc::now()), Err(RoeViolation::TokenExpired { .. })));
    assert_eq!(roe.authorize(&rig.token, EFFECTOR, Utc::now()), Err(RoeViolation::EffectorNotCovered(EFFECTOR.to_string())));
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(rig.kinds().is_empty());
}

#[test]
fn test_driver_fault_leaves_session_armed() {
    let launcher = Arc::new(SimulatedNetLauncher::new(EFFECTOR, 2));
    launcher.inject_fault("barrel obstructed");
    let rig = rig_with(Arc::clone(&launcher) as Arc<dyn EffectorDriver>, Duration::ZERO);
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution();

    let err = rig.session.fire(Arc::clone(&solution)).unwrap_err();
    assert_eq!(err, SessionError::Bus(BusError::Rejected("barrel obstructed".to_string())));
    assert_eq!(rig.session.state(), SessionState::Armed);
    assert_eq!(rig.inbox.len(), 1);
    assert!(!launcher.telemetry().ready);
    assert_eq!(rig.kinds(), vec![EvidenceKind::SessionTransition]);
}

#[test]
fn test_malfunction_outcome() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    rig.session.fire(rig.solution()).unwrap();
    let report = rig
        .session
        .release_complete(EngagementOutcome::EffectorMalfunction { error: "net tangled".to_string() }, telemetry())
        .unwrap();
    assert_eq!(rig.session.state(), SessionState::Malfunction);
    assert!(report.verify(&rig.report_key));
    assert!(rig.session.release_complete(EngagementOutcome::Hit { capture_confirmed: true }, telemetry()).is_err());
}

#[test]
fn test_decline_consumes_offer() {
    let rig = rig();
    rig.session.arm(&rig.token).unwrap();
    let solution = rig.solution();
    assert!(rig.session.decline(solution.id()));
    assert!(!rig.session.decline(solution.id()));
    assert!(rig.inbox.is_empty());
    assert_eq!(rig.session.fire(Arc::clone(&solution)), Err(SessionError::AlreadyConsumed(solution.id())));
}
