use super::NodeContext;
use crate::bus::tests::relaxed_config;
use crate::bus::{BusError, Priority};
use crate::common::Vec3;
use crate::config::BusConfig;
use crate::effector::{AuthToken, EngagementOutcome, SessionError, SessionState, SimulatedNetLauncher, StaticRoe};
use crate::evidence::{AnchorError, EvidenceKind, IntegrityError, LocalAnchor};
use crate::lead::{EffectorSpecs, LeadCalculator};
use crate::track::TrackId;
use crate::track::tests::mock_update;
use chrono::{TimeDelta, Utc};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const EFFECTOR: &str = "NL-1";

fn node_config() -> BusConfig {
    BusConfig {
        solution_validity: Duration::from_secs(2),
        anchor_interval: Duration::from_secs(3600),
        engagement_cooldown: Duration::from_secs(10),
        ..relaxed_config()
    }
}

fn node(token: &AuthToken) -> NodeContext {
    NodeContext::new(
        node_config(),
        EffectorSpecs::standard_net_launcher(EFFECTOR),
        Vec3::new(200.0, 0.0, 0.0),
        Arc::new(SimulatedNetLauncher::new(EFFECTOR, 4)),
        Arc::new(StaticRoe::new().grant(token, EFFECTOR, Utc::now() + TimeDelta::hours(1))),
        Arc::new(LocalAnchor::new()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_track_to_engagement_report() {
    let token = AuthToken::new("e2e-token");
    let context = node(&token);
    let services = context.spawn_services();
    let session = context.session();
    session.arm(&token).unwrap();

    context.ingest(mock_update(1, 1, (100.0, 0.0, 0.0), (-10.0, 0.0, 0.0))).unwrap();
    let solution = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(solution) = context.inbox().latest_for(TrackId(1)) {
                break solution;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    // the target recedes from the launcher at 10 m/s: 100 m / (50 - 10) m/s
    assert!((solution.time_to_intercept() - 2.5).abs() / 2.5 < 0.01, "TTI {}", solution.time_to_intercept());
    assert!(solution.azimuth_deg().abs() > 179.0, "launcher looks down the -x axis");
    assert_eq!(solution.auth_token_ref(), Some(&token.reference()));

    session.fire(Arc::clone(&solution)).unwrap();
    let report = session.observe_release().unwrap();
    assert!(matches!(report.outcome(), EngagementOutcome::Hit { .. } | EngagementOutcome::Miss { .. }));
    assert_eq!(session.state(), SessionState::Safed);
    assert_eq!(report.body().pre_engagement.map(|s| s.seq), Some(1));

    {
        let shared = context.chain();
        let chain = shared.read().unwrap();
        let kinds: HashMap<EvidenceKind, usize> = chain.entries().iter().map(|e| e.kind()).counts();
        assert_eq!(chain.len(), 4, "{kinds:?}");
        for kind in [
            EvidenceKind::TrackUpdate,
            EvidenceKind::SessionTransition,
            EvidenceKind::FireSolution,
            EvidenceKind::EngagementReport,
        ] {
            assert_eq!(kinds.get(&kind), Some(&1), "{kind}");
        }
        assert_eq!(chain.verify(), Ok(()));
    }

    let receipt = context.anchor_scheduler().anchor_pending().await.unwrap().unwrap();
    assert_eq!((receipt.batch_start, receipt.batch_end), (0, 4));
    let (proof, _) = context.anchor_scheduler().inclusion_proof(2).unwrap();
    assert!(proof.verify(&receipt.batch_root));

    context.shutdown();
    for handle in services {
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
    assert!(context.bus().is_closed());
}

#[test]
fn test_duplicate_update_is_rejected_at_ingest() {
    let token = AuthToken::new("dup-token");
    let context = node(&token);
    let mut first = mock_update(7, 3, (60.0, 10.0, 5.0), (0.0, -4.0, 0.0));
    first.priority = Priority::Critical;
    let replay = first.clone();
    context.ingest(first).unwrap();
    assert!(matches!(context.ingest(replay), Err(BusError::Rejected(_))));

    assert_eq!(context.chain().read().unwrap().len(), 1);
    assert_eq!(context.tracks().read().unwrap().get(TrackId(7)).map(|u| u.seq), Some(3));
}

#[tokio::test]
async fn test_tampered_chain_halts_engagements() {
    let token = AuthToken::new("audit-token");
    let context = node(&token);
    let mut update = mock_update(4, 1, (80.0, 0.0, 0.0), (-5.0, 0.0, 0.0));
    update.priority = Priority::Critical;
    context.ingest(update).unwrap();
    context.chain().write().unwrap().entry_mut_unchecked(0).unwrap().payload_mut_unchecked()[0] ^= 0x01;

    assert_eq!(context.session().arm(&token), Err(SessionError::IntegrityHalt));
    assert_eq!(context.session().state(), SessionState::Idle);
    assert_eq!(context.alarm().broken_at(), Some(0));
    assert_eq!(
        context.anchor_scheduler().anchor_pending().await,
        Err(AnchorError::Integrity(IntegrityError::ChainBroken { at_index: 0 }))
    );

    // acknowledging the alarm does not help while the chain is still broken
    context.alarm().reconcile();
    assert_eq!(context.session().arm(&token), Err(SessionError::IntegrityHalt));
}

#[test]
fn test_sweep_evicts_tracks_and_retires_solutions() {
    let token = AuthToken::new("sweep-token");
    let context = node(&token);
    let track = mock_update(9, 1, (90.0, 0.0, 0.0), (-5.0, 0.0, 0.0));
    context.tracks().write().unwrap().ingest(track.clone()).unwrap();

    let calculator =
        LeadCalculator::new(context.ledger_signer(), Duration::from_millis(500), Duration::from_secs(2), 0.85);
    let specs = EffectorSpecs::standard_net_launcher(EFFECTOR);
    let solution =
        calculator.calculate_lead_at(&track, Vec3::new(200.0, 0.0, 0.0), &specs, None, track.timestamp).unwrap();
    context.inbox().offer(Arc::new(solution));

    // nothing is due yet
    assert_eq!(context.supervisor().sweep(Utc::now()).evicted, Vec::<TrackId>::new());

    let report = context.supervisor().sweep(Utc::now() + TimeDelta::seconds(5));
    assert_eq!(report.evicted, vec![TrackId(9)]);
    assert_eq!(report.expired, 1);
    assert!(context.inbox().is_empty());
    assert!(context.tracks().read().unwrap().is_empty());

    // logged before the sweep returns, however late the dispatch loop drains
    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(context.bus().drain_pending(), 0);
    let shared = context.chain();
    let chain = shared.read().unwrap();
    assert_eq!(chain.entries().iter().map(|e| e.kind()).collect::<Vec<_>>(), vec![EvidenceKind::SolutionExpired]);
}
