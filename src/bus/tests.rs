use super::{BusError, BusMessage, DeliveryError, Envelope, MessageSink, Priority, Route, TargetingBus};
use crate::config::BusConfig;
use crate::effector::{EffectorTelemetry, SessionState, SessionTransition};
use crate::evidence::{EvidenceChain, EvidenceKind, EvidenceSigner, IntegrityAlarm, SharedChain};
use crate::track::tests::mock_update;
use crate::track::{ThreatClass, TrackId, TrackNotice};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Defaults with budgets wide enough for a loaded test machine.
pub(crate) fn relaxed_config() -> BusConfig {
    BusConfig {
        budget_critical: Duration::from_millis(250),
        budget_high: Duration::from_millis(250),
        budget_normal: Duration::from_millis(500),
        budget_low: Duration::from_secs(1),
        ..BusConfig::default()
    }
}

pub(crate) fn test_bus(config: &BusConfig) -> (Arc<TargetingBus>, SharedChain) {
    let chain = EvidenceChain::new(Arc::new(EvidenceSigner::generate()), IntegrityAlarm::new()).shared();
    (Arc::new(TargetingBus::new(config, Arc::clone(&chain))), chain)
}

/// Sink that fails the first `failures` attempts with `error`, then accepts.
struct ScriptedSink {
    failures: AtomicU32,
    error: DeliveryError,
    calls: AtomicU32,
    seen: Mutex<Vec<u64>>,
}

impl ScriptedSink {
    fn new(failures: u32, error: DeliveryError) -> Arc<Self> {
        Arc::new(Self { failures: AtomicU32::new(failures), error, calls: AtomicU32::new(0), seen: Mutex::new(Vec::new()) })
    }

    fn accepting() -> Arc<Self> { Self::new(0, DeliveryError::Rejected(String::new())) }

    fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
}

impl MessageSink for ScriptedSink {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        if let Some((_, seq)) = envelope.message.ordering_key() {
            self.seen.lock().unwrap().push(seq);
        }
        Ok(())
    }
}

fn update(seq: u64) -> BusMessage { BusMessage::TrackUpdate(Arc::new(mock_update(1, seq, (80.0, 0.0, 5.0), (-5.0, 0.0, 0.0)))) }

fn notice(id: u64) -> BusMessage {
    BusMessage::TrackNotice(TrackNotice {
        track_id: TrackId(id),
        classification: ThreatClass::SmallUas,
        confidence: 0.9,
        first_seen: Utc::now(),
    })
}

fn telemetry() -> BusMessage {
    BusMessage::Telemetry(EffectorTelemetry {
        effector_id: "NL-T".to_string(),
        sampled_at: Utc::now(),
        ready: true,
        nets_remaining: 2,
        azimuth_deg: 0.0,
        elevation_deg: 0.0,
        fault: None,
    })
}

fn transition() -> BusMessage {
    BusMessage::SessionTransition(SessionTransition {
        effector_id: "NL-T".to_string(),
        from: SessionState::Idle,
        to: SessionState::Armed,
        at: Utc::now(),
        cause: "arm".to_string(),
        token_ref: None,
    })
}

#[test]
fn test_critical_overtakes_queued_messages() {
    let (bus, _) = test_bus(&relaxed_config());
    let mut feed = bus.subscribe_operator();

    bus.send(telemetry(), Priority::Low).unwrap();
    bus.send(notice(3), Priority::Normal).unwrap();
    assert_eq!(bus.pending(), 2);
    bus.send(transition(), Priority::Critical).unwrap();

    // the critical message was delivered before send returned, ahead of the queue
    assert!(matches!(feed.try_recv().unwrap(), BusMessage::SessionTransition(_)));
    assert!(feed.try_recv().is_err());

    assert_eq!(bus.drain_pending(), 2);
    assert!(matches!(feed.try_recv().unwrap(), BusMessage::TrackNotice(_)));
    assert!(matches!(feed.try_recv().unwrap(), BusMessage::Telemetry(_)));
    assert_eq!(bus.stats().delivered, 3);
}

#[test]
fn test_equal_priority_is_fifo() {
    let (bus, _) = test_bus(&relaxed_config());
    let mut feed = bus.subscribe_operator();
    for id in 1..=5 {
        bus.send(notice(id), Priority::Normal).unwrap();
    }
    bus.drain_pending();
    let order: Vec<TrackId> = (0..5)
        .map(|_| match feed.try_recv().unwrap() {
            BusMessage::TrackNotice(n) => n.track_id,
            other => panic!("unexpected {other}"),
        })
        .collect();
    assert_eq!(order, (1..=5).map(TrackId).collect::<Vec<_>>());
}

#[test]
fn test_stale_envelopes_are_dropped() {
    let (bus, chain) = test_bus(&relaxed_config());
    bus.register_sink(Route::TrackIngest, ScriptedSink::accepting());

    let mut queued = Envelope::new(100, update(1), Priority::Normal, Duration::from_millis(20));
    queued.enqueued_at = Instant::now() - Duration::from_millis(50);
    bus.submit(queued).unwrap();
    assert_eq!(bus.drain_pending(), 1);
    assert_eq!(bus.stats().expired, 1);
    assert_eq!(bus.stats().delivered, 0);

    let mut critical = Envelope::new(101, update(2), Priority::Critical, Duration::from_millis(5));
    critical.enqueued_at = Instant::now() - Duration::from_millis(50);
    let err = bus.submit(critical).unwrap_err();
    assert!(matches!(err, BusError::Expired { budget_ms: 5, .. }), "{err:?}");
    assert!(chain.read().unwrap().is_empty());
}

#[test]
fn test_unavailable_sink_is_retried_once() {
    let (bus, _) = test_bus(&relaxed_config());
    let flaky = ScriptedSink::new(1, DeliveryError::Unavailable("warming up".to_string()));
    bus.register_sink(Route::TrackIngest, Arc::clone(&flaky) as Arc<dyn MessageSink>);
    bus.send(update(1), Priority::Critical).unwrap();
    assert_eq!(flaky.calls(), 2);
    assert_eq!(bus.stats().retried, 1);
    assert_eq!(bus.stats().delivered, 1);

    let down = ScriptedSink::new(u32::MAX, DeliveryError::Unavailable("offline".to_string()));
    bus.register_sink(Route::TrackIngest, Arc::clone(&down) as Arc<dyn MessageSink>);
    let err = bus.send(update(2), Priority::Critical).unwrap_err();
    assert!(matches!(err, BusError::DeliveryFailed { attempts: 2, .. }), "{err:?}");
    assert_eq!(down.calls(), 2);
    assert_eq!(bus.stats().failed, 1);
}

#[test]
fn test_rejection_is_not_retried() {
    let (bus, chain) = test_bus(&relaxed_config());
    let refusing = ScriptedSink::new(u32::MAX, DeliveryError::Rejected("malformed".to_string()));
    bus.register_sink(Route::TrackIngest, Arc::clone(&refusing) as Arc<dyn MessageSink>);
    let err = bus.send(update(1), Priority::Critical).unwrap_err();
    assert_eq!(err, BusError::Rejected("malformed".to_string()));
    assert_eq!(refusing.calls(), 1);
    assert_eq!(bus.stats().rejected, 1);
    assert!(chain.read().unwrap().is_empty());
}

#[test]
fn test_track_sequence_never_regresses() {
    let (bus, _) = test_bus(&relaxed_config());
    let sink = ScriptedSink::accepting();
    bus.register_sink(Route::TrackIngest, Arc::clone(&sink) as Arc<dyn MessageSink>);

    bus.send(update(5), Priority::Critical).unwrap();
    let err = bus.send(update(3), Priority::Critical).unwrap_err();
    assert_eq!(err, BusError::OutOfOrder { track: TrackId(1), last: 5, got: 3 });
    bus.send(update(5), Priority::Critical).unwrap();
    bus.send(update(6), Priority::Critical).unwrap();
    assert_eq!(*sink.seen.lock().unwrap(), vec![5, 5, 6]);
    assert_eq!(bus.stats().out_of_order, 1);

    // an evicted track starts over
    bus.forget_track(TrackId(1));
    bus.send(update(1), Priority::Critical).unwrap();
}

#[test]
fn test_concurrent_senders_keep_track_order() {
    let (bus, chain) = test_bus(&relaxed_config());
    let sink = ScriptedSink::accepting();
    bus.register_sink(Route::TrackIngest, Arc::clone(&sink) as Arc<dyn MessageSink>);
    let next_seq = AtomicU64::new(1);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..250 {
                    let seq = next_seq.fetch_add(1, Ordering::SeqCst);
                    match bus.send(update(seq), Priority::Critical) {
                        Ok(()) | Err(BusError::OutOfOrder { .. }) => {}
                        Err(e) => panic!("unexpected {e}"),
                    }
                }
            });
        }
    });

    let seen = sink.seen.lock().unwrap();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "sink saw a regression");
    let stats = bus.stats();
    assert_eq!(stats.delivered + stats.out_of_order, 2000);
    assert_eq!(seen.len() as u64, stats.delivered);
    assert_eq!(chain.read().unwrap().len() as u64, stats.delivered);
}

#[test]
fn test_undelivered_update_keeps_watermark() {
    let (bus, _) = test_bus(&relaxed_config());
    let sink = ScriptedSink::new(1, DeliveryError::Rejected("covariance".to_string()));
    bus.register_sink(Route::TrackIngest, Arc::clone(&sink) as Arc<dyn MessageSink>);

    assert!(matches!(bus.send(update(5), Priority::Critical), Err(BusError::Rejected(_))));
    bus.send(update(4), Priority::Critical).unwrap();
    assert_eq!(*sink.seen.lock().unwrap(), vec![4]);
    assert_eq!(bus.stats().out_of_order, 0);
}

#[test]
fn test_only_evidential_messages_are_logged() {
    let (bus, chain) = test_bus(&relaxed_config());
    bus.register_sink(Route::TrackIngest, ScriptedSink::accepting());
    bus.send(update(1), Priority::Critical).unwrap();
    bus.send(telemetry(), Priority::Critical).unwrap();
    bus.send(notice(1), Priority::Critical).unwrap();
    bus.send(transition(), Priority::Critical).unwrap();

    let chain = chain.read().unwrap();
    let kinds: Vec<EvidenceKind> = chain.entries().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec![EvidenceKind::TrackUpdate, EvidenceKind::SessionTransition]);
    assert_eq!(chain.entries()[0].sender().to_string(), "tbus-0/fusion");
    assert_eq!(chain.verify(), Ok(()));
}

#[test]
fn test_queue_overflow_and_missing_route() {
    let (bus, _) = test_bus(&BusConfig { queue_capacity: 2, ..relaxed_config() });
    bus.send(notice(1), Priority::Normal).unwrap();
    bus.send(notice(2), Priority::Normal).unwrap();
    assert_eq!(bus.send(notice(3), Priority::Normal), Err(BusError::QueueFull { capacity: 2 }));
    assert_eq!(bus.stats().queue_full, 1);

    assert_eq!(bus.send(update(1), Priority::Critical), Err(BusError::NoRoute(Route::TrackIngest)));
}

#[test]
fn test_closed_bus_refuses_sends() {
    let (bus, _) = test_bus(&relaxed_config());
    bus.close();
    assert!(bus.is_closed());
    assert_eq!(bus.send(transition(), Priority::Critical), Err(BusError::Closed));
    assert_eq!(bus.send(notice(1), Priority::Low), Err(BusError::Closed));
}

#[tokio::test]
async fn test_run_loop_delivers_and_stops() {
    let (bus, _) = test_bus(&relaxed_config());
    let sink = ScriptedSink::accepting();
    bus.register_sink(Route::TrackIngest, Arc::clone(&sink) as Arc<dyn MessageSink>);
    let runner = Arc::clone(&bus);
    let handle = tokio::spawn(async move { runner.run().await });

    bus.send(update(1), Priority::High).unwrap();
    bus.send(update(2), Priority::Normal).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while sink.seen.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*sink.seen.lock().unwrap(), vec![1, 2]);

    bus.close();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}
