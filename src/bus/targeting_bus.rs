use super::Priority;
use super::bus_message::{BusMessage, Envelope, Route};
use super::bus_stats::{BusStats, BusStatsSnapshot};
use super::message_sink::{DeliveryError, MessageSink};
use super::priority_queue::LockedPriorityQueue;
use crate::config::BusConfig;
use crate::evidence::{EvidenceError, SharedChain};
use crate::track::TrackId;
use crate::{event, info, warn};
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("{message} expired after {age_ms} ms (budget {budget_ms} ms)")]
    Expired { message: String, age_ms: u64, budget_ms: u64 },
    #[error("dispatch queue full ({capacity} envelopes)")]
    QueueFull { capacity: usize },
    #[error("no sink registered for route {0}")]
    NoRoute(Route),
    #[error("sequence {got} of track {track} is behind delivered sequence {last}")]
    OutOfOrder { track: TrackId, last: u64, got: u64 },
    #[error("delivery failed after {attempts} attempts: {reason}")]
    DeliveryFailed { attempts: u8, reason: String },
    #[error("receiver rejected message: {0}")]
    Rejected(String),
    #[error("targeting bus is closed")]
    Closed,
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

fn millis(d: Duration) -> u64 { u64::try_from(d.as_millis()).unwrap_or(u64::MAX) }

/// Highest sequence delivered on one (route, track) pair. Its lock is held for the
/// whole dispatch of an ordered message, so deliveries on a lane never interleave.
type OrderingLane = Arc<Mutex<Option<u64>>>;

/// Priority-queued router between the node's components.
///
/// Critical messages are dispatched on the caller's thread before `send` returns; all
/// other priorities are queued and drained by [`TargetingBus::run`]. Every dispatch
/// enforces the priority's latency budget and per-track ordering, and a successfully
/// delivered evidential message is appended to the evidence chain, which only the bus
/// writes to.
pub struct TargetingBus {
    node_name: String,
    config: BusConfig,
    queue: LockedPriorityQueue,
    sinks: RwLock<HashMap<Route, Arc<dyn MessageSink>>>,
    lanes: Mutex<HashMap<(Route, TrackId), OrderingLane>>,
    ledger: SharedChain,
    operator_feed: broadcast::Sender<BusMessage>,
    wakeup: Notify,
    tickets: AtomicU64,
    stats: BusStats,
    cancel: CancellationToken,
}

impl TargetingBus {
    const OPERATOR_FEED_CAPACITY: usize = 256;

    pub fn new(config: &BusConfig, ledger: SharedChain) -> Self {
        let (operator_feed, _) = broadcast::channel(Self::OPERATOR_FEED_CAPACITY);
        Self {
            node_name: config.node_name.clone(),
            config: config.clone(),
            queue: LockedPriorityQueue::new(config.queue_capacity),
            sinks: RwLock::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            ledger,
            operator_feed,
            wakeup: Notify::new(),
            tickets: AtomicU64::new(0),
            stats: BusStats::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Installs the receiver for `route`, replacing any previous one.
    pub fn register_sink(&self, route: Route, sink: Arc<dyn MessageSink>) {
        self.sinks.write().expect("[FATAL] RwLock poisoned: Failed to acquire lock").insert(route, sink);
    }

    /// Operator displays subscribe here for reports, transitions and telemetry.
    pub fn subscribe_operator(&self) -> broadcast::Receiver<BusMessage> { self.operator_feed.subscribe() }

    /// Submits `message` with `priority`.
    ///
    /// Critical messages are fully dispatched (delivered, acknowledged and evidence
    /// logged) before this returns. Other priorities return as soon as they are queued.
    ///
    /// # Errors
    /// - [`BusError::Closed`] after [`TargetingBus::close`].
    /// - [`BusError::QueueFull`] if a non-critical message does not fit the queue.
    /// - Any dispatch error for Critical messages.
    pub fn send(&self, message: BusMessage, priority: Priority) -> Result<(), BusError> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        self.submit(Envelope::new(ticket, message, priority, self.config.budget(priority)))
    }

    pub(crate) fn submit(&self, envelope: Envelope) -> Result<(), BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }
        if envelope.priority == Priority::Critical {
            return self.dispatch(envelope);
        }
        self.queue.push(envelope).map_err(|rejected| {
            BusStats::bump(&self.stats.queue_full);
            warn!("Dispatch queue full, dropping {} ({})", rejected.message, rejected.priority);
            BusError::QueueFull { capacity: self.queue.capacity() }
        })?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Dispatch loop: drains the queue whenever new envelopes arrive, until closed.
    pub async fn run(&self) {
        info!("Targeting bus dispatch loop started on {}", self.node_name);
        loop {
            self.drain_pending();
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.wakeup.notified() => {}
            }
        }
        let dropped = self.queue.clear();
        info!("Targeting bus closed ({dropped} queued envelopes dropped, {})", self.stats());
    }

    /// Dispatches every queued envelope in priority order and returns how many were
    /// taken off the queue. Failures are logged and counted, not returned.
    pub fn drain_pending(&self) -> usize {
        let mut drained = 0;
        while let Some(envelope) = self.queue.pop() {
            drained += 1;
            let _ = self.dispatch(envelope);
        }
        drained
    }

    fn dispatch(&self, mut envelope: Envelope) -> Result<(), BusError> {
        let result = self.check_fresh(&envelope).and_then(|()| match envelope.message.ordering_key() {
            Some((track, seq)) => self.dispatch_ordered(&mut envelope, track, seq),
            None => {
                self.deliver(&mut envelope)?;
                self.record_evidence(&envelope)
            }
        });
        match &result {
            Ok(()) => {
                BusStats::bump(&self.stats.delivered);
                event!("{} #{} delivered to {} ({})", envelope.message, envelope.ticket, envelope.message.route(), envelope.priority);
            }
            Err(e) => warn!("Dropped {} #{} ({}): {e}", envelope.message, envelope.ticket, envelope.priority),
        }
        result
    }

    fn check_fresh(&self, envelope: &Envelope) -> Result<(), BusError> {
        if envelope.is_expired() {
            BusStats::bump(&self.stats.expired);
            return Err(BusError::Expired {
                message: envelope.message.to_string(),
                age_ms: millis(envelope.age()),
                budget_ms: millis(envelope.budget),
            });
        }
        Ok(())
    }

    fn lane(&self, route: Route, track: TrackId) -> OrderingLane {
        let mut lanes = self.lanes.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock");
        Arc::clone(lanes.entry((route, track)).or_default())
    }

    /// Enforces non-decreasing sequence numbers per route and track. Only a delivered
    /// message moves the lane forward.
    fn dispatch_ordered(&self, envelope: &mut Envelope, track: TrackId, seq: u64) -> Result<(), BusError> {
        let lane = self.lane(envelope.message.route(), track);
        let mut watermark = lane.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock");
        if let Some(last) = watermark.filter(|last| seq < *last) {
            BusStats::bump(&self.stats.out_of_order);
            return Err(BusError::OutOfOrder { track, last, got: seq });
        }
        self.deliver(envelope)?;
        *watermark = Some(seq);
        self.record_evidence(envelope)
    }

    /// One delivery attempt, plus at most the configured number of immediate retries
    /// for an unavailable receiver. A retry keeps the envelope's age and priority.
    fn deliver(&self, envelope: &mut Envelope) -> Result<(), BusError> {
        let route = envelope.message.route();
        match route {
            Route::Ledger => return Ok(()),
            Route::Operator => {
                // no subscribers is not a failure
                let _ = self.operator_feed.send(envelope.message.clone());
                return Ok(());
            }
            _ => {}
        }
        let sink = self
            .sinks
            .read()
            .expect("[FATAL] RwLock poisoned: Failed to acquire lock")
            .get(&route)
            .cloned()
            .ok_or(BusError::NoRoute(route))?;
        loop {
            envelope.attempts += 1;
            match sink.deliver(envelope) {
                Ok(()) => return Ok(()),
                Err(DeliveryError::Rejected(reason)) => {
                    BusStats::bump(&self.stats.rejected);
                    return Err(BusError::Rejected(reason));
                }
                Err(DeliveryError::Unavailable(reason)) => {
                    if envelope.attempts > self.config.delivery_retries {
                        BusStats::bump(&self.stats.failed);
                        return Err(BusError::DeliveryFailed { attempts: envelope.attempts, reason });
                    }
                    self.check_fresh(envelope)?;
                    BusStats::bump(&self.stats.retried);
                    event!("Retrying {} #{} after: {reason}", envelope.message, envelope.ticket);
                }
            }
        }
    }

    fn record_evidence(&self, envelope: &Envelope) -> Result<(), BusError> {
        if let Some(record) = envelope.message.evidence_record(&self.node_name)? {
            self.ledger.write().expect("[FATAL] RwLock poisoned: Failed to acquire lock").append(record);
        }
        Ok(())
    }

    /// Forgets the ordering state of an evicted track.
    pub fn forget_track(&self, track: TrackId) {
        self.lanes.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").retain(|(_, t), _| *t != track);
    }

    /// Stops the dispatch loop; later sends fail with [`BusError::Closed`].
    pub fn close(&self) { self.cancel.cancel(); }

    pub fn is_closed(&self) -> bool { self.cancel.is_cancelled() }

    pub fn pending(&self) -> usize { self.queue.len() }

    pub fn stats(&self) -> BusStatsSnapshot { self.stats.snapshot() }

    pub fn ledger(&self) -> SharedChain { Arc::clone(&self.ledger) }

    pub fn node_name(&self) -> &str { &self.node_name }
}
