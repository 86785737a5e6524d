use super::lead_worker::LeadWorker;
use super::supervisor::Supervisor;
use super::track_ingest::TrackIngestSink;
use crate::bus::{BusError, BusMessage, Route, TargetingBus};
use crate::common::Vec3;
use crate::config::BusConfig;
use crate::effector::{DriverSink, EffectorDriver, EffectorSession, RoeReference, SessionDeps, SolutionInbox};
use crate::evidence::{AnchorProvider, AnchorScheduler, EvidenceChain, EvidenceSigner, IntegrityAlarm, SharedChain};
use crate::info;
use crate::lead::{EffectorSpecs, LeadCalculator};
use crate::track::{TrackStore, TrackUpdate};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every collaborator of one targeting node, wired once at start-up.
///
/// Components receive their dependencies from here as constructor arguments; nothing
/// is reached through globals.
pub struct NodeContext {
    config: BusConfig,
    bus: Arc<TargetingBus>,
    chain: SharedChain,
    alarm: IntegrityAlarm,
    tracks: Arc<RwLock<TrackStore>>,
    inbox: Arc<SolutionInbox>,
    driver: Arc<dyn EffectorDriver>,
    session: Arc<EffectorSession>,
    lead_worker: Arc<LeadWorker>,
    supervisor: Arc<Supervisor>,
    anchor_scheduler: Arc<AnchorScheduler>,
    ledger_signer: Arc<EvidenceSigner>,
    cancel: CancellationToken,
}

impl NodeContext {
    /// Capacity of the ingest → lead worker channel.
    const LEAD_QUEUE_CAPACITY: usize = 64;

    pub fn new(
        config: BusConfig,
        specs: EffectorSpecs,
        effector_position: Vec3<f64>,
        driver: Arc<dyn EffectorDriver>,
        roe: Arc<dyn RoeReference>,
        anchor: Arc<dyn AnchorProvider>,
    ) -> Self {
        let config = config.sanitized();
        let alarm = IntegrityAlarm::new();
        let ledger_signer = Arc::new(EvidenceSigner::generate());
        let lead_signer = Arc::new(EvidenceSigner::generate());
        let session_signer = Arc::new(EvidenceSigner::generate());

        let chain = EvidenceChain::new(Arc::clone(&ledger_signer), alarm.clone()).shared();
        let bus = Arc::new(TargetingBus::new(&config, Arc::clone(&chain)));
        let tracks = Arc::new(RwLock::new(TrackStore::new(config.staleness_window, config.retired_retention)));
        let inbox = Arc::new(SolutionInbox::new());

        let (lead_tx, lead_rx) = mpsc::channel(Self::LEAD_QUEUE_CAPACITY);
        bus.register_sink(Route::TrackIngest, Arc::new(TrackIngestSink::new(Arc::clone(&tracks), lead_tx)));
        let boundary: Arc<SolutionInbox> = Arc::clone(&inbox);
        bus.register_sink(Route::EffectorBoundary, boundary);
        bus.register_sink(Route::EffectorDriver, Arc::new(DriverSink::new(Arc::clone(&driver))));

        let session = Arc::new(EffectorSession::new(
            &specs.effector_id,
            config.engagement_cooldown,
            SessionDeps {
                bus: Arc::clone(&bus),
                roe,
                driver: Arc::clone(&driver),
                alarm: alarm.clone(),
                inbox: Arc::clone(&inbox),
                tracks: Arc::clone(&tracks),
                signer: session_signer,
                solution_key: lead_signer.verifying_key(),
            },
        ));
        let calculator = Arc::new(LeadCalculator::new(
            lead_signer,
            config.staleness_window,
            config.solution_validity,
            config.min_threat_confidence,
        ));
        let lead_worker = Arc::new(LeadWorker::new(
            calculator,
            specs,
            effector_position,
            Arc::clone(&bus),
            Arc::clone(&session),
            lead_rx,
        ));
        let supervisor =
            Arc::new(Supervisor::new(Arc::clone(&tracks), Arc::clone(&inbox), Arc::clone(&bus), config.sweep_interval));
        let anchor_scheduler = Arc::new(AnchorScheduler::new(Arc::clone(&chain), anchor, Arc::clone(&bus), &config));

        Self {
            config,
            bus,
            chain,
            alarm,
            tracks,
            inbox,
            driver,
            session,
            lead_worker,
            supervisor,
            anchor_scheduler,
            ledger_signer,
            cancel: CancellationToken::new(),
        }
    }

    /// Starts the dispatch loop, lead worker, supervisor sweep and anchor scheduler.
    pub fn spawn_services(&self) -> Vec<JoinHandle<()>> {
        let bus = Arc::clone(&self.bus);
        let lead_worker = Arc::clone(&self.lead_worker);
        let supervisor = Arc::clone(&self.supervisor);
        let anchor_scheduler = Arc::clone(&self.anchor_scheduler);
        let (lead_cancel, sweep_cancel, anchor_cancel) =
            (self.cancel.child_token(), self.cancel.child_token(), self.cancel.child_token());
        info!("Starting services of node {}", self.config.node_name);
        vec![
            tokio::spawn(async move { bus.run().await }),
            tokio::spawn(async move { lead_worker.run(lead_cancel).await }),
            tokio::spawn(async move { supervisor.run(sweep_cancel).await }),
            tokio::spawn(async move { anchor_scheduler.run(anchor_cancel).await }),
        ]
    }

    /// Entry point of the fusion feed.
    ///
    /// # Errors
    /// - [`BusError`] if the update could not be queued.
    pub fn ingest(&self, update: TrackUpdate) -> Result<(), BusError> {
        let priority = update.priority;
        self.bus.send(BusMessage::TrackUpdate(Arc::new(update)), priority)
    }

    /// Stops every service and closes the bus.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.bus.close();
    }

    pub fn config(&self) -> &BusConfig { &self.config }
    pub fn bus(&self) -> Arc<TargetingBus> { Arc::clone(&self.bus) }
    pub fn chain(&self) -> SharedChain { Arc::clone(&self.chain) }
    pub fn alarm(&self) -> IntegrityAlarm { self.alarm.clone() }
    pub fn tracks(&self) -> Arc<RwLock<TrackStore>> { Arc::clone(&self.tracks) }
    pub fn inbox(&self) -> Arc<SolutionInbox> { Arc::clone(&self.inbox) }
    pub fn driver(&self) -> Arc<dyn EffectorDriver> { Arc::clone(&self.driver) }
    pub fn session(&self) -> Arc<EffectorSession> { Arc::clone(&self.session) }
    pub fn supervisor(&self) -> Arc<Supervisor> { Arc::clone(&self.supervisor) }
    pub fn anchor_scheduler(&self) -> Arc<AnchorScheduler> { Arc::clone(&self.anchor_scheduler) }
    pub fn ledger_signer(&self) -> Arc<EvidenceSigner> { Arc::clone(&self.ledger_signer) }
}
