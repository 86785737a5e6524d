use super::track_ingest::IngestEvent;
use crate::bus::{BusMessage, Priority, TargetingBus};
use crate::common::Vec3;
use crate::effector::EffectorSession;
use crate::lead::{EffectorSpecs, LeadCalculator, LeadError};
use crate::track::TrackNotice;
use crate::{error, event, info, warn};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Computes lead solutions for ingested tracks off the dispatch loop and offers them
/// to the effector boundary.
pub struct LeadWorker {
    calculator: Arc<LeadCalculator>,
    specs: EffectorSpecs,
    effector_position: Vec3<f64>,
    bus: Arc<TargetingBus>,
    session: Arc<EffectorSession>,
    events: Mutex<Option<mpsc::Receiver<IngestEvent>>>,
}

impl LeadWorker {
    pub fn new(
        calculator: Arc<LeadCalculator>,
        specs: EffectorSpecs,
        effector_position: Vec3<f64>,
        bus: Arc<TargetingBus>,
        session: Arc<EffectorSession>,
        events: mpsc::Receiver<IngestEvent>,
    ) -> Self {
        Self { calculator, specs, effector_position, bus, session, events: Mutex::new(Some(events)) }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut events) = self.events.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").take()
        else {
            warn!("Lead worker already running");
            return;
        };
        info!("Lead worker started for {}", self.specs.effector_id);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
    }

    async fn handle(&self, event: IngestEvent) {
        let update = event.update;
        if event.first_seen {
            let notice = TrackNotice {
                track_id: update.track_id,
                classification: update.classification,
                confidence: update.confidence,
                first_seen: update.timestamp,
            };
            if let Err(e) = self.bus.send(BusMessage::TrackNotice(notice), Priority::Normal) {
                warn!("Track notice for {} not sent: {e}", update.track_id);
            }
        }
        if let Err(e) = self.calculator.qualifies(&update) {
            event!("No lead for {}: {e}", update.track_id);
            return;
        }

        let calculator = Arc::clone(&self.calculator);
        let specs = self.specs.clone();
        let position = self.effector_position;
        let token_ref = self.session.armed_token();
        let track = Arc::clone(&update);
        let solved = tokio::task::spawn_blocking(move || {
            calculator.calculate_lead_at(&track, position, &specs, token_ref, Utc::now())
        })
        .await;

        match solved {
            Ok(Ok(solution)) => {
                event!("Lead {} for {} seq {}: TTI {:.3} s", solution.id(), update.track_id, update.seq, solution.time_to_intercept());
                if let Err(e) = self.bus.send(BusMessage::FireSolution(Arc::new(solution)), Priority::Critical) {
                    warn!("Solution for {} not offered: {e}", update.track_id);
                }
            }
            Ok(Err(e @ (LeadError::StaleTrack { .. } | LeadError::OutOfRange(_) | LeadError::NotQualified(_)))) => {
                event!("No lead for {} seq {}: {e}", update.track_id, update.seq);
            }
            Ok(Err(e)) => warn!("Lead computation for {} seq {} failed: {e}", update.track_id, update.seq),
            Err(e) => error!("Lead task for {} panicked: {e}", update.track_id),
        }
    }
}
