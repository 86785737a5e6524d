use crate::bus::{BusMessage, DeliveryError, Envelope, MessageSink};
use crate::track::{TrackStore, TrackUpdate};
use crate::{event, warn};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Accepted track update handed from ingestion to the lead worker.
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub update: Arc<TrackUpdate>,
    /// Whether this update started a new track.
    pub first_seen: bool,
}

/// Receiving end of the `TrackIngest` route: the only writer of the track store.
pub struct TrackIngestSink {
    tracks: Arc<RwLock<TrackStore>>,
    lead_tx: mpsc::Sender<IngestEvent>,
}

impl TrackIngestSink {
    pub fn new(tracks: Arc<RwLock<TrackStore>>, lead_tx: mpsc::Sender<IngestEvent>) -> Self {
        Self { tracks, lead_tx }
    }
}

impl MessageSink for TrackIngestSink {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let BusMessage::TrackUpdate(update) = &envelope.message else {
            return Err(DeliveryError::Rejected(format!("track ingest cannot handle {}", envelope.message)));
        };
        let first_seen = {
            let mut tracks = self.tracks.write().expect("[FATAL] RwLock poisoned: Failed to acquire lock");
            let first_seen = tracks.get(update.track_id).is_none();
            tracks.ingest(Arc::clone(update)).map_err(|reason| {
                warn!("Rejected update {} of {}: {reason}", update.seq, update.track_id);
                DeliveryError::Rejected(reason.to_string())
            })?;
            first_seen
        };
        event!("Ingested {} seq {}", update.track_id, update.seq);
        // the update is stored either way; a busy lead worker only skips this computation
        if let Err(e) = self.lead_tx.try_send(IngestEvent { update: Arc::clone(update), first_seen }) {
            warn!("Lead worker busy, skipping lead for {} seq {}: {e}", update.track_id, update.seq);
        }
        Ok(())
    }
}
