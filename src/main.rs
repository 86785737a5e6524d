#![allow(dead_code, clippy::similar_names)]
#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
mod bus;
mod common;
mod config;
mod effector;
mod evidence;
mod lead;
mod logger;
mod node;
mod track;

use crate::common::{Mat3, Vec3};
use crate::config::BusConfig;
use crate::effector::{AuthToken, SimulatedNetLauncher, StaticRoe};
use crate::evidence::{AnchorProvider, EvidenceKind, LocalAnchor, SolanaRpcAnchor};
use crate::lead::EffectorSpecs;
use crate::node::NodeContext;
use crate::track::{ThreatClass, TrackId, TrackUpdate};
use chrono::{TimeDelta, Utc};
use itertools::Itertools;
use std::{env, sync::Arc, time::Duration};
use strum::IntoEnumIterator;

#[cfg(all(feature = "profiling", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const EFFECTOR_ID: &str = "NL-1";
const EFFECTOR_POSITION: Vec3<f64> = Vec3::new(200.0, 0.0, 0.0);
const FEED_PERIOD: Duration = Duration::from_millis(100);
const FEED_UPDATES: u64 = 10;
const SOLUTION_WAIT: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let config = BusConfig::from_env();
    let token = AuthToken::new(&env::var("TBUS_AUTH_TOKEN").unwrap_or_else(|_| "demo-roe-token".to_string()));
    let roe = Arc::new(StaticRoe::new().grant(&token, EFFECTOR_ID, Utc::now() + TimeDelta::hours(1)));
    let anchor: Arc<dyn AnchorProvider> = match env::var("TBUS_SOLANA_RPC") {
        Ok(url) => Arc::new(
            SolanaRpcAnchor::new(&url, "devnet").unwrap_or_else(|e| fatal!("Cannot reach anchoring service: {e}")),
        ),
        Err(_) => Arc::new(LocalAnchor::new()),
    };
    let driver = Arc::new(SimulatedNetLauncher::new(EFFECTOR_ID, 4));
    let context = Arc::new(NodeContext::new(
        config,
        EffectorSpecs::standard_net_launcher(EFFECTOR_ID),
        EFFECTOR_POSITION,
        driver,
        roe,
        anchor,
    ));
    let services = context.spawn_services();

    let session = context.session();
    if let Err(e) = session.arm(&token) {
        fatal!("Could not arm {EFFECTOR_ID}: {e}");
    }

    let feed_context = Arc::clone(&context);
    let feed = tokio::spawn(async move { run_fusion_feed(&feed_context).await });

    let deadline = tokio::time::Instant::now() + SOLUTION_WAIT;
    let solution = loop {
        if let Some(solution) = context.inbox().latest_for(TrackId(1)) {
            break Some(solution);
        }
        if tokio::time::Instant::now() > deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    match solution {
        Some(solution) => match session.fire(solution) {
            Ok(()) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                match session.observe_release() {
                    Ok(report) => info!("Engagement filed: {}", report.outcome()),
                    Err(e) => error!("Engagement not completed: {e}"),
                }
            }
            Err(e) => warn!("Solution rejected: {e}"),
        },
        None => {
            warn!("No fire solution within {SOLUTION_WAIT:?}, safing");
            session.safe();
        }
    }
    if let Err(e) = feed.await {
        error!("Fusion feed task failed: {e}");
    }

    match context.anchor_scheduler().anchor_pending().await {
        Ok(Some(receipt)) => evid!("Batch {}..{} anchored as {}", receipt.batch_start, receipt.batch_end, receipt.tx.tx_id),
        Ok(None) => log!("Nothing left to anchor"),
        Err(e) => warn!("Final anchoring failed: {e}"),
    }

    context.shutdown();
    for res in futures::future::join_all(services).await {
        if let Err(e) = res {
            error!("Service task failed: {e}");
        }
    }

    let shared_chain = context.chain();
    let chain = shared_chain.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock");
    let kinds = chain.entries().iter().map(|e| e.kind()).counts();
    for kind in EvidenceKind::iter() {
        info!("{kind}: {}", kinds.get(&kind).copied().unwrap_or(0));
    }
    match chain.verify() {
        Ok(()) => info!("Evidence chain of {} entries verified, head {}", chain.len(), chain.head_hash()),
        Err(e) => error!("Evidence chain verification failed: {e}"),
    }
    info!("Bus: {}", context.bus().stats());
}

/// Simulated fusion engine: one hostile small UAS receding from the launcher at 10 m/s.
async fn run_fusion_feed(context: &NodeContext) {
    let start_pos = Vec3::new(100.0, 0.0, 0.0);
    let velocity = Vec3::new(-10.0, 0.0, 0.0);
    for seq in 1..=FEED_UPDATES {
        #[allow(clippy::cast_precision_loss)]
        let elapsed = (seq - 1) as f64 * FEED_PERIOD.as_secs_f64();
        let update = TrackUpdate {
            track_id: TrackId(1),
            seq,
            timestamp: Utc::now(),
            position: start_pos + velocity * elapsed,
            position_cov: Mat3::diagonal([0.04, 0.04, 0.04]),
            velocity,
            velocity_cov: Mat3::diagonal([0.01, 0.01, 0.01]),
            acceleration: Vec3::zero(),
            classification: ThreatClass::SmallUas,
            confidence: 0.95,
            engagement_authorized: true,
            priority: bus::Priority::High,
        };
        if let Err(e) = context.ingest(update) {
            warn!("Fusion update {seq} not accepted: {e}");
        }
        tokio::time::sleep(FEED_PERIOD).await;
    }
}
