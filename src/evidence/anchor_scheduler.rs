use super::anchor::{AnchorError, AnchorProvider, AnchorReceipt};
use super::digest::Digest;
use super::evidence_chain::SharedChain;
use super::evidence_entry::{EvidenceEntry, EvidenceKind};
use super::merkle::{MerkleProof, merkle_proof, merkle_root};
use crate::bus::{BusMessage, Priority, TargetingBus};
use crate::common::math::capped_backoff;
use crate::config::BusConfig;
use crate::{evid, event, warn};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically batches new evidence entries, anchors their Merkle root and logs the
/// returned receipt as the batch's terminal entry.
///
/// Anchoring runs beside the chain: appends and verification never wait for it, and a
/// failed batch is simply retried on a later cycle with exponential backoff. Receipts
/// that were not yet confirmed are polled again on every cycle; a confirmation is
/// logged as a second receipt entry for the same batch.
pub struct AnchorScheduler {
    chain: SharedChain,
    provider: Arc<dyn AnchorProvider>,
    bus: Arc<TargetingBus>,
    interval: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    cursor: AtomicUsize,
    failures: AtomicU32,
    receipts: Mutex<Vec<AnchorReceipt>>,
    cycle: tokio::sync::Mutex<()>,
}

impl AnchorScheduler {
    pub fn new(chain: SharedChain, provider: Arc<dyn AnchorProvider>, bus: Arc<TargetingBus>, config: &BusConfig) -> Self {
        Self {
            chain,
            provider,
            bus,
            interval: config.anchor_interval,
            backoff_base: config.anchor_backoff_base,
            backoff_max: config.anchor_backoff_max,
            cursor: AtomicUsize::new(0),
            failures: AtomicU32::new(0),
            receipts: Mutex::new(Vec::new()),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.next_delay()) => {}
            }
            if let Err(e) = self.anchor_pending().await {
                warn!("Anchoring failed ({e}), retrying in {:?}", self.next_delay());
            }
        }
    }

    /// Delay before the next cycle: the regular interval, or the backoff after failures.
    pub fn next_delay(&self) -> Duration {
        match self.failures.load(Ordering::Relaxed) {
            0 => self.interval,
            n => capped_backoff(self.backoff_base, self.backoff_max, n - 1),
        }
    }

    /// Anchors every entry appended since the last successful batch.
    ///
    /// The whole chain is verified first and a broken chain is never anchored. Receipts
    /// are left out of the leaves; each one is still covered by the hash link of the
    /// entry that follows it. Overlapping calls run one after the other.
    ///
    /// # Errors
    /// - [`AnchorError::Integrity`] if the chain does not verify; the alarm is raised.
    /// - [`AnchorError`] from the provider, or [`AnchorError::Ledger`] if the receipt
    ///   could not be sent. The batch stays pending in both cases.
    pub async fn anchor_pending(&self) -> Result<Option<AnchorReceipt>, AnchorError> {
        let _cycle = self.cycle.lock().await;
        self.chain.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock").verify()?;
        self.reconfirm().await;

        let start = self.cursor.load(Ordering::SeqCst);
        let batch = self.chain.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock").export_batch(start);
        let end = start + batch.len();
        let leaves = Self::leaves(&batch);
        let Some(root) = merkle_root(&leaves) else {
            self.cursor.store(end, Ordering::SeqCst);
            return Ok(None);
        };

        let result = self.submit(start, end, root).await;
        match &result {
            Ok(receipt) => {
                self.failures.store(0, Ordering::Relaxed);
                self.cursor.store(end, Ordering::SeqCst);
                self.receipts.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").push(receipt.clone());
                evid!(
                    "Anchored entries {start}..{end} as {} via {}:{} (confirmed: {})",
                    root.short(),
                    receipt.tx.network,
                    receipt.tx.tx_id,
                    receipt.tx.confirmed
                );
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result.map(Some)
    }

    /// Polls the provider for every receipt still unconfirmed and logs the ones that
    /// confirmed since the last cycle.
    async fn reconfirm(&self) {
        let pending: Vec<AnchorReceipt> = self
            .receipts
            .lock()
            .expect("[FATAL] Mutex poisoned: Failed to acquire lock")
            .iter()
            .filter(|r| !r.tx.confirmed)
            .cloned()
            .collect();
        for receipt in pending {
            let tx = match self.provider.confirm(&receipt.tx).await {
                Ok(tx) if tx.confirmed => tx,
                Ok(_) => {
                    event!("Anchor {} still pending", receipt.tx.tx_id);
                    continue;
                }
                Err(e) => {
                    warn!("Anchor {} not confirmed yet: {e}", receipt.tx.tx_id);
                    continue;
                }
            };
            let confirmed = AnchorReceipt { tx, ..receipt };
            if let Err(e) = self.bus.send(BusMessage::AnchorReceipt(confirmed.clone()), Priority::Critical) {
                warn!("Confirmation of {} not logged, polling again next cycle: {e}", confirmed.tx.tx_id);
                continue;
            }
            evid!(
                "Anchor of entries {}..{} confirmed as {}:{}",
                confirmed.batch_start,
                confirmed.batch_end,
                confirmed.tx.network,
                confirmed.tx.tx_id
            );
            let mut receipts = self.receipts.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock");
            if let Some(stored) = receipts.iter_mut().find(|r| r.batch_start == confirmed.batch_start) {
                *stored = confirmed;
            }
        }
    }

    async fn submit(&self, start: usize, end: usize, root: Digest) -> Result<AnchorReceipt, AnchorError> {
        let tx = self.provider.anchor(&root).await?;
        let tx = match self.provider.confirm(&tx).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!("Anchor {} not confirmed yet: {e}", tx.tx_id);
                tx
            }
        };
        let receipt = AnchorReceipt { batch_start: start, batch_end: end, batch_root: root, tx };
        self.bus
            .send(BusMessage::AnchorReceipt(receipt.clone()), Priority::Critical)
            .map_err(|e| AnchorError::Ledger(e.to_string()))?;
        Ok(receipt)
    }

    fn leaves(batch: &[EvidenceEntry]) -> Vec<Digest> {
        batch.iter().filter(|e| e.kind() != EvidenceKind::AnchorReceipt).map(EvidenceEntry::entry_hash).collect()
    }

    /// Inclusion proof of entry `index` in the anchored batch that covers it.
    pub fn inclusion_proof(&self, index: usize) -> Option<(MerkleProof, AnchorReceipt)> {
        let receipt = self
            .receipts
            .lock()
            .expect("[FATAL] Mutex poisoned: Failed to acquire lock")
            .iter()
            .find(|r| (r.batch_start..r.batch_end).contains(&index))
            .cloned()?;
        let chain = self.chain.read().expect("[FATAL] RwLock poisoned: Failed to acquire lock");
        let batch = chain.entries().get(receipt.batch_start..receipt.batch_end)?;
        let target = batch.get(index - receipt.batch_start)?;
        if target.kind() == EvidenceKind::AnchorReceipt {
            return None;
        }
        let leaves = Self::leaves(batch);
        let leaf_index = leaves.iter().position(|h| *h == target.entry_hash())?;
        merkle_proof(&leaves, leaf_index).map(|proof| (proof, receipt))
    }

    pub fn receipts(&self) -> Vec<AnchorReceipt> {
        self.receipts.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock").clone()
    }

    /// Index of the first entry not yet covered by an anchored batch.
    pub fn cursor(&self) -> usize { self.cursor.load(Ordering::SeqCst) }
}
