use super::digest::{Digest, EvidenceSigner};
use super::evidence_entry::{EvidenceEntry, EvidenceRecord, GENESIS_HASH};
use crate::{error, evid};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("evidence chain broken at entry {at_index}")]
    ChainBroken { at_index: usize },
}

/// Latched alarm raised by a failed chain verification.
///
/// Cloned handles share one flag. Once raised it stays raised until an operator calls
/// [`IntegrityAlarm::reconcile`]; the effector session refuses new engagements meanwhile.
#[derive(Debug, Clone, Default)]
pub struct IntegrityAlarm {
    raised: Arc<AtomicBool>,
    at_index: Arc<AtomicUsize>,
}

impl IntegrityAlarm {
    pub fn new() -> Self { Self::default() }

    pub fn raise(&self, at_index: usize) {
        self.at_index.store(at_index, Ordering::SeqCst);
        if !self.raised.swap(true, Ordering::SeqCst) {
            error!("INTEGRITY ALARM: evidence chain broken at entry {at_index}, engagements halted");
        }
    }

    pub fn is_raised(&self) -> bool { self.raised.load(Ordering::SeqCst) }

    /// Index of the first broken entry, if the alarm is raised.
    pub fn broken_at(&self) -> Option<usize> {
        self.is_raised().then(|| self.at_index.load(Ordering::SeqCst))
    }

    /// Manual acknowledgement after the operator investigated the break.
    pub fn reconcile(&self) {
        if self.raised.swap(false, Ordering::SeqCst) {
            evid!("Integrity alarm reconciled by operator");
        }
    }
}

/// Evidence chain shared between its single writer (the bus) and auditors.
pub type SharedChain = Arc<RwLock<EvidenceChain>>;

/// Append-only, hash-linked and signed log of bus messages.
#[derive(Debug)]
pub struct EvidenceChain {
    entries: Vec<EvidenceEntry>,
    signer: Arc<EvidenceSigner>,
    alarm: IntegrityAlarm,
}

impl EvidenceChain {
    pub fn new(signer: Arc<EvidenceSigner>, alarm: IntegrityAlarm) -> Self {
        Self { entries: Vec::new(), signer, alarm }
    }

    pub fn shared(self) -> SharedChain { Arc::new(RwLock::new(self)) }

    /// Links `record` to the current head, signs it and stores it.
    pub fn append(&mut self, record: EvidenceRecord) -> EvidenceEntry { self.append_at(record, Utc::now()) }

    pub fn append_at(&mut self, record: EvidenceRecord, timestamp: DateTime<Utc>) -> EvidenceEntry {
        let entry = EvidenceEntry::seal(self.entries.len() as u64, timestamp, record, self.head_hash(), &self.signer);
        evid!(
            "#{} {} {} -> {} [{}]",
            entry.index(),
            entry.kind(),
            entry.sender(),
            entry.receiver(),
            entry.entry_hash().short()
        );
        self.entries.push(entry.clone());
        entry
    }

    /// Walks the whole chain recomputing payload hashes, entry hashes, links and
    /// signatures.
    ///
    /// # Errors
    /// - [`IntegrityError::ChainBroken`] at the first entry that does not check out.
    ///   The integrity alarm is raised as a side effect.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let key = self.verifying_key();
        let mut expected_prev = *GENESIS_HASH;
        for (i, entry) in self.entries.iter().enumerate() {
            let linked = entry.index() == i as u64 && entry.previous_hash() == expected_prev;
            if !linked || !entry.is_intact(&key) {
                self.alarm.raise(i);
                return Err(IntegrityError::ChainBroken { at_index: i });
            }
            expected_prev = entry.entry_hash();
        }
        Ok(())
    }

    /// Entries from index `since` to the head.
    pub fn export_batch(&self, since: usize) -> Vec<EvidenceEntry> {
        self.entries.get(since..).map(<[EvidenceEntry]>::to_vec).unwrap_or_default()
    }

    pub fn head_hash(&self) -> Digest { self.entries.last().map_or(*GENESIS_HASH, EvidenceEntry::entry_hash) }

    pub fn entries(&self) -> &[EvidenceEntry] { &self.entries }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn verifying_key(&self) -> VerifyingKey { self.signer.verifying_key() }

    pub fn alarm(&self) -> IntegrityAlarm { self.alarm.clone() }

    #[cfg(test)]
    pub(crate) fn entry_mut_unchecked(&mut self, index: usize) -> Option<&mut EvidenceEntry> {
        self.entries.get_mut(index)
    }
}
