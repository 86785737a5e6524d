use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counters of one bus, updated lock-free from every dispatching thread.
#[derive(Debug, Default)]
pub(crate) struct BusStats {
    pub delivered: AtomicU64,
    pub expired: AtomicU64,
    pub retried: AtomicU64,
    pub rejected: AtomicU64,
    pub out_of_order: AtomicU64,
    pub failed: AtomicU64,
    pub queue_full: AtomicU64,
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    pub delivered: u64,
    pub expired: u64,
    pub retried: u64,
    pub rejected: u64,
    pub out_of_order: u64,
    pub failed: u64,
    pub queue_full: u64,
}

impl BusStats {
    pub fn bump(counter: &AtomicU64) { counter.fetch_add(1, Ordering::Relaxed); }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for BusStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "delivered {}, expired {}, retried {}, rejected {}, out-of-order {}, failed {}, queue-full {}",
            self.delivered, self.expired, self.retried, self.rejected, self.out_of_order, self.failed, self.queue_full
        )
    }
}
