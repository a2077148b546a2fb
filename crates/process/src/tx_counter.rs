//! Cumulative transaction accounting.

use crate::traits::DataPools;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_types::ShardId;

/// Counts transactions processed across committed blocks.
///
/// The committer adds a block's transaction count after commit; the
/// restorer subtracts what a rolled-back block had contributed.
#[derive(Default)]
pub struct TransactionCounter {
    total_processed: AtomicU64,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transactions of a committed block.
    pub fn add_processed(&self, count: u64) {
        self.total_processed.fetch_add(count, Ordering::Relaxed);
    }

    /// Subtract transactions restored to the pools on rollback.
    pub fn subtract_restored(&self, count: u64) {
        let mut current = self.total_processed.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(count);
            match self.total_processed.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Transactions processed since startup.
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    /// Pending pool transactions destined to the given shard.
    pub fn num_pool_txs_dst(&self, pools: &dyn DataPools, shard: ShardId) -> usize {
        pools.transactions().num_txs_dst(shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_subtract() {
        let counter = TransactionCounter::new();
        counter.add_processed(10);
        counter.add_processed(5);
        assert_eq!(counter.total_processed(), 15);

        counter.subtract_restored(6);
        assert_eq!(counter.total_processed(), 9);
    }

    #[test]
    fn test_subtract_saturates_at_zero() {
        let counter = TransactionCounter::new();
        counter.add_processed(3);
        counter.subtract_restored(10);
        assert_eq!(counter.total_processed(), 0);
    }
}
