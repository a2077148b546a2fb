//! Block-size throttling.

use parking_lot::Mutex;
use std::collections::VecDeque;

const HISTORY_LEN: usize = 100;

#[derive(Debug, Clone)]
struct ThrottleRecord {
    round: u64,
    items: u32,
    succeeded: bool,
}

/// Tracks per-round item counts so block construction can be budgeted.
///
/// The assembler asks for the item ceiling before filling a block, records
/// how many items the created block carried, and the committer marks the
/// round succeeded once the block is durable. Rounds that never succeed
/// stay in the history as evidence of oversized blocks.
pub struct BlockSizeThrottle {
    max_items: u32,
    history: Mutex<VecDeque<ThrottleRecord>>,
}

impl BlockSizeThrottle {
    pub fn new(max_items: u32) -> Self {
        Self {
            max_items,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    /// Item ceiling for the next block.
    pub fn max_items_to_add(&self) -> u32 {
        self.max_items
    }

    /// Record the item count of a created block.
    pub fn add(&self, round: u64, items: u32) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(ThrottleRecord {
            round,
            items,
            succeeded: false,
        });
    }

    /// Mark the most recent record of the given round as succeeded.
    pub fn succeed(&self, round: u64) {
        let mut history = self.history.lock();
        if let Some(record) = history.iter_mut().rev().find(|r| r.round == round) {
            record.succeeded = true;
        }
    }

    /// Items recorded for the most recent record of the given round.
    pub fn items_for_round(&self, round: u64) -> Option<u32> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.round == round)
            .map(|r| r.items)
    }

    /// Whether the most recent record of the given round succeeded.
    pub fn succeeded(&self, round: u64) -> bool {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.round == round)
            .is_some_and(|r| r.succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_succeeds() {
        let throttle = BlockSizeThrottle::new(1000);
        assert_eq!(throttle.max_items_to_add(), 1000);

        throttle.add(5, 42);
        assert_eq!(throttle.items_for_round(5), Some(42));
        assert!(!throttle.succeeded(5));

        throttle.succeed(5);
        assert!(throttle.succeeded(5));
    }

    #[test]
    fn test_succeed_unknown_round_is_noop() {
        let throttle = BlockSizeThrottle::new(1000);
        throttle.succeed(9);
        assert!(!throttle.succeeded(9));
    }

    #[test]
    fn test_history_is_bounded() {
        let throttle = BlockSizeThrottle::new(10);
        for round in 0..(HISTORY_LEN as u64 + 10) {
            throttle.add(round, 1);
        }
        assert_eq!(throttle.items_for_round(0), None);
        assert_eq!(throttle.items_for_round(HISTORY_LEN as u64 + 9), Some(1));
    }
}
