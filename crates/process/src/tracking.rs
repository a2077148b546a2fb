//! Per-cycle tracking of the metablocks a block depends on.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_types::{Hash, MetaBlock};

/// State of one tracked metablock.
#[derive(Debug, Clone)]
struct HdrInfo {
    /// Absent while a network request for the header is outstanding.
    header: Option<Arc<MetaBlock>>,
    /// Whether the block being built or validated consumes this header.
    used_in_block: bool,
}

/// The per-cycle scratch table of metablock dependencies.
///
/// Maps metablock hash to header-and-usage, together with counters of
/// outstanding headers. Invariant: `missing` equals the number of entries
/// that are used in the block and still lack their header.
///
/// The table itself is not synchronized; the processor guards it with one
/// reader-writer lock shared between the driver and the pool-notification
/// path.
#[derive(Default)]
pub struct HeaderTracker {
    entries: HashMap<Hash, HdrInfo>,
    missing: u32,
    missing_final: u32,
    highest_used_nonce: u64,
}

impl HeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything for a new cycle.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.missing = 0;
        self.missing_final = 0;
        self.highest_used_nonce = 0;
    }

    /// Track a header that the current block consumes.
    pub fn mark_used(&mut self, hash: Hash, header: Arc<MetaBlock>) {
        if header.nonce > self.highest_used_nonce {
            self.highest_used_nonce = header.nonce;
        }
        self.entries.insert(
            hash,
            HdrInfo {
                header: Some(header),
                used_in_block: true,
            },
        );
    }

    /// Track a consumed header whose contents are still outstanding.
    pub fn mark_missing(&mut self, hash: Hash) {
        self.entries.insert(
            hash,
            HdrInfo {
                header: None,
                used_in_block: true,
            },
        );
        self.missing += 1;
    }

    /// Track a finality witness that the block does not itself consume.
    pub fn insert_final_candidate(&mut self, hash: Hash, header: Arc<MetaBlock>) {
        self.entries.insert(
            hash,
            HdrInfo {
                header: Some(header),
                used_in_block: false,
            },
        );
    }

    /// Fill an outstanding entry from the pool-notification path.
    ///
    /// Returns true when the delivery satisfied an outstanding request.
    pub fn deliver(&mut self, hash: &Hash, header: Arc<MetaBlock>) -> bool {
        match self.entries.get_mut(hash) {
            Some(info) if info.header.is_none() => {
                if header.nonce > self.highest_used_nonce {
                    self.highest_used_nonce = header.nonce;
                }
                info.header = Some(header);
                self.missing -= 1;
                true
            }
            _ => false,
        }
    }

    /// Outstanding consumed headers.
    pub fn missing(&self) -> u32 {
        self.missing
    }

    /// Outstanding finality witnesses.
    pub fn missing_final(&self) -> u32 {
        self.missing_final
    }

    /// Record how many finality witnesses are outstanding.
    pub fn set_missing_final(&mut self, count: u32) {
        self.missing_final = count;
    }

    /// Zero both counters, returning their previous values.
    pub fn take_missing(&mut self) -> (u32, u32) {
        let out = (self.missing, self.missing_final);
        self.missing = 0;
        self.missing_final = 0;
        out
    }

    /// Highest nonce among consumed headers seen so far.
    pub fn highest_used_nonce(&self) -> u64 {
        self.highest_used_nonce
    }

    /// Number of tracked entries, consumed or witness.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the given metablock is tracked.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Tracked headers with the given usage, ascending by nonce.
    ///
    /// Entries whose header is still outstanding are skipped. A contiguous
    /// array is rebuilt per call; the table stays small (at most a few
    /// dozen entries per cycle).
    pub fn sorted_headers(&self, used_in_block: bool) -> Vec<(Hash, Arc<MetaBlock>)> {
        let mut headers: Vec<(Hash, Arc<MetaBlock>)> = self
            .entries
            .iter()
            .filter(|(_, info)| info.used_in_block == used_in_block)
            .filter_map(|(hash, info)| info.header.clone().map(|h| (*hash, h)))
            .collect();
        headers.sort_by_key(|(_, header)| header.nonce);
        headers
    }

    /// Hashes of consumed headers, ascending by nonce.
    pub fn sorted_used_hashes(&self) -> Vec<Hash> {
        self.sorted_headers(true)
            .into_iter()
            .map(|(hash, _)| hash)
            .collect()
    }
}

/// One-shot completion notification.
///
/// A single-slot boolean paired with a condition variable: the deliverer
/// raises it at most once per cycle, the waiter consumes it, and the slot
/// is drained on entry to the next cycle so a late signal from a previous
/// cycle can never satisfy a new wait.
#[derive(Default)]
pub struct CompletionSignal {
    slot: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Raising an already-raised signal is a no-op.
    pub fn raise(&self) {
        let mut raised = self.slot.lock();
        if !*raised {
            *raised = true;
            self.cond.notify_one();
        }
    }

    /// Empty the slot at cycle start.
    pub fn drain(&self) {
        *self.slot.lock() = false;
    }

    /// Wait until the signal is raised or the timeout elapses, consuming
    /// the signal. Returns true when the signal was received.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut raised = self.slot.lock();
        if !*raised {
            self.cond
                .wait_while_for(&mut raised, |raised| !*raised, timeout);
        }
        let received = *raised;
        *raised = false;
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn h(seed: u8) -> Hash {
        Hash::compute(&[seed])
    }

    fn meta(nonce: u64) -> Arc<MetaBlock> {
        Arc::new(MetaBlock {
            nonce,
            ..MetaBlock::default()
        })
    }

    #[test]
    fn test_missing_counter_tracks_outstanding_entries() {
        let mut tracker = HeaderTracker::new();
        tracker.mark_missing(h(1));
        tracker.mark_missing(h(2));
        tracker.mark_used(h(3), meta(12));
        assert_eq!(tracker.missing(), 2);

        assert!(tracker.deliver(&h(1), meta(10)));
        assert_eq!(tracker.missing(), 1);

        // Delivering an unknown or already-filled entry changes nothing.
        assert!(!tracker.deliver(&h(9), meta(99)));
        assert!(!tracker.deliver(&h(3), meta(12)));
        assert_eq!(tracker.missing(), 1);
    }

    #[test]
    fn test_highest_used_nonce_follows_deliveries() {
        let mut tracker = HeaderTracker::new();
        tracker.mark_used(h(1), meta(10));
        assert_eq!(tracker.highest_used_nonce(), 10);

        tracker.mark_missing(h(2));
        tracker.deliver(&h(2), meta(11));
        assert_eq!(tracker.highest_used_nonce(), 11);
    }

    #[test]
    fn test_sorted_headers_splits_by_usage() {
        let mut tracker = HeaderTracker::new();
        tracker.mark_used(h(2), meta(11));
        tracker.mark_used(h(1), meta(10));
        tracker.insert_final_candidate(h(3), meta(12));

        let used = tracker.sorted_headers(true);
        assert_eq!(
            used.iter().map(|(_, m)| m.nonce).collect::<Vec<_>>(),
            vec![10, 11]
        );

        let witnesses = tracker.sorted_headers(false);
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0].1.nonce, 12);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = HeaderTracker::new();
        tracker.mark_missing(h(1));
        tracker.mark_used(h(2), meta(10));
        tracker.set_missing_final(3);

        tracker.reset();

        assert!(tracker.is_empty());
        assert_eq!(tracker.take_missing(), (0, 0));
        assert_eq!(tracker.highest_used_nonce(), 0);
    }

    #[test]
    fn test_signal_wait_consumes() {
        let signal = CompletionSignal::new();
        signal.raise();
        assert!(signal.wait(Duration::from_millis(1)));
        // Consumed: a second wait times out.
        assert!(!signal.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_drain_discards_stale_raise() {
        let signal = CompletionSignal::new();
        signal.raise();
        signal.drain();
        assert!(!signal.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_wakes_cross_thread() {
        let signal = Arc::new(CompletionSignal::new());
        let raiser = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise();
        });
        assert!(signal.wait(Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
