//! Ledger of cross-shard miniblocks already processed per metablock.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tessera_types::Hash;

/// Records, per notarized metablock, the cross-shard miniblocks that have
/// been applied in some committed shard block.
///
/// Entries are written only by the committer and the restorer; the
/// assembler reads the ledger to skip already-processed miniblocks but
/// records nothing until the block commits. An entry is dropped atomically
/// when its metablock is finalized and leaves the pool.
///
/// Reads proceed concurrently; writers are exclusive.
#[derive(Default)]
pub struct ProcessedMiniBlocks {
    inner: RwLock<HashMap<Hash, HashSet<Hash>>>,
}

impl ProcessedMiniBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a miniblock processed under the given metablock.
    pub fn add(&self, meta_hash: Hash, mini_block_hash: Hash) {
        self.inner
            .write()
            .entry(meta_hash)
            .or_default()
            .insert(mini_block_hash);
    }

    /// Unmark a miniblock under every metablock that lists it.
    pub fn remove(&self, mini_block_hash: &Hash) {
        let mut inner = self.inner.write();
        for processed in inner.values_mut() {
            processed.remove(mini_block_hash);
        }
    }

    /// Drop every entry of the given metablock.
    pub fn remove_all(&self, meta_hash: &Hash) {
        self.inner.write().remove(meta_hash);
    }

    /// Processed miniblock hashes of the given metablock.
    pub fn hashes_for(&self, meta_hash: &Hash) -> HashSet<Hash> {
        self.inner
            .read()
            .get(meta_hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a miniblock is recorded under the given metablock.
    pub fn is_processed(&self, meta_hash: &Hash, mini_block_hash: &Hash) -> bool {
        self.inner
            .read()
            .get(meta_hash)
            .is_some_and(|set| set.contains(mini_block_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> Hash {
        Hash::compute(&[seed])
    }

    #[test]
    fn test_add_and_query() {
        let ledger = ProcessedMiniBlocks::new();
        ledger.add(h(1), h(10));
        ledger.add(h(1), h(11));
        ledger.add(h(2), h(10));

        assert!(ledger.is_processed(&h(1), &h(10)));
        assert!(ledger.is_processed(&h(2), &h(10)));
        assert!(!ledger.is_processed(&h(1), &h(12)));
        assert_eq!(ledger.hashes_for(&h(1)).len(), 2);
    }

    #[test]
    fn test_remove_strips_from_all_metablocks() {
        let ledger = ProcessedMiniBlocks::new();
        ledger.add(h(1), h(10));
        ledger.add(h(2), h(10));

        ledger.remove(&h(10));

        assert!(!ledger.is_processed(&h(1), &h(10)));
        assert!(!ledger.is_processed(&h(2), &h(10)));
    }

    #[test]
    fn test_remove_all_drops_the_metablock_entry() {
        let ledger = ProcessedMiniBlocks::new();
        ledger.add(h(1), h(10));
        ledger.add(h(1), h(11));

        ledger.remove_all(&h(1));

        assert!(ledger.hashes_for(&h(1)).is_empty());
    }

    #[test]
    fn test_hashes_for_unknown_metablock_is_empty() {
        let ledger = ProcessedMiniBlocks::new();
        assert!(ledger.hashes_for(&h(9)).is_empty());
    }
}
