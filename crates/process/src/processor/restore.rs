//! Reverse-direction restoration on chain rollback.

use super::ShardProcessor;
use crate::error::{log_if_error, ProcessError};
use crate::keys::nonce_key;
use crate::traits::StorageUnit;
use std::collections::HashSet;
use std::sync::Arc;
use tessera_types::{codec, Hash, MetaBlock, MiniBlock, ShardHeader, METACHAIN_SHARD_ID};
use tracing::{debug, error};

impl ShardProcessor {
    /// Undo a committed block's pool effects: drop the notarized tail,
    /// hand the body's transactions back to the pools, and move every
    /// referenced metablock from storage back into the pool.
    ///
    /// The account journal is the consensus layer's to roll back; this
    /// restores everything the committer took out of the pools.
    pub fn restore_block_into_pools(
        &self,
        header: &ShardHeader,
        body: &[MiniBlock],
    ) -> Result<(), ProcessError> {
        self.notarized.remove_last(METACHAIN_SHARD_ID);

        let restored_txs = self.tx_coordinator.restore_block_data_from_storage(body)?;
        self.tx_counter.subtract_restored(restored_txs as u64);
        debug!(restored_txs, "restored block transactions into pools");

        self.restore_metablocks_into_pool(header)
    }

    /// Reload each referenced metablock into the pool, re-seed the
    /// processed-miniblocks ledger from it, re-index its nonce, and remove
    /// it from storage; a metablock lives in the pool or in storage,
    /// never both.
    fn restore_metablocks_into_pool(&self, header: &ShardHeader) -> Result<(), ProcessError> {
        let pool = self.data_pools.meta_blocks();
        let nonces_pool = self.data_pools.headers_nonces();
        let mut reseeded: HashSet<Hash> = HashSet::new();

        for meta_hash in &header.meta_block_hashes {
            let Ok(meta_bytes) = self.store.get(StorageUnit::MetaBlock, meta_hash.as_bytes())
            else {
                continue;
            };
            let meta: MetaBlock = match codec::decode(&meta_bytes) {
                Ok(meta) => meta,
                Err(err) => {
                    error!(%err, hash = %meta_hash, "undecodable metablock in storage");
                    continue;
                }
            };

            for mini_block_hash in meta.cross_miniblocks_dst(self.self_shard()).keys() {
                self.processed_mini_blocks.add(*meta_hash, *mini_block_hash);
                reseeded.insert(*mini_block_hash);
            }

            let nonce = meta.nonce;
            pool.put(*meta_hash, Arc::new(meta));
            nonces_pool.merge(nonce, METACHAIN_SHARD_ID, *meta_hash);

            log_if_error(self.store.remove(StorageUnit::MetaBlock, meta_hash.as_bytes()));
            log_if_error(
                self.store
                    .remove(StorageUnit::MetaHdrNonceHash, &nonce_key(nonce)),
            );

            debug!(nonce, hash = %meta_hash, "metablock restored into pool");
        }

        // Strip ledger entries the rolled-back block contributed. Hashes
        // just re-seeded stay: those reflect miniblocks confirmed by the
        // restored metablocks, processed by still-committed blocks.
        for mini_block_hash in header.miniblock_shards().keys() {
            if !reseeded.contains(mini_block_hash) {
                self.processed_mini_blocks.remove(mini_block_hash);
            }
        }

        Ok(())
    }
}
