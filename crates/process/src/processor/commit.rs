//! Block commit and finalization.

use super::{RevertGuard, ShardProcessor};
use crate::config::MAX_CLEAN_TIME;
use crate::error::{log_if_error, ProcessError};
use crate::keys::nonce_key;
use crate::metrics::{
    METRIC_CROSS_CHECK_BLOCK_HEIGHT, METRIC_CURRENT_BLOCK_HASH,
    METRIC_HIGHEST_FINAL_BLOCK_IN_SHARD,
};
use crate::traits::{BlockProcessState, ChainHandler, StorageUnit};
use std::sync::Arc;
use std::thread;
use tessera_types::{codec, Hash, Header, MetaBlock, MiniBlock, ShardHeader, METACHAIN_SHARD_ID};
use tracing::{debug, info, warn};

impl ShardProcessor {
    /// Persist a validated block and finalize its effects: store header
    /// and miniblocks, advance the notarized metachain pointer, commit
    /// the account state, prune the pools, inform the fork detector, and
    /// move the chain head.
    ///
    /// Storage-index writes are idempotent and non-critical; everything
    /// else fails the commit, reverting the account journal.
    pub fn commit_block(
        &self,
        chain: &dyn ChainHandler,
        header: &ShardHeader,
        body: &[MiniBlock],
    ) -> Result<(), ProcessError> {
        let mut revert = RevertGuard::arm(self.accounts.as_ref());

        self.check_block_validity(chain, header)?;

        debug!(
            round = header.round,
            nonce = header.nonce,
            "started committing block"
        );

        let header_bytes = codec::encode(header)?;
        let header_hash = Hash::compute(&header_bytes);

        log_if_error(self.store.put(
            StorageUnit::ShardHdrNonceHash(header.shard),
            &nonce_key(header.nonce),
            header_hash.as_bytes(),
        ));
        log_if_error(
            self.store
                .put(StorageUnit::BlockHeader, header_hash.as_bytes(), &header_bytes),
        );

        self.data_pools
            .headers_nonces()
            .merge(header.nonce, header.shard, header_hash);

        self.tx_coordinator.save_block_data_to_storage(body)?;

        for mini_block in body {
            let mini_block_bytes = codec::encode(mini_block)?;
            let mini_block_hash = Hash::compute(&mini_block_bytes);
            log_if_error(self.store.put(
                StorageUnit::MiniBlock,
                mini_block_hash.as_bytes(),
                &mini_block_bytes,
            ));
        }

        let processed_meta = self.processed_metablocks_from_header(header);

        let (final_headers, final_header_hashes) =
            self.highest_own_shard_headers_from_meta(&processed_meta)?;

        let notarized_headers: Vec<Header> = processed_meta
            .iter()
            .map(|(_, meta)| Header::Meta(Arc::clone(meta)))
            .collect();
        self.notarized
            .save_last(METACHAIN_SHARD_ID, &notarized_headers)?;

        let notarized_meta = self.notarized.last(METACHAIN_SHARD_ID)?;
        self.status_handler.set_string(
            METRIC_CROSS_CHECK_BLOCK_HEIGHT,
            &format!("meta {}", notarized_meta.nonce()),
        );

        self.accounts.commit()?;

        info!(
            nonce = header.nonce,
            hash = %header_hash,
            "shard block committed"
        );

        log_if_error(self.tx_coordinator.remove_block_data_from_pool(body));
        log_if_error(self.remove_processed_metablocks_from_pool(&processed_meta));

        // The block is already durable; a fork-detector hiccup must not
        // undo it.
        log_if_error(self.fork_detector.add_header(
            header,
            header_hash,
            BlockProcessState::Processed,
            &final_headers,
            &final_header_hashes,
        ));

        let highest_final = self.fork_detector.highest_final_block_nonce();
        info!(
            highest_final,
            shard = %self.self_shard(),
            "highest final block in shard"
        );

        self.status_handler
            .set_string(METRIC_CURRENT_BLOCK_HASH, &header_hash.to_string());
        self.status_handler
            .set_u64(METRIC_HIGHEST_FINAL_BLOCK_IN_SHARD, highest_final);

        let headers_to_keep = header.nonce.saturating_sub(highest_final) as usize + 1;
        self.notarized
            .trim_behind(METACHAIN_SHARD_ID, headers_to_keep);

        chain.set_current_block(Arc::new(header.clone()), header_hash, body.to_vec())?;

        self.tx_counter.add_processed(header.tx_count as u64);

        self.clean_tx_pools_detached();
        self.throttle.succeed(header.round);

        revert.disarm();
        Ok(())
    }

    /// Compute the fully-processed metablocks for a committed header and
    /// record its cross-shard miniblocks in the ledger.
    ///
    /// This is the only place besides restore that writes the ledger.
    pub(crate) fn processed_metablocks_from_header(
        &self,
        header: &ShardHeader,
    ) -> Vec<(Hash, Arc<MetaBlock>)> {
        let mini_block_hashes: Vec<Hash> = header
            .mini_block_headers
            .iter()
            .map(|entry| entry.hash)
            .collect();

        debug!(
            cross = mini_block_hashes.len(),
            "miniblocks in committed body"
        );

        let (processed_meta, processed_cross) =
            self.processed_metablocks_from_hashes(&mini_block_hashes);

        let self_shard = self.self_shard();
        let tracker = self.hdrs_for_curr_block.read();
        for (meta_hash, meta) in tracker.sorted_headers(true) {
            for mini_block_hash in meta.cross_miniblocks_dst(self_shard).keys() {
                if processed_cross.get(mini_block_hash).copied().unwrap_or(false) {
                    self.processed_mini_blocks.add(meta_hash, *mini_block_hash);
                }
            }
        }

        processed_meta
    }

    /// The highest own-shard headers notarized by the processed
    /// metablocks, with their hashes, ascending by nonce. These are the
    /// final headers handed to the fork detector.
    pub(crate) fn highest_own_shard_headers_from_meta(
        &self,
        processed_meta: &[(Hash, Arc<MetaBlock>)],
    ) -> Result<(Vec<ShardHeader>, Vec<Hash>), ProcessError> {
        let self_shard = self.self_shard();
        let mut own_headers: Vec<ShardHeader> = Vec::new();
        let mut missing = false;

        for (_, meta) in processed_meta {
            for info in &meta.shard_info {
                if info.shard != self_shard {
                    continue;
                }
                match self.shard_header_from_pool_or_storage(&info.header_hash) {
                    Some(header) => own_headers.push(header.as_ref().clone()),
                    None => {
                        info!(
                            hash = %info.header_hash,
                            "requested missing notarized shard header"
                        );
                        self.request_shard_header(info.shard, info.header_hash);
                        missing = true;
                    }
                }
            }
        }

        if missing {
            return Err(ProcessError::MissingHeader);
        }

        if own_headers.is_empty() {
            own_headers.push(ShardHeader::default());
        }
        own_headers.sort_by_key(|header| header.nonce);

        let mut hashes = Vec::with_capacity(own_headers.len());
        for header in &own_headers {
            hashes.push(codec::hash_of(header)?);
        }

        Ok((own_headers, hashes))
    }

    /// Pooled shard header by hash, falling back to storage.
    fn shard_header_from_pool_or_storage(&self, hash: &Hash) -> Option<Arc<ShardHeader>> {
        if let Some(header) = self.data_pools.headers().get(hash) {
            return Some(header);
        }
        let bytes = self.store.get(StorageUnit::BlockHeader, hash.as_bytes()).ok()?;
        match codec::decode::<ShardHeader>(&bytes) {
            Ok(header) => Some(Arc::new(header)),
            Err(err) => {
                warn!(%err, %hash, "undecodable shard header in storage");
                None
            }
        }
    }

    /// Move metablocks at or below the notarized tail from the pool to
    /// storage and drop their ledger entries.
    pub(crate) fn remove_processed_metablocks_from_pool(
        &self,
        processed_meta: &[(Hash, Arc<MetaBlock>)],
    ) -> Result<(), ProcessError> {
        let last_notarized = self.notarized.last(METACHAIN_SHARD_ID)?;

        let mut removed = 0usize;
        for (meta_hash, meta) in processed_meta {
            if meta.nonce > last_notarized.nonce() {
                continue;
            }

            let meta_bytes = match codec::encode(meta.as_ref()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%err, "skipping unencodable metablock");
                    continue;
                }
            };

            if let Err(err) = self.store.put(
                StorageUnit::MetaHdrNonceHash,
                &nonce_key(meta.nonce),
                meta_hash.as_bytes(),
            ) {
                warn!(%err, "failed to index finalized metablock");
                continue;
            }
            if let Err(err) =
                self.store
                    .put(StorageUnit::MetaBlock, meta_hash.as_bytes(), &meta_bytes)
            {
                warn!(%err, "failed to persist finalized metablock");
                continue;
            }

            self.data_pools.meta_blocks().remove(meta_hash);
            self.data_pools
                .headers_nonces()
                .remove(meta.nonce, METACHAIN_SHARD_ID);
            self.processed_mini_blocks.remove_all(meta_hash);

            debug!(
                round = meta.round,
                nonce = meta.nonce,
                hash = %meta_hash,
                "metablock processed completely and removed from pool"
            );
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, "metablocks fully processed and removed from pool");
        }
        Ok(())
    }

    /// Post-commit pool sweep, off the driver thread and under a fixed
    /// time budget.
    fn clean_tx_pools_detached(&self) {
        let cleaner = Arc::clone(&self.pools_cleaner);
        thread::spawn(move || {
            match cleaner.clean(MAX_CLEAN_TIME) {
                Ok(removed) => {
                    info!(
                        removed,
                        total = cleaner.num_removed_txs(),
                        "transaction pools cleaned"
                    );
                }
                Err(err) => warn!(%err, "transaction pool cleaning failed"),
            };
        });
    }
}
