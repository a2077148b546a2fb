//! Block assembly: cross-shard selection and body/header creation.

use super::chain::is_hdr_construction_valid;
use super::ShardProcessor;
use crate::error::ProcessError;
use crate::metrics::{METRIC_NUM_MINI_BLOCKS, METRIC_NUM_TXS_IN_BLOCK};
use crate::traits::HaveTime;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_types::{
    codec, Hash, Header, MetaBlock, MiniBlock, MiniBlockHeader, ShardHeader, ShardId,
    METACHAIN_SHARD_ID,
};
use tracing::{debug, error, info};

impl ShardProcessor {
    /// Assemble a block body out of the transaction pools, cross-shard
    /// traffic first, under the throttle's item budget.
    ///
    /// The accounts journal must be empty: assembly executes transactions
    /// against the state to produce the body.
    pub fn create_block_body(
        &self,
        round: u64,
        have_time: HaveTime<'_>,
    ) -> Result<Vec<MiniBlock>, ProcessError> {
        debug!(round, "started creating block body");
        self.create_block_started();

        let max_items = self.throttle.max_items_to_add();
        self.create_miniblocks(max_items, round, have_time)
    }

    /// Build the header for a created body: one entry per miniblock, the
    /// consumed metablock hashes ascending by nonce, and the post-body
    /// state root.
    ///
    /// Chain-link fields (nonce, previous hash, randomness) are the
    /// consensus layer's to fill.
    pub fn create_block_header(
        &self,
        body: &[MiniBlock],
        round: u64,
    ) -> Result<ShardHeader, ProcessError> {
        debug!(round, "started creating block header");
        let _sweep = self.sweep_on_exit(round);

        let mut total_txs = 0u32;
        let mut entries = Vec::with_capacity(body.len());
        for mini_block in body {
            total_txs += mini_block.tx_count();
            entries.push(MiniBlockHeader {
                hash: codec::hash_of(mini_block)?,
                sender_shard: mini_block.sender_shard,
                receiver_shard: mini_block.receiver_shard,
                tx_count: mini_block.tx_count(),
                kind: mini_block.kind,
            });
        }

        let header = ShardHeader {
            shard: self.self_shard(),
            round,
            root_hash: self.accounts.root_hash(),
            tx_count: total_txs,
            mini_block_headers: entries,
            meta_block_hashes: self.hdrs_for_curr_block.read().sorted_used_hashes(),
            ..ShardHeader::default()
        };

        self.status_handler
            .set_u64(METRIC_NUM_TXS_IN_BLOCK, total_txs as u64);
        self.status_handler
            .set_u64(METRIC_NUM_MINI_BLOCKS, body.len() as u64);

        self.throttle
            .add(round, header.items_in_body().max(header.items_in_header()));

        Ok(header)
    }

    /// Fill a body with cross-shard then own-shard miniblocks.
    pub(crate) fn create_miniblocks(
        &self,
        max_items: u32,
        round: u64,
        have_time: HaveTime<'_>,
    ) -> Result<Vec<MiniBlock>, ProcessError> {
        if self.accounts.journal_len() != 0 {
            return Err(ProcessError::AccountStateDirty);
        }
        if !have_time() {
            info!("time is up right after entering miniblock creation");
            return Err(ProcessError::TimeIsOut);
        }

        let (dest_me, txs_added, hdrs_added) =
            self.create_and_process_cross_miniblocks_dst_me(max_items, round, have_time)?;

        let finalized = self.processed_metablocks_from_miniblocks(&dest_me);
        self.set_meta_consensus_data(&finalized)?;

        info!(
            mini_blocks = dest_me.len(),
            txs = txs_added,
            "processed cross-shard miniblocks destined to this shard"
        );

        let mut body = dest_me;

        let max_tx_space = max_items.saturating_sub(txs_added);
        let max_mb_space =
            self.max_mb_space_remained(max_items, body.len() as u32 + hdrs_added, body.len() as u32);

        if max_tx_space > 0 && max_mb_space > 0 {
            let from_me = self.tx_coordinator.create_mbs_and_process_transactions_from_me(
                max_tx_space,
                max_mb_space as u32,
                round,
                have_time,
            );
            body.extend(from_me);
        }

        info!(mini_blocks = body.len(), "finished creating miniblocks");
        Ok(body)
    }

    /// The cross-shard selector: walk pooled metablocks in nonce order and
    /// have the transaction coordinator turn their confirmed traffic into
    /// miniblocks, under the combined item budget.
    ///
    /// Returns (miniblocks destined to this shard, transactions added,
    /// metablocks consumed).
    pub(crate) fn create_and_process_cross_miniblocks_dst_me(
        &self,
        max_items: u32,
        round: u64,
        have_time: HaveTime<'_>,
    ) -> Result<(Vec<MiniBlock>, u32, u32), ProcessError> {
        let mut mini_blocks: Vec<MiniBlock> = Vec::new();
        let mut txs_added = 0u32;
        let mut hdrs_added = 0u32;

        let ordered = self.ordered_metablocks(round)?;
        info!(count = ordered.len(), "metablocks eligible for this block");

        let mut last_meta = self.notarized.last(METACHAIN_SHARD_ID)?;

        let mut tracker = self.hdrs_for_curr_block.write();
        for (i, (meta_hash, meta)) in ordered.iter().enumerate() {
            if !have_time() {
                info!(txs_added, "time is up while adding cross-shard transactions");
                break;
            }

            if mini_blocks.len() as u32 >= self.config.max_mini_blocks_in_block {
                info!(
                    mini_blocks = mini_blocks.len(),
                    "miniblock ceiling for one block reached"
                );
                break;
            }

            let items_in_header = (tracker.len() + mini_blocks.len()) as u32;
            if items_in_header >= max_items {
                info!(max_items, "header item budget reached");
                break;
            }

            let candidate = Header::Meta(Arc::clone(meta));
            if is_hdr_construction_valid(&candidate, &last_meta).is_err() {
                continue;
            }
            if !self.is_meta_header_final(&candidate, &ordered, i + 1) {
                continue;
            }

            if meta.cross_miniblocks_dst(self.self_shard()).is_empty() {
                // Nothing to execute, but consuming the header advances
                // notarization.
                tracker.mark_used(*meta_hash, Arc::clone(meta));
                hdrs_added += 1;
                last_meta = candidate;
                continue;
            }

            if txs_added >= max_items {
                continue;
            }

            let max_tx_space = max_items - txs_added;
            let max_mb_space =
                self.max_mb_space_remained(max_items, items_in_header + 1, mini_blocks.len() as u32);

            if max_tx_space > 0 && max_mb_space > 0 {
                let already_processed = self.processed_mini_blocks.hashes_for(meta_hash);
                let result = self
                    .tx_coordinator
                    .create_mbs_and_process_cross_shard_transactions_dst_me(
                        meta,
                        &already_processed,
                        max_tx_space,
                        max_mb_space as u32,
                        round,
                        have_time,
                    );

                mini_blocks.extend(result.mini_blocks);
                txs_added += result.txs_added;

                if result.txs_added > 0 {
                    tracker.mark_used(*meta_hash, Arc::clone(meta));
                    hdrs_added += 1;
                }

                if !result.finished {
                    // The coordinator had to truncate inside this
                    // metablock; later ones cannot be consumed either.
                    break;
                }

                last_meta = candidate;
            }
        }
        drop(tracker);

        Ok((mini_blocks, txs_added, hdrs_added))
    }

    /// Pooled metablocks eligible for the given round, ascending by
    /// nonce: at most the current round, strictly above the notarized
    /// tail in both round and nonce.
    pub(crate) fn ordered_metablocks(
        &self,
        round: u64,
    ) -> Result<Vec<(Hash, Arc<MetaBlock>)>, ProcessError> {
        let pool = self.data_pools.meta_blocks();
        let last = self.notarized.last(METACHAIN_SHARD_ID)?;

        let mut ordered: Vec<(Hash, Arc<MetaBlock>)> = Vec::new();
        for key in pool.keys() {
            let Some(meta) = pool.peek(&key) else {
                continue;
            };
            if meta.round > round {
                continue;
            }
            if meta.round <= last.round() || meta.nonce <= last.nonce() {
                continue;
            }
            ordered.push((key, meta));
        }

        ordered.sort_by_key(|(_, meta)| meta.nonce);
        Ok(ordered)
    }

    /// Remaining miniblock slots: whichever is tighter, the combined item
    /// budget or the per-block miniblock ceiling.
    pub(crate) fn max_mb_space_remained(
        &self,
        max_items: u32,
        items_added: u32,
        mini_blocks_added: u32,
    ) -> i64 {
        let space_in_block = max_items as i64 - items_added as i64;
        let space_in_cap = self.config.max_mini_blocks_in_block as i64 - mini_blocks_added as i64;
        space_in_block.min(space_in_cap)
    }

    /// Marshal the body's per-destination subsets for broadcast.
    ///
    /// Returns the encoded subset per destination shard plus the
    /// coordinator's marshalled transactions keyed by topic.
    pub fn marshalized_data_to_broadcast(
        &self,
        body: &[MiniBlock],
    ) -> Result<(HashMap<ShardId, Vec<u8>>, HashMap<String, Vec<Vec<u8>>>), ProcessError> {
        let (bodies, transactions) = self.tx_coordinator.create_marshalized_data(body);

        let mut encoded = HashMap::new();
        for (shard, subset) in bodies {
            match codec::encode(&subset) {
                Ok(bytes) => {
                    encoded.insert(shard, bytes);
                }
                Err(err) => {
                    debug!(%err, %shard, "marshal without success, skipping subset");
                }
            }
        }

        Ok((encoded, transactions))
    }
}

/// Decode a block body from its wire bytes.
pub fn decode_block_body(data: &[u8]) -> Option<Vec<MiniBlock>> {
    match codec::decode(data) {
        Ok(body) => Some(body),
        Err(err) => {
            error!(%err, "failed to decode block body");
            None
        }
    }
}

/// Decode a shard header from its wire bytes.
pub fn decode_block_header(data: &[u8]) -> Option<ShardHeader> {
    match codec::decode(data) {
        Ok(header) => Some(header),
        Err(err) => {
            error!(%err, "failed to decode block header");
            None
        }
    }
}
