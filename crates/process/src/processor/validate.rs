//! Block validation (`process_block`) and metablock finality.

use super::chain::is_hdr_construction_valid;
use super::{RevertGuard, ShardProcessor};
use crate::error::ProcessError;
use crate::traits::{ChainHandler, HaveTimeDuration};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessera_types::{codec, Hash, Header, MetaBlock, MiniBlock, ShardHeader, METACHAIN_SHARD_ID};
use tracing::{debug, info};

impl ShardProcessor {
    /// Validate and apply an incoming block.
    ///
    /// Fails fast on the first violated check. If anything fails after the
    /// account state has been touched, the scoped guard reverts the
    /// journal before returning. The consensus layer treats any error as a
    /// rejected block and retries with a new one.
    pub fn process_block(
        &self,
        chain: &dyn ChainHandler,
        header: &ShardHeader,
        body: &[MiniBlock],
        have_time: HaveTimeDuration<'_>,
    ) -> Result<(), ProcessError> {
        if let Err(err) = self.check_block_validity(chain, header) {
            if matches!(err, ProcessError::BlockHashMismatch) {
                // The parent is unknown locally; fetch it while consensus
                // retries.
                info!(
                    shard = %header.shard,
                    hash = %header.prev_hash,
                    "requesting missing parent header"
                );
                self.request_shard_header(header.shard, header.prev_hash);
            }
            return Err(err);
        }

        debug!(
            round = header.round,
            nonce = header.nonce,
            "started processing block"
        );

        self.check_header_body_correlation(header, body)?;

        let pool_txs = self
            .tx_counter
            .num_pool_txs_dst(self.data_pools.as_ref(), self.self_shard());
        info!(pool_txs, "transactions pending for this shard");

        self.special_addresses.set_shard_consensus_data(
            header.prev_rand_seed,
            header.round,
            header.epoch,
            header.shard,
        )?;

        self.create_block_started();
        self.tx_coordinator.request_block_transactions(body);
        let (requested, requested_final) = self.request_meta_headers(header);

        if have_time().is_zero() {
            return Err(ProcessError::TimeIsOut);
        }

        self.tx_coordinator.is_data_prepared_for_processing(have_time)?;

        if requested > 0 || requested_final > 0 {
            info!(
                requested,
                requested_final, "waiting for missing metablock headers"
            );
            let waited = self.wait_for_meta_headers(have_time());

            let (missing, _) = self.hdrs_for_curr_block.write().take_missing();
            if requested > 0 {
                info!(
                    received = requested - missing,
                    "missing metablock headers arrived"
                );
            }
            waited?;
        }

        if self.accounts.journal_len() != 0 {
            return Err(ProcessError::AccountStateDirty);
        }

        let _sweep = self.sweep_on_exit(header.round);

        self.check_meta_headers_validity_and_finality()?;
        self.verify_cross_shard_miniblocks_dst_me(header)?;

        let mut revert = RevertGuard::arm(self.accounts.as_ref());

        let processed_meta = self.processed_metablocks_from_miniblocks(body);
        self.set_meta_consensus_data(&processed_meta)?;

        self.tx_coordinator
            .process_block_transaction(body, header.round, have_time)?;

        if !self.verify_state_root(header.root_hash) {
            return Err(ProcessError::RootStateMismatch);
        }

        self.tx_coordinator.verify_created_block_transactions(body)?;

        revert.disarm();
        Ok(())
    }

    /// Check that the header's miniblock entries and the body correlate
    /// one-to-one, in order.
    pub(crate) fn check_header_body_correlation(
        &self,
        header: &ShardHeader,
        body: &[MiniBlock],
    ) -> Result<(), ProcessError> {
        if header.mini_block_headers.len() != body.len() {
            return Err(ProcessError::HeaderBodyMismatch);
        }

        for (entry, mini_block) in header.mini_block_headers.iter().zip(body) {
            if entry.hash != codec::hash_of(mini_block)? {
                return Err(ProcessError::HeaderBodyMismatch);
            }
            if entry.tx_count != mini_block.tx_count() {
                return Err(ProcessError::HeaderBodyMismatch);
            }
            if entry.receiver_shard != mini_block.receiver_shard {
                return Err(ProcessError::HeaderBodyMismatch);
            }
            if entry.sender_shard != mini_block.sender_shard {
                return Err(ProcessError::HeaderBodyMismatch);
            }
            if entry.kind != mini_block.kind {
                return Err(ProcessError::HeaderBodyMismatch);
            }
        }
        Ok(())
    }

    /// Validate the consumed metablocks as one construction chain above
    /// the notarized tail, then require K finality witnesses above the
    /// last of them.
    pub(crate) fn check_meta_headers_validity_and_finality(&self) -> Result<(), ProcessError> {
        let mut last = self.notarized.last(METACHAIN_SHARD_ID)?;

        let used = self.hdrs_for_curr_block.read().sorted_headers(true);
        if used.is_empty() {
            return Ok(());
        }

        for (_, meta) in &used {
            let curr = Header::Meta(Arc::clone(meta));
            is_hdr_construction_valid(&curr, &last)?;
            last = curr;
        }

        self.check_meta_hdr_finality(&last)
    }

    /// Require K construction-valid successors of `header` among the
    /// tracked finality witnesses. On shortfall, the next expected header
    /// is requested by nonce.
    pub(crate) fn check_meta_hdr_finality(&self, header: &Header) -> Result<(), ProcessError> {
        let witnesses = self.hdrs_for_curr_block.read().sorted_headers(false);

        let mut last_verified = header.clone();
        let mut verified = 0u32;
        for (_, meta) in &witnesses {
            if verified >= self.config.meta_block_finality {
                break;
            }
            if meta.nonce == last_verified.nonce() + 1 {
                let curr = Header::Meta(Arc::clone(meta));
                if let Err(err) = is_hdr_construction_valid(&curr, &last_verified) {
                    debug!(%err, nonce = meta.nonce, "finality witness rejected");
                    continue;
                }
                last_verified = curr;
                verified += 1;
            }
        }

        if verified < self.config.meta_block_finality {
            self.request_meta_header_by_nonce(last_verified.nonce() + 1);
            return Err(ProcessError::HeaderNotFinal);
        }
        Ok(())
    }

    /// K-finality over a sorted candidate list, used while selecting
    /// metablocks during assembly. Successors are taken from
    /// `sorted[start..]`.
    pub(crate) fn is_meta_header_final(
        &self,
        header: &Header,
        sorted: &[(Hash, Arc<MetaBlock>)],
        start: usize,
    ) -> bool {
        let mut last_verified = header.clone();
        let mut verified = 0u32;

        for (_, meta) in sorted.iter().skip(start) {
            if verified >= self.config.meta_block_finality {
                break;
            }
            if meta.nonce == last_verified.nonce() + 1 {
                let curr = Header::Meta(Arc::clone(meta));
                if is_hdr_construction_valid(&curr, &last_verified).is_err() {
                    continue;
                }
                last_verified = curr;
                verified += 1;
            }
        }

        verified >= self.config.meta_block_finality
    }

    /// Check that every cross-shard miniblock destined to this shard is
    /// confirmed by a tracked metablock inside the notarization window.
    pub(crate) fn verify_cross_shard_miniblocks_dst_me(
        &self,
        header: &ShardHeader,
    ) -> Result<(), ProcessError> {
        let confirmed = self.all_miniblocks_dst_me_from_meta(header.round)?;

        for mini_block_hash in header.cross_miniblocks_dst(self.self_shard()).keys() {
            if !confirmed.contains_key(mini_block_hash) {
                return Err(ProcessError::CrossShardMbWithoutConfirmation);
            }
        }
        Ok(())
    }

    /// Miniblock hashes destined to this shard confirmed by consumed
    /// metablocks with round in (last notarized, `round`] and nonce above
    /// the last notarized one. Values are the confirming metablock hash.
    pub(crate) fn all_miniblocks_dst_me_from_meta(
        &self,
        round: u64,
    ) -> Result<HashMap<Hash, Hash>, ProcessError> {
        let last = self.notarized.last(METACHAIN_SHARD_ID)?;

        let mut confirmed = HashMap::new();
        let tracker = self.hdrs_for_curr_block.read();
        for (meta_hash, meta) in tracker.sorted_headers(true) {
            if meta.round > round {
                continue;
            }
            if meta.round <= last.round() || meta.nonce <= last.nonce() {
                continue;
            }
            for mini_block_hash in meta.cross_miniblocks_dst(self.self_shard()).keys() {
                confirmed.insert(*mini_block_hash, meta_hash);
            }
        }
        Ok(confirmed)
    }

    /// Consumed metablocks whose cross-shard miniblocks are all processed
    /// once the given body is applied. Ascending by nonce.
    pub(crate) fn processed_metablocks_from_miniblocks(
        &self,
        body: &[MiniBlock],
    ) -> Vec<(Hash, Arc<MetaBlock>)> {
        let self_shard = self.self_shard();
        let mut mini_block_hashes = Vec::with_capacity(body.len());
        for mini_block in body {
            if mini_block.sender_shard == self_shard {
                continue;
            }
            match codec::hash_of(mini_block) {
                Ok(hash) => mini_block_hashes.push(hash),
                Err(err) => debug!(%err, "skipping unhashable miniblock"),
            }
        }

        debug!(cross = mini_block_hashes.len(), "cross miniblocks in body");
        self.processed_metablocks_from_hashes(&mini_block_hashes).0
    }

    /// Core of the fully-processed computation: walk every consumed
    /// metablock and decide, per cross-shard miniblock, whether it is
    /// processed: either recorded in the ledger from a prior commit or
    /// part of the given hash set.
    pub(crate) fn processed_metablocks_from_hashes(
        &self,
        mini_block_hashes: &[Hash],
    ) -> (Vec<(Hash, Arc<MetaBlock>)>, HashMap<Hash, bool>) {
        let self_shard = self.self_shard();
        let mut remaining: HashSet<Hash> = mini_block_hashes.iter().copied().collect();
        let mut processed_meta = Vec::new();
        let mut processed_cross: HashMap<Hash, bool> = HashMap::new();

        let tracker = self.hdrs_for_curr_block.read();
        for (meta_hash, meta) in tracker.sorted_headers(true) {
            let cross = meta.cross_miniblocks_dst(self_shard);

            for hash in cross.keys() {
                let in_body = remaining.remove(hash);
                let already = self.processed_mini_blocks.is_processed(&meta_hash, hash);
                processed_cross.insert(*hash, in_body || already);
            }

            debug!(
                nonce = meta.nonce,
                cross = cross.len(),
                "cross miniblocks in consumed metablock"
            );

            let processed_all = cross.keys().all(|hash| processed_cross[hash]);
            if processed_all {
                processed_meta.push((meta_hash, meta));
            }
        }
        drop(tracker);

        processed_meta.sort_by_key(|(_, meta)| meta.nonce);
        (processed_meta, processed_cross)
    }

    /// Publish consensus data of every finalized metablock for reward
    /// addressing.
    pub(crate) fn set_meta_consensus_data(
        &self,
        finalized: &[(Hash, Arc<MetaBlock>)],
    ) -> Result<(), ProcessError> {
        self.special_addresses.clear_meta_consensus_data();

        for (_, meta) in finalized {
            self.special_addresses
                .set_meta_consensus_data(meta.prev_rand_seed, meta.round, meta.epoch)?;
        }
        Ok(())
    }
}
