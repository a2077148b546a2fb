//! The shard block processor.
//!
//! One [`ShardProcessor`] instance drives every build, validate, commit,
//! and restore cycle of the local shard. It exclusively owns the per-cycle
//! header tracker, the processed-miniblocks ledger, the notarized-headers
//! slices, and the completion signal; everything else is reached through
//! the capability traits in [`crate::traits`].

mod assemble;
mod chain;
mod commit;
mod restore;
mod validate;

pub use assemble::{decode_block_body, decode_block_header};

use crate::config::ProcessConfig;
use crate::error::ProcessError;
use crate::notarized::NotarizedHeaders;
use crate::processed::ProcessedMiniBlocks;
use crate::throttle::BlockSizeThrottle;
use crate::tracking::{CompletionSignal, HeaderTracker};
use crate::traits::{
    AccountsAdapter, AppStatusHandler, DataPools, ForkDetector, PoolsCleaner, RequestHandler,
    ShardCoordinator, SpecialAddressHandler, Store, TransactionCoordinator,
};
use crate::tx_counter::TransactionCounter;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tessera_types::{Hash, Header, MetaBlock, ShardHeader, ShardId, METACHAIN_SHARD_ID};
use tracing::{debug, error, info};

/// Cap on by-nonce header requests fired in one advance sweep.
const MAX_HEADERS_TO_REQUEST_IN_ADVANCE: u64 = 10;

/// Collaborators and configuration for a [`ShardProcessor`].
pub struct ShardProcessorArgs {
    pub accounts: Arc<dyn AccountsAdapter>,
    pub store: Arc<dyn Store>,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub data_pools: Arc<dyn DataPools>,
    pub tx_coordinator: Arc<dyn TransactionCoordinator>,
    pub fork_detector: Arc<dyn ForkDetector>,
    pub request_handler: Arc<dyn RequestHandler>,
    pub special_addresses: Arc<dyn SpecialAddressHandler>,
    pub status_handler: Arc<dyn AppStatusHandler>,
    pub pools_cleaner: Arc<dyn PoolsCleaner>,
    /// Last notarized header per tracked chain; must include the
    /// metachain.
    pub start_headers: HashMap<ShardId, Header>,
    pub config: ProcessConfig,
}

/// The per-shard block state machine.
pub struct ShardProcessor {
    // ═══════════════════════════════════════════════════════════════════
    // Capabilities
    // ═══════════════════════════════════════════════════════════════════
    pub(crate) accounts: Arc<dyn AccountsAdapter>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) shard_coordinator: Arc<dyn ShardCoordinator>,
    pub(crate) data_pools: Arc<dyn DataPools>,
    pub(crate) tx_coordinator: Arc<dyn TransactionCoordinator>,
    pub(crate) fork_detector: Arc<dyn ForkDetector>,
    pub(crate) request_handler: Arc<dyn RequestHandler>,
    pub(crate) special_addresses: Arc<dyn SpecialAddressHandler>,
    pub(crate) status_handler: Arc<dyn AppStatusHandler>,
    pub(crate) pools_cleaner: Arc<dyn PoolsCleaner>,
    pub(crate) config: ProcessConfig,

    // ═══════════════════════════════════════════════════════════════════
    // Owned state
    // ═══════════════════════════════════════════════════════════════════
    /// Per-cycle scratch table of metablock dependencies. The driver and
    /// the pool-notification path share this lock; reads during
    /// validation take the shared variant, resets and assembly take the
    /// exclusive one.
    pub(crate) hdrs_for_curr_block: RwLock<HeaderTracker>,

    /// Raised once per cycle when no tracked metablock is outstanding.
    pub(crate) all_meta_hdrs_received: CompletionSignal,

    /// Cross-shard miniblocks already applied per metablock; survives
    /// cycles, written only by commit and restore.
    pub(crate) processed_mini_blocks: ProcessedMiniBlocks,

    /// Latest notarized header per remote chain.
    pub(crate) notarized: NotarizedHeaders,

    pub(crate) throttle: BlockSizeThrottle,
    pub(crate) tx_counter: TransactionCounter,

    /// Handle to self for detached work; never upgraded on the driver's
    /// hot path.
    self_ref: Weak<ShardProcessor>,
}

impl ShardProcessor {
    /// Build a processor and subscribe it to metablock pool insertions.
    ///
    /// Returns an `Arc` because the pool keeps a weak handle back to the
    /// processor for delivery notifications; the processor itself never
    /// holds the pool's handler alive.
    pub fn new(args: ShardProcessorArgs) -> Result<Arc<Self>, ProcessError> {
        let notarized = NotarizedHeaders::new(args.start_headers)?;
        let max_items = args.config.max_items_in_block;

        let processor = Arc::new_cyclic(|weak| Self {
            accounts: args.accounts,
            store: args.store,
            shard_coordinator: args.shard_coordinator,
            data_pools: args.data_pools,
            tx_coordinator: args.tx_coordinator,
            fork_detector: args.fork_detector,
            request_handler: args.request_handler,
            special_addresses: args.special_addresses,
            status_handler: args.status_handler,
            pools_cleaner: args.pools_cleaner,
            config: args.config,
            hdrs_for_curr_block: RwLock::new(HeaderTracker::new()),
            all_meta_hdrs_received: CompletionSignal::new(),
            processed_mini_blocks: ProcessedMiniBlocks::new(),
            notarized,
            throttle: BlockSizeThrottle::new(max_items),
            tx_counter: TransactionCounter::new(),
            self_ref: weak.clone(),
        });

        let weak = Arc::downgrade(&processor);
        processor
            .data_pools
            .meta_blocks()
            .register_handler(Box::new(move |hash| {
                if let Some(processor) = weak.upgrade() {
                    processor.received_meta_block(hash);
                }
            }));

        Ok(processor)
    }

    /// Identifier of the local shard.
    pub fn self_shard(&self) -> ShardId {
        self.shard_coordinator.self_id()
    }

    /// Cumulative transactions processed across committed blocks.
    pub fn total_txs_processed(&self) -> u64 {
        self.tx_counter.total_processed()
    }

    /// The processed-miniblocks ledger.
    pub fn processed_mini_blocks(&self) -> &ProcessedMiniBlocks {
        &self.processed_mini_blocks
    }

    /// The notarized-headers slices.
    pub fn notarized_headers(&self) -> &NotarizedHeaders {
        &self.notarized
    }

    /// Publish the reward data of the current consensus group.
    pub fn set_consensus_data(&self, randomness: Hash, round: u64, epoch: u32, shard: ShardId) {
        if let Err(err) = self
            .special_addresses
            .set_shard_consensus_data(randomness, round, epoch, shard)
        {
            error!(%err, "failed to set shard consensus data");
        }
    }

    /// Reset all per-cycle state.
    ///
    /// Clears the header tracker, drains a stale completion signal, and
    /// resets the transaction coordinator's per-block state.
    pub fn create_block_started(&self) {
        self.tx_coordinator.create_block_started();
        self.hdrs_for_curr_block.write().reset();
        self.all_meta_hdrs_received.drain();
    }

    /// Pool-notification entry point: a metablock landed in the pool.
    ///
    /// Fills an outstanding tracker entry if one matches, triggers the
    /// final-witness request pass when the last consumed header arrives,
    /// and raises the completion signal on the transition to "nothing
    /// outstanding". Errors are swallowed; delivery is best-effort.
    pub fn received_meta_block(&self, meta_block_hash: Hash) {
        let pool = self.data_pools.meta_blocks();
        let Some(meta) = pool.peek(&meta_block_hash) else {
            return;
        };

        debug!(hash = %meta_block_hash, nonce = meta.nonce, "received metablock");

        let mut all_received = false;
        {
            let mut tracker = self.hdrs_for_curr_block.write();
            if tracker.missing() > 0 || tracker.missing_final() > 0 {
                tracker.deliver(&meta_block_hash, Arc::clone(&meta));

                if tracker.missing() == 0 {
                    let previously_outstanding = tracker.missing_final();
                    let outstanding = self.request_final_missing_headers(&mut tracker);
                    tracker.set_missing_final(outstanding);
                    if outstanding == 0 {
                        info!(
                            received = previously_outstanding,
                            "all final metablock witnesses present"
                        );
                    } else {
                        info!(requested = outstanding, "requested missing final metablock witnesses");
                    }
                }

                all_received = tracker.missing() == 0 && tracker.missing_final() == 0;
            }
        }

        if all_received {
            self.all_meta_hdrs_received.raise();
        }

        // A metablock above the notarized tail may confirm miniblocks for
        // this shard; fetch them ahead of the next build cycle.
        let Ok(last) = self.notarized.last(METACHAIN_SHARD_ID) else {
            return;
        };
        if meta.nonce <= last.nonce() || meta.round <= last.round() {
            return;
        }
        self.tx_coordinator.request_mini_blocks(&meta);
    }

    /// Track the metablocks an incoming header depends on, requesting the
    /// missing ones. Returns (missing consumed, missing final witnesses).
    pub(crate) fn request_meta_headers(&self, header: &ShardHeader) -> (u32, u32) {
        self.all_meta_hdrs_received.drain();

        if header.meta_block_hashes.is_empty() {
            return (0, 0);
        }

        let pool = self.data_pools.meta_blocks();
        let mut tracker = self.hdrs_for_curr_block.write();

        for hash in &header.meta_block_hashes {
            match pool.get(hash) {
                Some(meta) => tracker.mark_used(*hash, meta),
                None => {
                    tracker.mark_missing(*hash);
                    self.request_meta_header(*hash);
                }
            }
        }

        if tracker.missing() == 0 {
            let outstanding = self.request_final_missing_headers(&mut tracker);
            tracker.set_missing_final(outstanding);
        }

        (tracker.missing(), tracker.missing_final())
    }

    /// Request the K headers above the highest consumed nonce that are
    /// needed as finality witnesses, registering the ones already pooled.
    /// Returns the number of requests fired.
    pub(crate) fn request_final_missing_headers(&self, tracker: &mut HeaderTracker) -> u32 {
        let highest = tracker.highest_used_nonce();
        if highest == 0 {
            return 0;
        }

        let mut requested = 0;
        for nonce in highest + 1..=highest + self.config.meta_block_finality as u64 {
            match self.meta_block_from_pool_by_nonce(nonce) {
                Some((hash, meta)) => tracker.insert_final_candidate(hash, meta),
                None => {
                    requested += 1;
                    self.request_meta_header_by_nonce(nonce);
                }
            }
        }
        requested
    }

    /// Suspend until every tracked metablock arrived or the deadline
    /// passed.
    pub(crate) fn wait_for_meta_headers(&self, wait_time: Duration) -> Result<(), ProcessError> {
        if self.all_meta_hdrs_received.wait(wait_time) {
            Ok(())
        } else {
            Err(ProcessError::TimeIsOut)
        }
    }

    /// Advance sweep: request metablock nonces missing from the pool
    /// above the notarized tail, up to the finality horizon.
    pub(crate) fn check_and_request_missing_meta_headers(&self, round: u64) {
        let Ok(last) = self.notarized.last(METACHAIN_SHARD_ID) else {
            return;
        };
        let ordered = match self.ordered_metablocks(round) {
            Ok(ordered) => ordered,
            Err(err) => {
                debug!(%err, "skipping missing-metablock sweep");
                return;
            }
        };

        let known: HashSet<u64> = ordered.iter().map(|(_, meta)| meta.nonce).collect();
        let highest = ordered
            .last()
            .map(|(_, meta)| meta.nonce)
            .unwrap_or_else(|| last.nonce());

        let mut requested = 0u64;
        for nonce in last.nonce() + 1..=highest + self.config.meta_block_finality as u64 {
            if requested >= MAX_HEADERS_TO_REQUEST_IN_ADVANCE {
                break;
            }
            if !known.contains(&nonce) {
                self.request_meta_header_by_nonce(nonce);
                requested += 1;
            }
        }

        if requested > 0 {
            info!(requested, "requested metablocks missing from the pool");
        }
    }

    /// Metablock pooled under the given nonce, if any.
    fn meta_block_from_pool_by_nonce(&self, nonce: u64) -> Option<(Hash, Arc<MetaBlock>)> {
        let hash = self
            .data_pools
            .headers_nonces()
            .get(nonce, METACHAIN_SHARD_ID)?;
        let meta = self.data_pools.meta_blocks().get(&hash)?;
        Some((hash, meta))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Fire-and-forget requests
    // ═══════════════════════════════════════════════════════════════════

    pub(crate) fn request_meta_header(&self, hash: Hash) {
        let handler = Arc::clone(&self.request_handler);
        thread::spawn(move || handler.request_header(METACHAIN_SHARD_ID, hash));
    }

    pub(crate) fn request_meta_header_by_nonce(&self, nonce: u64) {
        let handler = Arc::clone(&self.request_handler);
        thread::spawn(move || handler.request_header_by_nonce(METACHAIN_SHARD_ID, nonce));
    }

    pub(crate) fn request_shard_header(&self, shard: ShardId, hash: Hash) {
        let handler = Arc::clone(&self.request_handler);
        thread::spawn(move || handler.request_header(shard, hash));
    }

    /// Guard that fires the missing-metablock sweep when the enclosing
    /// cycle ends, however it ends.
    pub(crate) fn sweep_on_exit(&self, round: u64) -> MetaSweepGuard {
        MetaSweepGuard {
            processor: self.self_ref.clone(),
            round,
        }
    }
}

/// Spawns the missing-metablock sweep on drop.
pub(crate) struct MetaSweepGuard {
    processor: Weak<ShardProcessor>,
    round: u64,
}

impl Drop for MetaSweepGuard {
    fn drop(&mut self) {
        let Some(processor) = self.processor.upgrade() else {
            return;
        };
        let round = self.round;
        thread::spawn(move || processor.check_and_request_missing_meta_headers(round));
    }
}

/// Reverts the account state on drop unless the cycle succeeded.
///
/// Armed right before the first state-touching step; the driver disarms it
/// just before returning success.
pub(crate) struct RevertGuard<'a> {
    accounts: &'a dyn AccountsAdapter,
    armed: bool,
}

impl<'a> RevertGuard<'a> {
    pub(crate) fn arm(accounts: &'a dyn AccountsAdapter) -> Self {
        Self {
            accounts,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RevertGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.accounts.revert_to_snapshot(0) {
                error!(%err, "failed to revert account state");
            }
        }
    }
}
