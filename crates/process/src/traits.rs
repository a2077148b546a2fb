//! Capability interfaces consumed by the shard block processor.
//!
//! Every collaborator the processor does not own is reached through one of
//! these traits. Implementations are expected to be internally thread-safe;
//! the processor only requires atomicity of the individual operations it
//! invokes.

use crate::error::ProcessError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tessera_types::{Hash, MetaBlock, MiniBlock, MiniBlockType, ShardHeader, ShardId};

/// Remaining time in the current cycle. A zero remainder means the
/// deadline has passed.
pub type HaveTimeDuration<'a> = &'a (dyn Fn() -> Duration + Sync);

/// Whether there is still time left in the current cycle.
pub type HaveTime<'a> = &'a (dyn Fn() -> bool + Sync);

/// Journaled account state.
///
/// Mutated only by the driver thread; `revert_to_snapshot(0)` is the only
/// sanctioned rollback path.
pub trait AccountsAdapter: Send + Sync {
    /// Number of pending, uncommitted journal entries.
    fn journal_len(&self) -> usize;

    /// Commit all pending mutations, returning the new state root.
    fn commit(&self) -> Result<Hash, ProcessError>;

    /// Discard journal entries back to the given snapshot index.
    fn revert_to_snapshot(&self, snapshot: usize) -> Result<(), ProcessError>;

    /// Current state root over committed plus journaled mutations.
    fn root_hash(&self) -> Hash;
}

/// Storage units persisted by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageUnit {
    /// Shard block headers by hash.
    BlockHeader,
    /// Miniblocks by hash.
    MiniBlock,
    /// Metablocks by hash.
    MetaBlock,
    /// Metablock nonce → hash index.
    MetaHdrNonceHash,
    /// Shard header nonce → hash index, per shard.
    ShardHdrNonceHash(ShardId),
}

/// Persistent key-value store partitioned by unit.
pub trait Store: Send + Sync {
    /// Fetch a value; absent keys are an error.
    fn get(&self, unit: StorageUnit, key: &[u8]) -> Result<Vec<u8>, ProcessError>;

    /// Persist a value.
    fn put(&self, unit: StorageUnit, key: &[u8], value: &[u8]) -> Result<(), ProcessError>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&self, unit: StorageUnit, key: &[u8]) -> Result<(), ProcessError>;
}

/// Answers "which shard am I" and how many shards exist.
pub trait ShardCoordinator: Send + Sync {
    /// Identifier of the local shard.
    fn self_id(&self) -> ShardId;

    /// Number of user shards in the network.
    fn number_of_shards(&self) -> u32;
}

/// Cache of pending shard headers, keyed by hash.
pub trait HeadersPool: Send + Sync {
    fn get(&self, hash: &Hash) -> Option<Arc<ShardHeader>>;
    fn put(&self, hash: Hash, header: Arc<ShardHeader>);
    fn remove(&self, hash: &Hash);
}

/// Nonce → hash index over pending headers, per chain.
pub trait HeadersNoncesPool: Send + Sync {
    /// Record the hash for a (nonce, shard) slot.
    fn merge(&self, nonce: u64, shard: ShardId, hash: Hash);

    /// Hash recorded for a (nonce, shard) slot.
    fn get(&self, nonce: u64, shard: ShardId) -> Option<Hash>;

    /// Drop the (nonce, shard) slot.
    fn remove(&self, nonce: u64, shard: ShardId);
}

/// Handler invoked with the hash of each metablock added to the pool.
pub type MetaBlockHandler = Box<dyn Fn(Hash) + Send + Sync>;

/// Cache of pending metablocks, keyed by hash.
pub trait MetaBlockPool: Send + Sync {
    fn get(&self, hash: &Hash) -> Option<Arc<MetaBlock>>;

    /// Read without touching cache bookkeeping.
    fn peek(&self, hash: &Hash) -> Option<Arc<MetaBlock>>;

    fn put(&self, hash: Hash, block: Arc<MetaBlock>);
    fn remove(&self, hash: &Hash);
    fn keys(&self) -> Vec<Hash>;

    /// Register a handler called for every insertion.
    fn register_handler(&self, handler: MetaBlockHandler);
}

/// Cache of pending transactions, sharded by destination.
pub trait TransactionsPool: Send + Sync {
    /// Number of pending transactions destined to the given shard.
    fn num_txs_dst(&self, receiver: ShardId) -> usize;
}

/// The shared data pools.
pub trait DataPools: Send + Sync {
    fn transactions(&self) -> Arc<dyn TransactionsPool>;
    fn headers(&self) -> Arc<dyn HeadersPool>;
    fn headers_nonces(&self) -> Arc<dyn HeadersNoncesPool>;
    fn meta_blocks(&self) -> Arc<dyn MetaBlockPool>;
}

/// Result of driving cross-shard miniblock creation for one metablock.
#[derive(Debug, Clone, Default)]
pub struct CrossMiniBlockResult {
    /// Miniblocks produced, destined to the local shard.
    pub mini_blocks: Vec<MiniBlock>,
    /// Transactions added across the produced miniblocks.
    pub txs_added: u32,
    /// False when a budget forced truncation inside the metablock.
    pub finished: bool,
}

/// Executes transactions and builds miniblocks on behalf of the processor.
pub trait TransactionCoordinator: Send + Sync {
    /// Reset per-block state at the start of a cycle.
    fn create_block_started(&self);

    /// Request the transactions referenced by a body from the network.
    fn request_block_transactions(&self, body: &[MiniBlock]);

    /// Block until all requested transactions have arrived or time is up.
    fn is_data_prepared_for_processing(
        &self,
        have_time: HaveTimeDuration<'_>,
    ) -> Result<(), ProcessError>;

    /// Execute a validated body against the account state.
    fn process_block_transaction(
        &self,
        body: &[MiniBlock],
        round: u64,
        have_time: HaveTimeDuration<'_>,
    ) -> Result<(), ProcessError>;

    /// Build and execute miniblocks out of one metablock's cross-shard
    /// traffic, skipping hashes already processed, within the given
    /// budgets.
    fn create_mbs_and_process_cross_shard_transactions_dst_me(
        &self,
        meta: &MetaBlock,
        processed_mini_block_hashes: &HashSet<Hash>,
        max_tx_space: u32,
        max_mb_space: u32,
        round: u64,
        have_time: HaveTime<'_>,
    ) -> CrossMiniBlockResult;

    /// Build and execute miniblocks from the local transaction pool.
    fn create_mbs_and_process_transactions_from_me(
        &self,
        max_tx_space: u32,
        max_mb_space: u32,
        round: u64,
        have_time: HaveTime<'_>,
    ) -> Vec<MiniBlock>;

    /// Persist the body's transaction data.
    fn save_block_data_to_storage(&self, body: &[MiniBlock]) -> Result<(), ProcessError>;

    /// Reload the body's transaction data from storage into the pools,
    /// returning the number of restored transactions.
    fn restore_block_data_from_storage(&self, body: &[MiniBlock]) -> Result<u32, ProcessError>;

    /// Drop the body's transaction data from the pools.
    fn remove_block_data_from_pool(&self, body: &[MiniBlock]) -> Result<(), ProcessError>;

    /// Transactions of the given kind used by the current block.
    fn get_all_current_used_txs(&self, kind: MiniBlockType) -> HashMap<Hash, Vec<u8>>;

    /// Verify coordinator-level checksums over a created body.
    fn verify_created_block_transactions(&self, body: &[MiniBlock]) -> Result<(), ProcessError>;

    /// Split a body by destination shard and marshal each subset's
    /// transactions for broadcast, keyed by topic.
    fn create_marshalized_data(
        &self,
        body: &[MiniBlock],
    ) -> (HashMap<ShardId, Vec<MiniBlock>>, HashMap<String, Vec<Vec<u8>>>);

    /// Request the miniblocks notarized by a metablock whose destination
    /// is the local shard.
    fn request_mini_blocks(&self, meta: &MetaBlock);
}

/// Processing status reported to the fork detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProcessState {
    /// Fully processed and committed locally.
    Processed,
    /// Received from the network, not yet processed.
    Received,
    /// Proposed by this node.
    Proposed,
}

/// Observes committed headers and tracks the highest final block.
pub trait ForkDetector: Send + Sync {
    fn add_header(
        &self,
        header: &ShardHeader,
        hash: Hash,
        state: BlockProcessState,
        final_headers: &[ShardHeader],
        final_header_hashes: &[Hash],
    ) -> Result<(), ProcessError>;

    fn highest_final_block_nonce(&self) -> u64;
}

/// Fire-and-forget network requests.
///
/// Invoked from detached threads; implementations never call back into the
/// processor synchronously.
pub trait RequestHandler: Send + Sync {
    fn request_header(&self, shard: ShardId, hash: Hash);
    fn request_header_by_nonce(&self, shard: ShardId, nonce: u64);
}

/// Publishes consensus data (randomness, round, epoch) for reward
/// addressing.
pub trait SpecialAddressHandler: Send + Sync {
    fn set_shard_consensus_data(
        &self,
        rand_seed: Hash,
        round: u64,
        epoch: u32,
        shard: ShardId,
    ) -> Result<(), ProcessError>;

    fn set_meta_consensus_data(
        &self,
        rand_seed: Hash,
        round: u64,
        epoch: u32,
    ) -> Result<(), ProcessError>;

    fn clear_meta_consensus_data(&self);
}

/// Thread-safe sink for process-wide status metrics.
pub trait AppStatusHandler: Send + Sync {
    fn set_u64(&self, metric: &str, value: u64);
    fn set_string(&self, metric: &str, value: &str);
}

/// Mutable view of the local chain head.
pub trait ChainHandler: Send + Sync {
    /// Header of the current chain head, if any block was committed.
    fn current_header(&self) -> Option<Arc<ShardHeader>>;

    /// Hash of the current chain head.
    fn current_header_hash(&self) -> Option<Hash>;

    /// Hash of the genesis block, the origin link of nonce-one headers.
    fn genesis_header_hash(&self) -> Hash;

    /// Advance the chain head.
    fn set_current_block(
        &self,
        header: Arc<ShardHeader>,
        hash: Hash,
        body: Vec<MiniBlock>,
    ) -> Result<(), ProcessError>;
}

/// Sweeps stale transactions out of the pools.
pub trait PoolsCleaner: Send + Sync {
    /// Clean for at most `budget`, returning the number of removed
    /// transactions.
    fn clean(&self, budget: Duration) -> Result<usize, ProcessError>;

    /// Total transactions removed so far.
    fn num_removed_txs(&self) -> usize;
}
