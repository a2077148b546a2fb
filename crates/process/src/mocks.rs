//! In-memory capability implementations for tests.
//!
//! Enabled with the `test-utils` feature. Every collaborator trait has a
//! recording or scripted stand-in here so processor behavior can be
//! asserted without real storage, networking, or execution.

use crate::error::ProcessError;
use crate::traits::{
    AccountsAdapter, AppStatusHandler, BlockProcessState, ChainHandler, CrossMiniBlockResult,
    DataPools, ForkDetector, HaveTime, HaveTimeDuration, HeadersNoncesPool, HeadersPool,
    MetaBlockHandler, MetaBlockPool, PoolsCleaner, RequestHandler, ShardCoordinator,
    SpecialAddressHandler, Store, StorageUnit, TransactionCoordinator, TransactionsPool,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_types::{codec, Hash, MetaBlock, MiniBlock, MiniBlockType, ShardHeader, ShardId};

/// Accounts adapter backed by counters.
#[derive(Default)]
pub struct MockAccounts {
    journal: AtomicUsize,
    root: RwLock<Hash>,
    commits: AtomicUsize,
    reverts: AtomicUsize,
}

impl MockAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_root_hash(&self, root: Hash) {
        *self.root.write() = root;
    }

    pub fn set_journal_len(&self, len: usize) {
        self.journal.store(len, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn reverts(&self) -> usize {
        self.reverts.load(Ordering::SeqCst)
    }
}

impl AccountsAdapter for MockAccounts {
    fn journal_len(&self) -> usize {
        self.journal.load(Ordering::SeqCst)
    }

    fn commit(&self) -> Result<Hash, ProcessError> {
        self.journal.store(0, Ordering::SeqCst);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(*self.root.read())
    }

    fn revert_to_snapshot(&self, _snapshot: usize) -> Result<(), ProcessError> {
        self.journal.store(0, Ordering::SeqCst);
        self.reverts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn root_hash(&self) -> Hash {
        *self.root.read()
    }
}

/// In-memory store partitioned by unit.
#[derive(Default)]
pub struct MemStore {
    units: RwLock<HashMap<StorageUnit, HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, unit: StorageUnit, key: &[u8]) -> bool {
        self.units
            .read()
            .get(&unit)
            .is_some_and(|m| m.contains_key(key))
    }

    pub fn len(&self, unit: StorageUnit) -> usize {
        self.units.read().get(&unit).map_or(0, |m| m.len())
    }

    pub fn is_empty(&self, unit: StorageUnit) -> bool {
        self.len(unit) == 0
    }
}

impl Store for MemStore {
    fn get(&self, unit: StorageUnit, key: &[u8]) -> Result<Vec<u8>, ProcessError> {
        self.units
            .read()
            .get(&unit)
            .and_then(|m| m.get(key))
            .cloned()
            .ok_or_else(|| ProcessError::Storage("key not found".into()))
    }

    fn put(&self, unit: StorageUnit, key: &[u8], value: &[u8]) -> Result<(), ProcessError> {
        self.units
            .write()
            .entry(unit)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, unit: StorageUnit, key: &[u8]) -> Result<(), ProcessError> {
        if let Some(m) = self.units.write().get_mut(&unit) {
            m.remove(key);
        }
        Ok(())
    }
}

/// Fixed shard coordinator.
pub struct MockShardCoordinator {
    self_id: ShardId,
    num_shards: u32,
}

impl MockShardCoordinator {
    pub fn new(self_id: ShardId, num_shards: u32) -> Self {
        Self {
            self_id,
            num_shards,
        }
    }
}

impl ShardCoordinator for MockShardCoordinator {
    fn self_id(&self) -> ShardId {
        self.self_id
    }

    fn number_of_shards(&self) -> u32 {
        self.num_shards
    }
}

/// In-memory shard headers pool.
#[derive(Default)]
pub struct MemHeadersPool {
    headers: RwLock<HashMap<Hash, Arc<ShardHeader>>>,
}

impl HeadersPool for MemHeadersPool {
    fn get(&self, hash: &Hash) -> Option<Arc<ShardHeader>> {
        self.headers.read().get(hash).cloned()
    }

    fn put(&self, hash: Hash, header: Arc<ShardHeader>) {
        self.headers.write().insert(hash, header);
    }

    fn remove(&self, hash: &Hash) {
        self.headers.write().remove(hash);
    }
}

/// In-memory nonce → hash index.
#[derive(Default)]
pub struct MemHeadersNoncesPool {
    slots: RwLock<HashMap<(u64, ShardId), Hash>>,
}

impl HeadersNoncesPool for MemHeadersNoncesPool {
    fn merge(&self, nonce: u64, shard: ShardId, hash: Hash) {
        self.slots.write().insert((nonce, shard), hash);
    }

    fn get(&self, nonce: u64, shard: ShardId) -> Option<Hash> {
        self.slots.read().get(&(nonce, shard)).copied()
    }

    fn remove(&self, nonce: u64, shard: ShardId) {
        self.slots.write().remove(&(nonce, shard));
    }
}

/// In-memory metablock pool that notifies registered handlers on every
/// insertion, the way the production cache does.
#[derive(Default)]
pub struct MemMetaBlockPool {
    blocks: RwLock<HashMap<Hash, Arc<MetaBlock>>>,
    handlers: RwLock<Vec<MetaBlockHandler>>,
}

impl MemMetaBlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetaBlockPool for MemMetaBlockPool {
    fn get(&self, hash: &Hash) -> Option<Arc<MetaBlock>> {
        self.blocks.read().get(hash).cloned()
    }

    fn peek(&self, hash: &Hash) -> Option<Arc<MetaBlock>> {
        self.blocks.read().get(hash).cloned()
    }

    fn put(&self, hash: Hash, block: Arc<MetaBlock>) {
        self.blocks.write().insert(hash, block);
        // Notify outside the write lock; handlers read the pool.
        for handler in self.handlers.read().iter() {
            handler(hash);
        }
    }

    fn remove(&self, hash: &Hash) {
        self.blocks.write().remove(hash);
    }

    fn keys(&self) -> Vec<Hash> {
        self.blocks.read().keys().copied().collect()
    }

    fn register_handler(&self, handler: MetaBlockHandler) {
        self.handlers.write().push(handler);
    }
}

/// Transactions pool exposing only the per-destination census.
#[derive(Default)]
pub struct MemTransactionsPool {
    counts: RwLock<HashMap<ShardId, usize>>,
}

impl MemTransactionsPool {
    pub fn set_txs_dst(&self, shard: ShardId, count: usize) {
        self.counts.write().insert(shard, count);
    }
}

impl TransactionsPool for MemTransactionsPool {
    fn num_txs_dst(&self, receiver: ShardId) -> usize {
        self.counts.read().get(&receiver).copied().unwrap_or(0)
    }
}

/// Bundle of the in-memory pools.
pub struct MemDataPools {
    pub transactions: Arc<MemTransactionsPool>,
    pub headers: Arc<MemHeadersPool>,
    pub headers_nonces: Arc<MemHeadersNoncesPool>,
    pub meta_blocks: Arc<MemMetaBlockPool>,
}

impl MemDataPools {
    pub fn new() -> Self {
        Self {
            transactions: Arc::new(MemTransactionsPool::default()),
            headers: Arc::new(MemHeadersPool::default()),
            headers_nonces: Arc::new(MemHeadersNoncesPool::default()),
            meta_blocks: Arc::new(MemMetaBlockPool::new()),
        }
    }

    /// Insert a metablock under its content hash, firing handlers.
    pub fn put_meta_block(&self, meta: &MetaBlock) -> Hash {
        let hash = codec::hash_of(meta).expect("metablock encodes");
        self.meta_blocks.put(hash, Arc::new(meta.clone()));
        self.headers_nonces
            .merge(meta.nonce, tessera_types::METACHAIN_SHARD_ID, hash);
        hash
    }
}

impl Default for MemDataPools {
    fn default() -> Self {
        Self::new()
    }
}

impl DataPools for MemDataPools {
    fn transactions(&self) -> Arc<dyn TransactionsPool> {
        Arc::clone(&self.transactions) as Arc<dyn TransactionsPool>
    }

    fn headers(&self) -> Arc<dyn HeadersPool> {
        Arc::clone(&self.headers) as Arc<dyn HeadersPool>
    }

    fn headers_nonces(&self) -> Arc<dyn HeadersNoncesPool> {
        Arc::clone(&self.headers_nonces) as Arc<dyn HeadersNoncesPool>
    }

    fn meta_blocks(&self) -> Arc<dyn MetaBlockPool> {
        Arc::clone(&self.meta_blocks) as Arc<dyn MetaBlockPool>
    }
}

/// Scripted transaction coordinator.
///
/// Plays the miniblock pool's role through `seed_mini_block`: cross-shard
/// creation returns the seeded miniblocks a metablock confirms, in hash
/// order, honoring the processed set and the budgets the way the real
/// coordinator does.
pub struct MockTransactionCoordinator {
    self_shard: ShardId,
    mini_blocks: RwLock<HashMap<Hash, MiniBlock>>,
    own_shard_mini_blocks: RwLock<Vec<MiniBlock>>,

    create_block_started_calls: AtomicUsize,
    requested_bodies: Mutex<Vec<usize>>,
    requested_meta_nonces: Mutex<Vec<u64>>,
    saved_bodies: Mutex<Vec<Vec<MiniBlock>>>,
    removed_bodies: Mutex<Vec<Vec<MiniBlock>>>,
    restored_bodies: Mutex<Vec<Vec<MiniBlock>>>,
    processed_bodies: Mutex<Vec<Vec<MiniBlock>>>,

    fail_is_data_prepared: AtomicBool,
    fail_process_block: AtomicBool,
    fail_verify: AtomicBool,
}

impl MockTransactionCoordinator {
    pub fn new(self_shard: ShardId) -> Self {
        Self {
            self_shard,
            mini_blocks: RwLock::new(HashMap::new()),
            own_shard_mini_blocks: RwLock::new(Vec::new()),
            create_block_started_calls: AtomicUsize::new(0),
            requested_bodies: Mutex::new(Vec::new()),
            requested_meta_nonces: Mutex::new(Vec::new()),
            saved_bodies: Mutex::new(Vec::new()),
            removed_bodies: Mutex::new(Vec::new()),
            restored_bodies: Mutex::new(Vec::new()),
            processed_bodies: Mutex::new(Vec::new()),
            fail_is_data_prepared: AtomicBool::new(false),
            fail_process_block: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
        }
    }

    /// Make a miniblock available for cross-shard creation.
    pub fn seed_mini_block(&self, mini_block: MiniBlock) -> Hash {
        let hash = codec::hash_of(&mini_block).expect("miniblock encodes");
        self.mini_blocks.write().insert(hash, mini_block);
        hash
    }

    /// Miniblocks returned by own-shard creation.
    pub fn set_own_shard_mini_blocks(&self, mini_blocks: Vec<MiniBlock>) {
        *self.own_shard_mini_blocks.write() = mini_blocks;
    }

    pub fn fail_is_data_prepared(&self) {
        self.fail_is_data_prepared.store(true, Ordering::SeqCst);
    }

    pub fn fail_process_block(&self) {
        self.fail_process_block.store(true, Ordering::SeqCst);
    }

    pub fn fail_verify(&self) {
        self.fail_verify.store(true, Ordering::SeqCst);
    }

    pub fn create_block_started_calls(&self) -> usize {
        self.create_block_started_calls.load(Ordering::SeqCst)
    }

    pub fn saved_bodies(&self) -> Vec<Vec<MiniBlock>> {
        self.saved_bodies.lock().clone()
    }

    pub fn removed_bodies(&self) -> Vec<Vec<MiniBlock>> {
        self.removed_bodies.lock().clone()
    }

    pub fn restored_bodies(&self) -> Vec<Vec<MiniBlock>> {
        self.restored_bodies.lock().clone()
    }

    pub fn processed_bodies(&self) -> Vec<Vec<MiniBlock>> {
        self.processed_bodies.lock().clone()
    }

    pub fn requested_meta_nonces(&self) -> Vec<u64> {
        self.requested_meta_nonces.lock().clone()
    }
}

impl TransactionCoordinator for MockTransactionCoordinator {
    fn create_block_started(&self) {
        self.create_block_started_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn request_block_transactions(&self, body: &[MiniBlock]) {
        self.requested_bodies.lock().push(body.len());
    }

    fn is_data_prepared_for_processing(
        &self,
        _have_time: HaveTimeDuration<'_>,
    ) -> Result<(), ProcessError> {
        if self.fail_is_data_prepared.load(Ordering::SeqCst) {
            return Err(ProcessError::MissingTransaction);
        }
        Ok(())
    }

    fn process_block_transaction(
        &self,
        body: &[MiniBlock],
        _round: u64,
        _have_time: HaveTimeDuration<'_>,
    ) -> Result<(), ProcessError> {
        if self.fail_process_block.load(Ordering::SeqCst) {
            return Err(ProcessError::Coordinator("scripted failure".into()));
        }
        self.processed_bodies.lock().push(body.to_vec());
        Ok(())
    }

    fn create_mbs_and_process_cross_shard_transactions_dst_me(
        &self,
        meta: &MetaBlock,
        processed_mini_block_hashes: &HashSet<Hash>,
        max_tx_space: u32,
        max_mb_space: u32,
        _round: u64,
        have_time: HaveTime<'_>,
    ) -> CrossMiniBlockResult {
        let mut result = CrossMiniBlockResult {
            finished: true,
            ..CrossMiniBlockResult::default()
        };

        let confirmed = meta.cross_miniblocks_dst(self.self_shard);
        let mut hashes: Vec<Hash> = confirmed.keys().copied().collect();
        hashes.sort();

        let seeded = self.mini_blocks.read();
        for hash in hashes {
            if processed_mini_block_hashes.contains(&hash) {
                continue;
            }
            if !have_time() {
                result.finished = false;
                break;
            }
            let Some(mini_block) = seeded.get(&hash) else {
                result.finished = false;
                continue;
            };
            if result.mini_blocks.len() as u32 >= max_mb_space
                || result.txs_added + mini_block.tx_count() > max_tx_space
            {
                result.finished = false;
                break;
            }
            result.txs_added += mini_block.tx_count();
            result.mini_blocks.push(mini_block.clone());
        }

        result
    }

    fn create_mbs_and_process_transactions_from_me(
        &self,
        max_tx_space: u32,
        max_mb_space: u32,
        _round: u64,
        _have_time: HaveTime<'_>,
    ) -> Vec<MiniBlock> {
        let mut out = Vec::new();
        let mut txs = 0u32;
        for mini_block in self.own_shard_mini_blocks.read().iter() {
            if out.len() as u32 >= max_mb_space || txs + mini_block.tx_count() > max_tx_space {
                break;
            }
            txs += mini_block.tx_count();
            out.push(mini_block.clone());
        }
        out
    }

    fn save_block_data_to_storage(&self, body: &[MiniBlock]) -> Result<(), ProcessError> {
        self.saved_bodies.lock().push(body.to_vec());
        Ok(())
    }

    fn restore_block_data_from_storage(&self, body: &[MiniBlock]) -> Result<u32, ProcessError> {
        self.restored_bodies.lock().push(body.to_vec());
        Ok(body.iter().map(|mb| mb.tx_count()).sum())
    }

    fn remove_block_data_from_pool(&self, body: &[MiniBlock]) -> Result<(), ProcessError> {
        self.removed_bodies.lock().push(body.to_vec());
        Ok(())
    }

    fn get_all_current_used_txs(&self, _kind: MiniBlockType) -> HashMap<Hash, Vec<u8>> {
        HashMap::new()
    }

    fn verify_created_block_transactions(&self, _body: &[MiniBlock]) -> Result<(), ProcessError> {
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(ProcessError::Coordinator("scripted checksum failure".into()));
        }
        Ok(())
    }

    fn create_marshalized_data(
        &self,
        body: &[MiniBlock],
    ) -> (HashMap<ShardId, Vec<MiniBlock>>, HashMap<String, Vec<Vec<u8>>>) {
        let mut by_shard: HashMap<ShardId, Vec<MiniBlock>> = HashMap::new();
        for mini_block in body {
            by_shard
                .entry(mini_block.receiver_shard)
                .or_default()
                .push(mini_block.clone());
        }
        (by_shard, HashMap::new())
    }

    fn request_mini_blocks(&self, meta: &MetaBlock) {
        self.requested_meta_nonces.lock().push(meta.nonce);
    }
}

/// Fork detector that records added headers.
#[derive(Default)]
pub struct RecordingForkDetector {
    added: Mutex<Vec<(Hash, BlockProcessState, usize)>>,
    highest_final: AtomicU64,
}

impl RecordingForkDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_highest_final(&self, nonce: u64) {
        self.highest_final.store(nonce, Ordering::SeqCst);
    }

    pub fn added(&self) -> Vec<(Hash, BlockProcessState, usize)> {
        self.added.lock().clone()
    }
}

impl ForkDetector for RecordingForkDetector {
    fn add_header(
        &self,
        _header: &ShardHeader,
        hash: Hash,
        state: BlockProcessState,
        final_headers: &[ShardHeader],
        _final_header_hashes: &[Hash],
    ) -> Result<(), ProcessError> {
        self.added.lock().push((hash, state, final_headers.len()));
        Ok(())
    }

    fn highest_final_block_nonce(&self) -> u64 {
        self.highest_final.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RequestLog {
    by_hash: Vec<(ShardId, Hash)>,
    by_nonce: Vec<(ShardId, u64)>,
}

/// Request handler that records requests and lets tests wait for them;
/// requests arrive from detached threads.
#[derive(Default)]
pub struct RecordingRequestHandler {
    log: Mutex<RequestLog>,
    cond: Condvar,
}

impl RecordingRequestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_hash(&self) -> Vec<(ShardId, Hash)> {
        self.log.lock().by_hash.clone()
    }

    pub fn by_nonce(&self) -> Vec<(ShardId, u64)> {
        self.log.lock().by_nonce.clone()
    }

    /// Wait until a by-nonce request for `nonce` lands.
    pub fn wait_for_nonce_request(&self, nonce: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut log = self.log.lock();
        loop {
            if log.by_nonce.iter().any(|(_, n)| *n == nonce) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.cond.wait_for(&mut log, remaining);
        }
    }

    /// Wait until a by-hash request for `hash` lands.
    pub fn wait_for_hash_request(&self, hash: Hash, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut log = self.log.lock();
        loop {
            if log.by_hash.iter().any(|(_, h)| *h == hash) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.cond.wait_for(&mut log, remaining);
        }
    }
}

impl RequestHandler for RecordingRequestHandler {
    fn request_header(&self, shard: ShardId, hash: Hash) {
        self.log.lock().by_hash.push((shard, hash));
        self.cond.notify_all();
    }

    fn request_header_by_nonce(&self, shard: ShardId, nonce: u64) {
        self.log.lock().by_nonce.push((shard, nonce));
        self.cond.notify_all();
    }
}

/// Special-address handler recording published consensus data.
#[derive(Default)]
pub struct MockSpecialAddresses {
    shard_data: Mutex<Vec<(Hash, u64, u32, ShardId)>>,
    meta_data: Mutex<Vec<(Hash, u64, u32)>>,
    clears: AtomicUsize,
}

impl MockSpecialAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shard_data(&self) -> Vec<(Hash, u64, u32, ShardId)> {
        self.shard_data.lock().clone()
    }

    pub fn meta_data(&self) -> Vec<(Hash, u64, u32)> {
        self.meta_data.lock().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl SpecialAddressHandler for MockSpecialAddresses {
    fn set_shard_consensus_data(
        &self,
        rand_seed: Hash,
        round: u64,
        epoch: u32,
        shard: ShardId,
    ) -> Result<(), ProcessError> {
        self.shard_data.lock().push((rand_seed, round, epoch, shard));
        Ok(())
    }

    fn set_meta_consensus_data(
        &self,
        rand_seed: Hash,
        round: u64,
        epoch: u32,
    ) -> Result<(), ProcessError> {
        self.meta_data.lock().push((rand_seed, round, epoch));
        Ok(())
    }

    fn clear_meta_consensus_data(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.meta_data.lock().clear();
    }
}

/// Status handler keeping every written metric readable.
#[derive(Default)]
pub struct RecordingStatusHandler {
    u64s: RwLock<HashMap<String, u64>>,
    strings: RwLock<HashMap<String, String>>,
}

impl RecordingStatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u64_value(&self, metric: &str) -> Option<u64> {
        self.u64s.read().get(metric).copied()
    }

    pub fn string_value(&self, metric: &str) -> Option<String> {
        self.strings.read().get(metric).cloned()
    }
}

impl AppStatusHandler for RecordingStatusHandler {
    fn set_u64(&self, metric: &str, value: u64) {
        self.u64s.write().insert(metric.to_string(), value);
    }

    fn set_string(&self, metric: &str, value: &str) {
        self.strings
            .write()
            .insert(metric.to_string(), value.to_string());
    }
}

/// Chain handler over an in-memory head.
pub struct MockChain {
    genesis_hash: Hash,
    current: RwLock<Option<(Arc<ShardHeader>, Hash, Vec<MiniBlock>)>>,
}

impl MockChain {
    pub fn new(genesis_hash: Hash) -> Self {
        Self {
            genesis_hash,
            current: RwLock::new(None),
        }
    }

    pub fn current_nonce(&self) -> Option<u64> {
        self.current.read().as_ref().map(|(h, _, _)| h.nonce)
    }
}

impl ChainHandler for MockChain {
    fn current_header(&self) -> Option<Arc<ShardHeader>> {
        self.current.read().as_ref().map(|(h, _, _)| Arc::clone(h))
    }

    fn current_header_hash(&self) -> Option<Hash> {
        self.current.read().as_ref().map(|(_, hash, _)| *hash)
    }

    fn genesis_header_hash(&self) -> Hash {
        self.genesis_hash
    }

    fn set_current_block(
        &self,
        header: Arc<ShardHeader>,
        hash: Hash,
        body: Vec<MiniBlock>,
    ) -> Result<(), ProcessError> {
        *self.current.write() = Some((header, hash, body));
        Ok(())
    }
}

/// Pools cleaner reporting a fixed sweep result.
#[derive(Default)]
pub struct MockPoolsCleaner {
    removed: AtomicUsize,
}

impl PoolsCleaner for MockPoolsCleaner {
    fn clean(&self, _budget: Duration) -> Result<usize, ProcessError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn num_removed_txs(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}
