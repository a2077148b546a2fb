//! End-to-end scenarios for the shard block processor.
//!
//! Each test drives the processor through a full cycle against in-memory
//! collaborators: building under budgets, validating with late header
//! delivery, committing, and restoring.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tessera_process::metrics::{
    METRIC_CROSS_CHECK_BLOCK_HEIGHT, METRIC_NUM_MINI_BLOCKS, METRIC_NUM_TXS_IN_BLOCK,
};
use tessera_process::mocks::{
    MemDataPools, MemStore, MockAccounts, MockChain, MockPoolsCleaner, MockShardCoordinator,
    MockSpecialAddresses, MockTransactionCoordinator, RecordingForkDetector,
    RecordingRequestHandler, RecordingStatusHandler,
};
use tessera_process::traits::{
    AccountsAdapter, BlockProcessState, ChainHandler, HeadersNoncesPool, MetaBlockPool,
    StorageUnit,
};
use tessera_process::{ProcessConfig, ProcessError, ShardProcessor, ShardProcessorArgs};
use tessera_types::test_utils::{chain_next, meta_block, test_miniblock, with_notarized_miniblocks};
use tessera_types::{codec, Hash, Header, MetaBlock, MiniBlock, ShardHeader, ShardId,
    METACHAIN_SHARD_ID};

const SELF_SHARD: ShardId = ShardId(0);
const REMOTE_SHARD: ShardId = ShardId(1);

struct Fixture {
    accounts: Arc<MockAccounts>,
    store: Arc<MemStore>,
    pools: Arc<MemDataPools>,
    coordinator: Arc<MockTransactionCoordinator>,
    fork_detector: Arc<RecordingForkDetector>,
    requests: Arc<RecordingRequestHandler>,
    special: Arc<MockSpecialAddresses>,
    status: Arc<RecordingStatusHandler>,
    chain: Arc<MockChain>,
    processor: Arc<ShardProcessor>,
}

impl Fixture {
    /// A processor for shard 0 of a two-shard network, with the given
    /// metablock as the notarized metachain tail.
    fn new(config: ProcessConfig, last_notarized_meta: MetaBlock) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let accounts = Arc::new(MockAccounts::new());
        let store = Arc::new(MemStore::new());
        let pools = Arc::new(MemDataPools::new());
        let coordinator = Arc::new(MockTransactionCoordinator::new(SELF_SHARD));
        let fork_detector = Arc::new(RecordingForkDetector::new());
        let requests = Arc::new(RecordingRequestHandler::new());
        let special = Arc::new(MockSpecialAddresses::new());
        let status = Arc::new(RecordingStatusHandler::new());
        let chain = Arc::new(MockChain::new(Hash::compute(b"genesis")));

        let mut start_headers = HashMap::new();
        start_headers.insert(
            METACHAIN_SHARD_ID,
            Header::Meta(Arc::new(last_notarized_meta)),
        );

        let processor = ShardProcessor::new(ShardProcessorArgs {
            accounts: accounts.clone(),
            store: store.clone(),
            shard_coordinator: Arc::new(MockShardCoordinator::new(SELF_SHARD, 2)),
            data_pools: pools.clone(),
            tx_coordinator: coordinator.clone(),
            fork_detector: fork_detector.clone(),
            request_handler: requests.clone(),
            special_addresses: special.clone(),
            status_handler: status.clone(),
            pools_cleaner: Arc::new(MockPoolsCleaner::default()),
            start_headers,
            config,
        })
        .expect("processor construction");

        Self {
            accounts,
            store,
            pools,
            coordinator,
            fork_detector,
            requests,
            special,
            status,
            chain,
            processor,
        }
    }

    /// An incoming header chained onto the empty chain (nonce one).
    fn incoming_header(&self, round: u64, meta_block_hashes: Vec<Hash>) -> ShardHeader {
        ShardHeader {
            shard: SELF_SHARD,
            nonce: 1,
            round,
            prev_hash: self.chain.genesis_header_hash(),
            root_hash: self.accounts.root_hash(),
            meta_block_hashes,
            ..ShardHeader::default()
        }
    }
}

fn always() -> impl Fn() -> bool + Sync {
    || true
}

fn countdown(budget: Duration) -> impl Fn() -> Duration + Sync {
    let deadline = Instant::now() + budget;
    move || deadline.saturating_duration_since(Instant::now())
}

#[test]
fn happy_build_consumes_both_final_metablocks() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default().with_max_items(1000), m9.clone());

    let mb1 = test_miniblock(REMOTE_SHARD, SELF_SHARD, 2, 1);
    let mb2 = test_miniblock(REMOTE_SHARD, SELF_SHARD, 3, 2);
    let m10 = with_notarized_miniblocks(chain_next(&m9, 10), REMOTE_SHARD, &[mb1.clone()]);
    let m11 = with_notarized_miniblocks(chain_next(&m10, 11), REMOTE_SHARD, &[mb2.clone()]);
    let m12 = chain_next(&m11, 12);

    fixture.coordinator.seed_mini_block(mb1.clone());
    fixture.coordinator.seed_mini_block(mb2.clone());
    let h10 = fixture.pools.put_meta_block(&m10);
    let h11 = fixture.pools.put_meta_block(&m11);
    fixture.pools.put_meta_block(&m12);

    let body = fixture
        .processor
        .create_block_body(12, &always())
        .expect("body creation");

    // Both notarized metablocks contribute; m12 has no successor and is
    // only a finality witness.
    assert_eq!(body, vec![mb1, mb2]);

    let header = fixture
        .processor
        .create_block_header(&body, 12)
        .expect("header creation");
    assert_eq!(header.meta_block_hashes, vec![h10, h11]);
    assert_eq!(header.tx_count, 5);
    assert_eq!(header.mini_block_headers.len(), 2);

    assert_eq!(fixture.status.u64_value(METRIC_NUM_TXS_IN_BLOCK), Some(5));
    assert_eq!(fixture.status.u64_value(METRIC_NUM_MINI_BLOCKS), Some(2));
}

#[test]
fn finality_gap_skips_metablock_and_requests_successor() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9.clone());

    let mb = test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 1);
    let m10 = with_notarized_miniblocks(chain_next(&m9, 10), REMOTE_SHARD, &[mb.clone()]);
    fixture.coordinator.seed_mini_block(mb);
    fixture.pools.put_meta_block(&m10);

    let body = fixture
        .processor
        .create_block_body(10, &always())
        .expect("body creation");
    assert!(body.is_empty(), "metablock without successor must be skipped");

    let header = fixture
        .processor
        .create_block_header(&body, 10)
        .expect("header creation");
    assert!(header.meta_block_hashes.is_empty());

    // The post-assembly sweep asks the metachain for the missing
    // successor nonce.
    assert!(
        fixture
            .requests
            .wait_for_nonce_request(11, Duration::from_secs(2)),
        "expected a by-nonce request for the finality successor"
    );
}

#[test]
fn budget_exhaustion_truncates_inside_metablock() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default().with_max_items(3), m9.clone());

    let mbs: Vec<MiniBlock> = (0..5)
        .map(|i| test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 10 + i))
        .collect();
    let m10 = with_notarized_miniblocks(chain_next(&m9, 10), REMOTE_SHARD, &mbs);
    let m11 = chain_next(&m10, 11);

    for mb in &mbs {
        fixture.coordinator.seed_mini_block(mb.clone());
    }
    let h10 = fixture.pools.put_meta_block(&m10);
    fixture.pools.put_meta_block(&m11);

    let body = fixture
        .processor
        .create_block_body(11, &always())
        .expect("body creation");

    // One header item plus two miniblocks exhausts the three-item budget.
    assert_eq!(body.len(), 2);

    let header = fixture
        .processor
        .create_block_header(&body, 11)
        .expect("header creation");
    // Truncated inside m10, but transactions were added, so it is
    // consumed.
    assert_eq!(header.meta_block_hashes, vec![h10]);
}

#[test]
fn validate_waits_for_missing_metablock_then_succeeds() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9.clone());

    let m10 = chain_next(&m9, 10);
    let m11 = chain_next(&m10, 11);
    let m12 = chain_next(&m11, 12);

    let h10 = fixture.pools.put_meta_block(&m10);
    let h11 = codec::hash_of(&m11).unwrap();
    fixture.pools.put_meta_block(&m12);

    let header = fixture.incoming_header(12, vec![h10, h11]);

    // Deliver the missing metablock while the driver waits.
    let pools = Arc::clone(&fixture.pools);
    let delivery = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        pools.put_meta_block(&m11);
    });

    let result = fixture.processor.process_block(
        fixture.chain.as_ref(),
        &header,
        &[],
        &countdown(Duration::from_secs(2)),
    );
    delivery.join().unwrap();
    result.expect("validation succeeds once the metablock arrives");

    // The outstanding header was requested from the network.
    assert!(fixture
        .requests
        .wait_for_hash_request(h11, Duration::from_secs(2)));

    // Both consumed metablocks published their consensus data.
    assert_eq!(fixture.special.meta_data().len(), 2);
}

#[test]
fn validate_times_out_when_metablock_never_arrives() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9.clone());

    let m10 = chain_next(&m9, 10);
    let m11 = chain_next(&m10, 11);

    let h10 = fixture.pools.put_meta_block(&m10);
    let h11 = codec::hash_of(&m11).unwrap();

    let header = fixture.incoming_header(12, vec![h10, h11]);

    let result = fixture.processor.process_block(
        fixture.chain.as_ref(),
        &header,
        &[],
        &countdown(Duration::from_millis(150)),
    );
    assert!(matches!(result, Err(ProcessError::TimeIsOut)));

    assert!(
        fixture
            .requests
            .wait_for_hash_request(h11, Duration::from_secs(2)),
        "the missing metablock must have been requested"
    );
}

#[test]
fn header_body_mismatch_is_rejected_before_any_state_change() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9);

    // Header claims one miniblock; the body carries another.
    let claimed = test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 1);
    let actual = test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 2);

    let mut header = fixture.incoming_header(5, vec![]);
    header.mini_block_headers =
        tessera_types::test_utils::mini_block_headers_of(&[claimed]);
    header.tx_count = 1;

    let result = fixture.processor.process_block(
        fixture.chain.as_ref(),
        &header,
        &[actual],
        &countdown(Duration::from_secs(1)),
    );
    assert!(matches!(result, Err(ProcessError::HeaderBodyMismatch)));

    // Rejected before state was touched: nothing to revert.
    assert_eq!(fixture.accounts.reverts(), 0);
}

#[test]
fn dirty_account_state_blocks_assembly() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9);

    fixture.accounts.set_journal_len(3);

    let result = fixture.processor.create_block_body(10, &always());
    assert!(matches!(result, Err(ProcessError::AccountStateDirty)));
}

#[test]
fn root_mismatch_reverts_accounts_and_leaves_pools_untouched() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9);

    let mut header = fixture.incoming_header(5, vec![]);
    header.root_hash = Hash::compute(b"not-the-root");

    let pool_len_before = fixture.pools.meta_blocks.len();

    let result = fixture.processor.process_block(
        fixture.chain.as_ref(),
        &header,
        &[],
        &countdown(Duration::from_secs(1)),
    );
    assert!(matches!(result, Err(ProcessError::RootStateMismatch)));

    // The scoped guard rolled the journal back; nothing was committed or
    // removed from the pools.
    assert_eq!(fixture.accounts.reverts(), 1);
    assert_eq!(fixture.accounts.commits(), 0);
    assert_eq!(fixture.pools.meta_blocks.len(), pool_len_before);
    assert!(fixture.coordinator.removed_bodies().is_empty());
}

#[test]
fn commit_then_restore_round_trips_pools_and_ledger() {
    let m9 = meta_block(9, 9);
    let fixture = Fixture::new(ProcessConfig::default(), m9.clone());

    let mb1 = test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 1);
    let mb2 = test_miniblock(REMOTE_SHARD, SELF_SHARD, 1, 2);
    let mb1_hash = codec::hash_of(&mb1).unwrap();
    let mb2_hash = codec::hash_of(&mb2).unwrap();

    let m10 = with_notarized_miniblocks(
        chain_next(&m9, 10),
        REMOTE_SHARD,
        &[mb1.clone(), mb2.clone()],
    );
    let m11 = chain_next(&m10, 11);

    fixture.coordinator.seed_mini_block(mb1);
    fixture.coordinator.seed_mini_block(mb2);
    let h10 = fixture.pools.put_meta_block(&m10);
    fixture.pools.put_meta_block(&m11);

    let body = fixture
        .processor
        .create_block_body(11, &always())
        .expect("body creation");
    assert_eq!(body.len(), 2);

    let mut header = fixture
        .processor
        .create_block_header(&body, 11)
        .expect("header creation");
    header.nonce = 1;
    header.prev_hash = fixture.chain.genesis_header_hash();
    let header_hash = codec::hash_of(&header).unwrap();

    fixture
        .processor
        .commit_block(fixture.chain.as_ref(), &header, &body)
        .expect("commit");

    // Header and miniblocks are durable, the metablock moved from pool to
    // storage, and its ledger entry was dropped on finalization.
    assert!(fixture.store.contains(StorageUnit::BlockHeader, header_hash.as_bytes()));
    assert_eq!(fixture.store.len(StorageUnit::MiniBlock), 2);
    assert!(fixture.pools.meta_blocks.get(&h10).is_none());
    assert!(fixture.store.contains(StorageUnit::MetaBlock, h10.as_bytes()));
    assert!(fixture
        .store
        .contains(StorageUnit::MetaHdrNonceHash, &10u64.to_be_bytes()));
    assert!(fixture.processor.processed_mini_blocks().hashes_for(&h10).is_empty());

    assert_eq!(fixture.accounts.commits(), 1);
    assert_eq!(fixture.chain.current_nonce(), Some(1));
    assert_eq!(fixture.processor.total_txs_processed(), 2);
    assert_eq!(
        fixture
            .processor
            .notarized_headers()
            .last(METACHAIN_SHARD_ID)
            .unwrap()
            .nonce(),
        10
    );
    assert_eq!(
        fixture.status.string_value(METRIC_CROSS_CHECK_BLOCK_HEIGHT).as_deref(),
        Some("meta 10")
    );

    let added = fixture.fork_detector.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].1, BlockProcessState::Processed);

    // Roll the block back.
    fixture
        .processor
        .restore_block_into_pools(&header, &body)
        .expect("restore");

    // The notarized tail is back on m10's predecessor, the metablock is
    // back in pool and nonce index, storage no longer holds it, and the
    // ledger was re-seeded from its notarized miniblocks.
    assert_eq!(
        fixture
            .processor
            .notarized_headers()
            .last(METACHAIN_SHARD_ID)
            .unwrap()
            .nonce(),
        9
    );
    assert!(fixture.pools.meta_blocks.get(&h10).is_some());
    assert_eq!(
        fixture.pools.headers_nonces.get(10, METACHAIN_SHARD_ID),
        Some(h10)
    );
    assert!(!fixture.store.contains(StorageUnit::MetaBlock, h10.as_bytes()));
    assert!(!fixture
        .store
        .contains(StorageUnit::MetaHdrNonceHash, &10u64.to_be_bytes()));
    assert!(fixture
        .processor
        .processed_mini_blocks()
        .is_processed(&h10, &mb1_hash));
    assert!(fixture
        .processor
        .processed_mini_blocks()
        .is_processed(&h10, &mb2_hash));

    assert_eq!(fixture.coordinator.restored_bodies().len(), 1);
    assert_eq!(fixture.processor.total_txs_processed(), 0);
}
