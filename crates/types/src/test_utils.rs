//! Test utilities.
//!
//! Builders for chain types used across the workspace's unit and
//! integration tests. Enabled with the `test-utils` feature.

use crate::{
    codec, Hash, MetaBlock, MiniBlock, MiniBlockType, ShardHeader, ShardId, ShardInfo,
    ShardMiniBlockHeader,
};

/// Deterministic hash from a seed byte.
pub fn test_hash(seed: u8) -> Hash {
    Hash::compute(&[seed])
}

/// A miniblock with `n_txs` synthetic transaction hashes.
///
/// `tag` keeps miniblocks with the same shard pair distinguishable.
pub fn test_miniblock(sender: ShardId, receiver: ShardId, n_txs: u32, tag: u8) -> MiniBlock {
    MiniBlock {
        sender_shard: sender,
        receiver_shard: receiver,
        kind: MiniBlockType::Tx,
        tx_hashes: (0..n_txs).map(|i| Hash::compute(&[tag, i as u8])).collect(),
    }
}

/// The notarized form of a miniblock, as a metablock would list it.
pub fn notarized_form(mb: &MiniBlock) -> ShardMiniBlockHeader {
    ShardMiniBlockHeader {
        hash: codec::hash_of(mb).expect("miniblock encodes"),
        sender_shard: mb.sender_shard,
        receiver_shard: mb.receiver_shard,
        tx_count: mb.tx_count(),
    }
}

/// A bare metablock with a unique randomness seed derived from its nonce.
pub fn meta_block(nonce: u64, round: u64) -> MetaBlock {
    MetaBlock {
        nonce,
        round,
        epoch: 0,
        prev_hash: Hash::ZERO,
        prev_rand_seed: Hash::ZERO,
        rand_seed: Hash::compute(&nonce.to_be_bytes()),
        shard_info: Vec::new(),
    }
}

/// A construction-valid successor of `prev` at the given round.
pub fn chain_next(prev: &MetaBlock, round: u64) -> MetaBlock {
    MetaBlock {
        nonce: prev.nonce + 1,
        round,
        epoch: prev.epoch,
        prev_hash: codec::hash_of(prev).expect("metablock encodes"),
        prev_rand_seed: prev.rand_seed,
        rand_seed: Hash::compute(&(prev.nonce + 1).to_be_bytes()),
        shard_info: Vec::new(),
    }
}

/// Attach notarized miniblocks, reported under `reporting_shard`, to a
/// metablock.
pub fn with_notarized_miniblocks(
    mut meta: MetaBlock,
    reporting_shard: ShardId,
    mini_blocks: &[MiniBlock],
) -> MetaBlock {
    let headers: Vec<ShardMiniBlockHeader> = mini_blocks.iter().map(notarized_form).collect();
    let tx_count = headers.iter().map(|h| h.tx_count).sum();
    meta.shard_info.push(ShardInfo {
        shard: reporting_shard,
        header_hash: Hash::compute(&[meta.nonce as u8, reporting_shard.0 as u8]),
        shard_mini_block_headers: headers,
        tx_count,
    });
    meta
}

/// A bare shard header.
pub fn shard_header(shard: ShardId, nonce: u64, round: u64) -> ShardHeader {
    ShardHeader {
        shard,
        nonce,
        round,
        epoch: 0,
        prev_hash: Hash::ZERO,
        prev_rand_seed: Hash::ZERO,
        rand_seed: Hash::compute(&[b's', nonce as u8]),
        root_hash: Hash::ZERO,
        tx_count: 0,
        mini_block_headers: Vec::new(),
        meta_block_hashes: Vec::new(),
    }
}

/// A construction-valid shard header successor.
pub fn shard_chain_next(prev: &ShardHeader, round: u64) -> ShardHeader {
    ShardHeader {
        shard: prev.shard,
        nonce: prev.nonce + 1,
        round,
        epoch: prev.epoch,
        prev_hash: codec::hash_of(prev).expect("shard header encodes"),
        prev_rand_seed: prev.rand_seed,
        rand_seed: Hash::compute(&[b's', (prev.nonce + 1) as u8]),
        root_hash: Hash::ZERO,
        tx_count: 0,
        mini_block_headers: Vec::new(),
        meta_block_hashes: Vec::new(),
    }
}

/// Header entries for a body, in body order.
pub fn mini_block_headers_of(body: &[MiniBlock]) -> Vec<crate::MiniBlockHeader> {
    body.iter()
        .map(|mb| crate::MiniBlockHeader {
            hash: codec::hash_of(mb).expect("miniblock encodes"),
            sender_shard: mb.sender_shard,
            receiver_shard: mb.receiver_shard,
            tx_count: mb.tx_count(),
            kind: mb.kind,
        })
        .collect()
}
