//! Shard block headers.

use crate::{Hash, MiniBlockType, ShardId};
use std::collections::HashMap;

/// Header entry describing one miniblock of the block body.
///
/// The body and these entries must correlate one-to-one, in order, with
/// matching hashes, counts, and shard identifiers.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct MiniBlockHeader {
    /// Content hash of the miniblock.
    pub hash: Hash,
    /// Shard the miniblock originates from.
    pub sender_shard: ShardId,
    /// Shard the miniblock is destined to.
    pub receiver_shard: ShardId,
    /// Number of transactions in the miniblock.
    pub tx_count: u32,
    /// Payload class of the miniblock.
    pub kind: MiniBlockType,
}

/// A shard block header.
#[derive(Debug, Clone, PartialEq, Eq, Default, sbor::prelude::BasicSbor)]
pub struct ShardHeader {
    /// Shard this block belongs to.
    pub shard: ShardId,
    /// Block height, strictly increasing by one.
    pub nonce: u64,
    /// Consensus round the block was proposed in.
    pub round: u64,
    /// Epoch the block belongs to.
    pub epoch: u32,
    /// Hash of the previous shard block.
    pub prev_hash: Hash,
    /// Randomness seed of the previous block.
    pub prev_rand_seed: Hash,
    /// Randomness seed produced with this block.
    pub rand_seed: Hash,
    /// Account-state root after applying this block.
    pub root_hash: Hash,
    /// Total transactions across all miniblocks.
    pub tx_count: u32,
    /// One entry per miniblock of the body, in body order.
    pub mini_block_headers: Vec<MiniBlockHeader>,
    /// Metablocks consumed by this block, ascending by referenced nonce.
    pub meta_block_hashes: Vec<Hash>,
}

impl ShardHeader {
    /// Hashes of cross-shard miniblocks destined to `shard`, keyed to
    /// their sender.
    pub fn cross_miniblocks_dst(&self, shard: ShardId) -> HashMap<Hash, ShardId> {
        self.mini_block_headers
            .iter()
            .filter(|mb| mb.receiver_shard == shard && mb.sender_shard != shard)
            .map(|mb| (mb.hash, mb.sender_shard))
            .collect()
    }

    /// Every miniblock hash of the body, keyed to its sender shard.
    pub fn miniblock_shards(&self) -> HashMap<Hash, ShardId> {
        self.mini_block_headers
            .iter()
            .map(|mb| (mb.hash, mb.sender_shard))
            .collect()
    }

    /// Number of header-side items carried by this block.
    pub fn items_in_header(&self) -> u32 {
        (self.mini_block_headers.len() + self.meta_block_hashes.len()) as u32
    }

    /// Number of body-side items carried by this block.
    pub fn items_in_body(&self) -> u32 {
        self.tx_count + self.mini_block_headers.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb_header(hash_seed: &[u8], sender: u32, receiver: u32) -> MiniBlockHeader {
        MiniBlockHeader {
            hash: Hash::compute(hash_seed),
            sender_shard: ShardId(sender),
            receiver_shard: ShardId(receiver),
            tx_count: 2,
            kind: MiniBlockType::Tx,
        }
    }

    #[test]
    fn test_cross_miniblocks_excludes_own_sender() {
        let header = ShardHeader {
            shard: ShardId(0),
            mini_block_headers: vec![
                mb_header(b"cross", 1, 0),
                mb_header(b"own", 0, 0),
                mb_header(b"outbound", 0, 1),
            ],
            ..ShardHeader::default()
        };

        let cross = header.cross_miniblocks_dst(ShardId(0));
        assert_eq!(cross.len(), 1);
        assert_eq!(cross.get(&Hash::compute(b"cross")), Some(&ShardId(1)));
    }

    #[test]
    fn test_item_counters() {
        let header = ShardHeader {
            tx_count: 4,
            mini_block_headers: vec![mb_header(b"a", 1, 0), mb_header(b"b", 0, 0)],
            meta_block_hashes: vec![Hash::compute(b"m")],
            ..ShardHeader::default()
        };
        assert_eq!(header.items_in_header(), 3);
        assert_eq!(header.items_in_body(), 6);
    }
}
