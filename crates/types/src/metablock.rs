//! Metachain block headers.

use crate::{Hash, ShardId};
use std::collections::HashMap;

/// A miniblock as notarized inside a metablock.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct ShardMiniBlockHeader {
    /// Content hash of the miniblock.
    pub hash: Hash,
    /// Shard the miniblock originates from.
    pub sender_shard: ShardId,
    /// Shard the miniblock is destined to.
    pub receiver_shard: ShardId,
    /// Number of transactions in the miniblock.
    pub tx_count: u32,
}

/// Progress of one shard header as recorded by the metachain.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct ShardInfo {
    /// Shard whose header is notarized.
    pub shard: ShardId,
    /// Hash of the notarized shard header.
    pub header_hash: Hash,
    /// Miniblocks carried by that shard header.
    pub shard_mini_block_headers: Vec<ShardMiniBlockHeader>,
    /// Total transactions notarized for the shard header.
    pub tx_count: u32,
}

/// A metachain block header.
///
/// The metachain notarizes shard progress; each metablock lists, per shard,
/// the shard header it notarizes together with that header's miniblocks.
#[derive(Debug, Clone, PartialEq, Eq, Default, sbor::prelude::BasicSbor)]
pub struct MetaBlock {
    /// Block height on the metachain.
    pub nonce: u64,
    /// Consensus round the metablock was produced in.
    pub round: u64,
    /// Epoch the metablock belongs to.
    pub epoch: u32,
    /// Hash of the previous metablock.
    pub prev_hash: Hash,
    /// Randomness seed of the previous metablock.
    pub prev_rand_seed: Hash,
    /// Randomness seed produced with this metablock.
    pub rand_seed: Hash,
    /// One entry per notarized shard header.
    pub shard_info: Vec<ShardInfo>,
}

impl MetaBlock {
    /// Hashes of notarized miniblocks whose destination is `shard`, keyed
    /// to their sender. Miniblocks both sent and received by `shard` are
    /// excluded; they never cross a shard boundary.
    pub fn cross_miniblocks_dst(&self, shard: ShardId) -> HashMap<Hash, ShardId> {
        let mut out = HashMap::new();
        for info in &self.shard_info {
            for mb in &info.shard_mini_block_headers {
                if mb.receiver_shard == shard && mb.sender_shard != shard {
                    out.insert(mb.hash, mb.sender_shard);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_miniblocks_dst_filters_by_receiver() {
        let meta = MetaBlock {
            nonce: 10,
            shard_info: vec![ShardInfo {
                shard: ShardId(1),
                header_hash: Hash::compute(b"hdr"),
                shard_mini_block_headers: vec![
                    ShardMiniBlockHeader {
                        hash: Hash::compute(b"to-zero"),
                        sender_shard: ShardId(1),
                        receiver_shard: ShardId(0),
                        tx_count: 1,
                    },
                    ShardMiniBlockHeader {
                        hash: Hash::compute(b"to-two"),
                        sender_shard: ShardId(1),
                        receiver_shard: ShardId(2),
                        tx_count: 1,
                    },
                ],
                tx_count: 2,
            }],
            ..MetaBlock::default()
        };

        let cross = meta.cross_miniblocks_dst(ShardId(0));
        assert_eq!(cross.len(), 1);
        assert!(cross.contains_key(&Hash::compute(b"to-zero")));
    }

    #[test]
    fn test_cross_miniblocks_dst_excludes_intra_shard() {
        let meta = MetaBlock {
            shard_info: vec![ShardInfo {
                shard: ShardId(0),
                header_hash: Hash::ZERO,
                shard_mini_block_headers: vec![ShardMiniBlockHeader {
                    hash: Hash::compute(b"own"),
                    sender_shard: ShardId(0),
                    receiver_shard: ShardId(0),
                    tx_count: 1,
                }],
                tx_count: 1,
            }],
            ..MetaBlock::default()
        };

        assert!(meta.cross_miniblocks_dst(ShardId(0)).is_empty());
    }
}
