//! Miniblocks: ordered batches of transaction hashes moving between one
//! pair of shards.

use crate::{Hash, ShardId};

/// Payload class of a miniblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sbor::prelude::BasicSbor)]
pub enum MiniBlockType {
    /// Regular value-transfer transactions.
    Tx,
    /// Results produced by smart-contract execution on another shard.
    SmartContractResult,
    /// Protocol reward payouts.
    Rewards,
    /// Validator/peer state changes.
    Peer,
}

/// An ordered batch of transaction hashes with a single
/// (sender shard, receiver shard) pair.
///
/// Identity is the content hash of the SBOR encoding, computed through
/// [`crate::codec::hash_of`].
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct MiniBlock {
    /// Shard the transactions originate from.
    pub sender_shard: ShardId,
    /// Shard the transactions are destined to.
    pub receiver_shard: ShardId,
    /// Payload class.
    pub kind: MiniBlockType,
    /// Ordered transaction hashes.
    pub tx_hashes: Vec<Hash>,
}

impl MiniBlock {
    /// Number of transactions in the batch.
    pub fn tx_count(&self) -> u32 {
        self.tx_hashes.len() as u32
    }

    /// Whether this miniblock crosses into the given shard from elsewhere.
    pub fn is_cross_shard_to(&self, shard: ShardId) -> bool {
        self.receiver_shard == shard && self.sender_shard != shard
    }
}
