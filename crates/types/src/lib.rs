//! Core chain types for the Tessera shard block processor.
//!
//! This crate provides the foundational types shared by the processing
//! layer:
//!
//! - **Primitives**: [`Hash`], [`ShardId`]
//! - **Block data**: [`MiniBlock`], [`ShardHeader`], [`MetaBlock`]
//! - **Codec**: SBOR encoding and content hashing in [`codec`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.
//! Identity of every chain object is the SHA-256 digest of its SBOR
//! encoding, computed through [`codec::hash_of`].

pub mod codec;

mod hash;
mod header;
mod identifiers;
mod metablock;
mod miniblock;

pub use hash::Hash;
pub use header::{MiniBlockHeader, ShardHeader};
pub use identifiers::{ShardId, METACHAIN_SHARD_ID};
pub use metablock::{MetaBlock, ShardInfo, ShardMiniBlockHeader};
pub use miniblock::{MiniBlock, MiniBlockType};

use codec::CodecError;

/// A header of either chain.
///
/// The processor tracks notarized headers for remote shards and for the
/// metachain in the same slice; this tagged variant makes the distinction
/// explicit and exhaustively matched instead of being a run-time cast.
/// Both variants share the chain-link fields used by construction
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// A shard block header.
    Shard(std::sync::Arc<ShardHeader>),
    /// A metachain block header.
    Meta(std::sync::Arc<MetaBlock>),
}

impl Header {
    /// Block height of the header.
    pub fn nonce(&self) -> u64 {
        match self {
            Header::Shard(h) => h.nonce,
            Header::Meta(m) => m.nonce,
        }
    }

    /// Consensus round the header was produced in.
    pub fn round(&self) -> u64 {
        match self {
            Header::Shard(h) => h.round,
            Header::Meta(m) => m.round,
        }
    }

    /// Epoch the header belongs to.
    pub fn epoch(&self) -> u32 {
        match self {
            Header::Shard(h) => h.epoch,
            Header::Meta(m) => m.epoch,
        }
    }

    /// Hash of the predecessor header.
    pub fn prev_hash(&self) -> Hash {
        match self {
            Header::Shard(h) => h.prev_hash,
            Header::Meta(m) => m.prev_hash,
        }
    }

    /// Randomness seed of the predecessor header.
    pub fn prev_rand_seed(&self) -> Hash {
        match self {
            Header::Shard(h) => h.prev_rand_seed,
            Header::Meta(m) => m.prev_rand_seed,
        }
    }

    /// Randomness seed produced with this header.
    pub fn rand_seed(&self) -> Hash {
        match self {
            Header::Shard(h) => h.rand_seed,
            Header::Meta(m) => m.rand_seed,
        }
    }

    /// Shard the header belongs to; the metachain identifier for metablocks.
    pub fn shard(&self) -> ShardId {
        match self {
            Header::Shard(h) => h.shard,
            Header::Meta(_) => METACHAIN_SHARD_ID,
        }
    }

    /// Content hash of the underlying header.
    ///
    /// Hashes the inner value, not the enum wrapper, so the result matches
    /// hashes computed by peers that only ever saw the concrete type.
    pub fn hash(&self) -> Result<Hash, CodecError> {
        match self {
            Header::Shard(h) => codec::hash_of(h.as_ref()),
            Header::Meta(m) => codec::hash_of(m.as_ref()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
