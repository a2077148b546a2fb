//! Errors of the block processing cycle.

use tessera_types::codec::CodecError;
use tessera_types::ShardId;
use thiserror::Error;

/// Errors returned by the shard block processor.
///
/// The driver returns the first error encountered; whether account state
/// is rolled back depends on when the error occurred, not on its variant.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The accounts journal was non-empty at a point where it must be
    /// empty.
    #[error("account state was dirty before starting to change")]
    AccountStateDirty,

    /// The cycle deadline expired.
    #[error("time is out")]
    TimeIsOut,

    /// A metablock lacked the required number of construction-valid
    /// successors.
    #[error("header is not final")]
    HeaderNotFinal,

    /// A cross-shard miniblock destined to this shard is not confirmed by
    /// any tracked metablock.
    #[error("cross shard mini block without confirmation from metachain")]
    CrossShardMbWithoutConfirmation,

    /// The header's miniblock entries do not correlate with the body.
    #[error("header does not match block body")]
    HeaderBodyMismatch,

    /// The account-state root after applying the body differs from the
    /// header's root hash.
    #[error("root state does not match")]
    RootStateMismatch,

    /// A transaction referenced by the body is not available.
    #[error("missing transaction")]
    MissingTransaction,

    /// A referenced header could not be found in pool or storage.
    #[error("missing header")]
    MissingHeader,

    /// A header's previous-hash link does not match.
    #[error("block hash does not match")]
    BlockHashMismatch,

    /// A header's nonce does not continue the chain.
    #[error("wrong nonce in block")]
    WrongNonceInBlock,

    /// A header's round does not advance past its predecessor's.
    #[error("lower round in block")]
    LowerRoundInBlock,

    /// A header's previous randomness seed does not match its
    /// predecessor's seed.
    #[error("rand seed does not match")]
    RandSeedMismatch,

    /// No notarized header is tracked for the given shard.
    #[error("no notarized header tracked for shard {0}")]
    MissingNotarizedHeader(ShardId),

    /// The accounts adapter failed.
    #[error("accounts error: {0}")]
    Accounts(String),

    /// The persistent store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The transaction coordinator failed.
    #[error("transaction coordinator error: {0}")]
    Coordinator(String),

    /// Serialization failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Log a non-critical error and move on.
///
/// Commit-path writes to idempotent storage indexes are allowed to fail
/// without failing the block.
pub(crate) fn log_if_error<T>(result: Result<T, ProcessError>) {
    if let Err(err) = result {
        tracing::warn!(%err, "non-critical operation failed");
    }
}
