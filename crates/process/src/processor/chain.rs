//! Chain-link validation.

use super::ShardProcessor;
use crate::error::ProcessError;
use crate::traits::ChainHandler;
use tessera_types::{codec, Hash, Header, ShardHeader};
use tracing::error;

/// Check that `curr` is a valid construction upon `prev`: consecutive
/// nonce, matching hash and randomness links, and a later round.
pub(crate) fn is_hdr_construction_valid(curr: &Header, prev: &Header) -> Result<(), ProcessError> {
    if curr.nonce() != prev.nonce() + 1 {
        return Err(ProcessError::WrongNonceInBlock);
    }
    if curr.prev_hash() != prev.hash()? {
        return Err(ProcessError::BlockHashMismatch);
    }
    if curr.prev_rand_seed() != prev.rand_seed() {
        return Err(ProcessError::RandSeedMismatch);
    }
    if curr.round() <= prev.round() {
        return Err(ProcessError::LowerRoundInBlock);
    }
    Ok(())
}

impl ShardProcessor {
    /// Check an incoming header against the current chain head.
    pub(crate) fn check_block_validity(
        &self,
        chain: &dyn ChainHandler,
        header: &ShardHeader,
    ) -> Result<(), ProcessError> {
        match chain.current_header() {
            None => {
                // First block after genesis.
                if header.nonce != 1 {
                    return Err(ProcessError::WrongNonceInBlock);
                }
                if header.prev_hash != chain.genesis_header_hash() {
                    return Err(ProcessError::BlockHashMismatch);
                }
            }
            Some(current) => {
                if header.nonce != current.nonce + 1 {
                    return Err(ProcessError::WrongNonceInBlock);
                }
                let current_hash = match chain.current_header_hash() {
                    Some(hash) => hash,
                    None => codec::hash_of(current.as_ref())?,
                };
                if header.prev_hash != current_hash {
                    return Err(ProcessError::BlockHashMismatch);
                }
                if header.prev_rand_seed != current.rand_seed {
                    return Err(ProcessError::RandSeedMismatch);
                }
                if header.round <= current.round {
                    return Err(ProcessError::LowerRoundInBlock);
                }
            }
        }
        Ok(())
    }

    /// Whether the account-state root matches the header's claim.
    pub(crate) fn verify_state_root(&self, root_hash: Hash) -> bool {
        self.accounts.root_hash() == root_hash
    }

    /// Roll the account journal back to its last committed state.
    ///
    /// The only sanctioned rollback path; the consensus layer calls this
    /// when it abandons a cycle it drove itself.
    pub fn revert_account_state(&self) {
        if let Err(err) = self.accounts.revert_to_snapshot(0) {
            error!(%err, "failed to revert account state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_types::test_utils::{chain_next, meta_block};

    fn header_of(meta: tessera_types::MetaBlock) -> Header {
        Header::Meta(Arc::new(meta))
    }

    #[test]
    fn test_valid_chain_link_passes() {
        let prev = meta_block(10, 10);
        let curr = chain_next(&prev, 11);
        assert!(is_hdr_construction_valid(&header_of(curr), &header_of(prev)).is_ok());
    }

    #[test]
    fn test_nonce_gap_rejected() {
        let prev = meta_block(10, 10);
        let mut curr = chain_next(&prev, 11);
        curr.nonce = 12;
        assert!(matches!(
            is_hdr_construction_valid(&header_of(curr), &header_of(prev)),
            Err(ProcessError::WrongNonceInBlock)
        ));
    }

    #[test]
    fn test_hash_link_mismatch_rejected() {
        let prev = meta_block(10, 10);
        let mut curr = chain_next(&prev, 11);
        curr.prev_hash = Hash::compute(b"other");
        assert!(matches!(
            is_hdr_construction_valid(&header_of(curr), &header_of(prev)),
            Err(ProcessError::BlockHashMismatch)
        ));
    }

    #[test]
    fn test_rand_seed_mismatch_rejected() {
        let prev = meta_block(10, 10);
        let mut curr = chain_next(&prev, 11);
        curr.prev_rand_seed = Hash::compute(b"other");
        assert!(matches!(
            is_hdr_construction_valid(&header_of(curr), &header_of(prev)),
            Err(ProcessError::RandSeedMismatch)
        ));
    }

    #[test]
    fn test_stale_round_rejected() {
        let prev = meta_block(10, 10);
        let curr = chain_next(&prev, 10);
        assert!(matches!(
            is_hdr_construction_valid(&header_of(curr), &header_of(prev)),
            Err(ProcessError::LowerRoundInBlock)
        ));
    }
}
