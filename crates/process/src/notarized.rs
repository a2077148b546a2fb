//! Notarized header slices.

use crate::error::ProcessError;
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_types::{Header, ShardId};

/// Most recently notarized headers, per remote chain.
///
/// The metachain counts as one chain. Each slice is a short ordered buffer
/// whose tail is the latest notarized header; nonces are strictly
/// increasing along the slice and construction links hold between
/// consecutive entries, so callers append only sets that already passed
/// construction validation.
///
/// The slice is append-only within a cycle: the committer appends and
/// trims, the restorer pops.
pub struct NotarizedHeaders {
    inner: RwLock<HashMap<ShardId, Vec<Header>>>,
}

impl NotarizedHeaders {
    /// Seed each tracked chain with its start header.
    pub fn new(start_headers: HashMap<ShardId, Header>) -> Result<Self, ProcessError> {
        if start_headers.is_empty() {
            return Err(ProcessError::MissingHeader);
        }
        let inner = start_headers
            .into_iter()
            .map(|(shard, header)| (shard, vec![header]))
            .collect();
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// The latest notarized header of a chain.
    pub fn last(&self, shard: ShardId) -> Result<Header, ProcessError> {
        self.inner
            .read()
            .get(&shard)
            .and_then(|slice| slice.last())
            .cloned()
            .ok_or(ProcessError::MissingNotarizedHeader(shard))
    }

    /// Append the highest header of a construction-validated, processed
    /// set. Headers at or below the current tail nonce are ignored.
    pub fn save_last(&self, shard: ShardId, processed: &[Header]) -> Result<(), ProcessError> {
        let mut inner = self.inner.write();
        let slice = inner
            .get_mut(&shard)
            .ok_or(ProcessError::MissingNotarizedHeader(shard))?;
        let tail_nonce = slice.last().map(|h| h.nonce()).unwrap_or(0);

        let highest = processed
            .iter()
            .filter(|h| h.nonce() > tail_nonce)
            .max_by_key(|h| h.nonce());

        if let Some(header) = highest {
            slice.push(header.clone());
        }
        Ok(())
    }

    /// Drop the latest notarized header; the start header is never
    /// dropped.
    pub fn remove_last(&self, shard: ShardId) {
        let mut inner = self.inner.write();
        if let Some(slice) = inner.get_mut(&shard) {
            if slice.len() > 1 {
                slice.pop();
            }
        }
    }

    /// Keep at most the last `keep` entries of a chain's slice.
    pub fn trim_behind(&self, shard: ShardId, keep: usize) {
        let keep = keep.max(1);
        let mut inner = self.inner.write();
        if let Some(slice) = inner.get_mut(&shard) {
            if slice.len() > keep {
                let drop = slice.len() - keep;
                slice.drain(..drop);
            }
        }
    }

    /// Snapshot of a chain's slice, oldest first.
    pub fn tail(&self, shard: ShardId) -> Vec<Header> {
        self.inner.read().get(&shard).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_types::test_utils::meta_block;
    use tessera_types::METACHAIN_SHARD_ID;

    fn meta_header(nonce: u64) -> Header {
        Header::Meta(Arc::new(meta_block(nonce, nonce)))
    }

    fn notarized(start_nonce: u64) -> NotarizedHeaders {
        let mut start = HashMap::new();
        start.insert(METACHAIN_SHARD_ID, meta_header(start_nonce));
        NotarizedHeaders::new(start).unwrap()
    }

    #[test]
    fn test_empty_start_headers_rejected() {
        assert!(NotarizedHeaders::new(HashMap::new()).is_err());
    }

    #[test]
    fn test_save_last_appends_highest() {
        let slice = notarized(9);
        slice
            .save_last(
                METACHAIN_SHARD_ID,
                &[meta_header(10), meta_header(12), meta_header(11)],
            )
            .unwrap();

        assert_eq!(slice.last(METACHAIN_SHARD_ID).unwrap().nonce(), 12);
        assert_eq!(slice.tail(METACHAIN_SHARD_ID).len(), 2);
    }

    #[test]
    fn test_save_last_ignores_stale_headers() {
        let slice = notarized(9);
        slice
            .save_last(METACHAIN_SHARD_ID, &[meta_header(8), meta_header(9)])
            .unwrap();
        assert_eq!(slice.last(METACHAIN_SHARD_ID).unwrap().nonce(), 9);
        assert_eq!(slice.tail(METACHAIN_SHARD_ID).len(), 1);
    }

    #[test]
    fn test_nonces_strictly_increase() {
        let slice = notarized(9);
        slice.save_last(METACHAIN_SHARD_ID, &[meta_header(10)]).unwrap();
        slice.save_last(METACHAIN_SHARD_ID, &[meta_header(11)]).unwrap();
        slice.save_last(METACHAIN_SHARD_ID, &[meta_header(11)]).unwrap();

        let nonces: Vec<u64> = slice
            .tail(METACHAIN_SHARD_ID)
            .iter()
            .map(|h| h.nonce())
            .collect();
        assert_eq!(nonces, vec![9, 10, 11]);
    }

    #[test]
    fn test_remove_last_keeps_start_header() {
        let slice = notarized(9);
        slice.save_last(METACHAIN_SHARD_ID, &[meta_header(10)]).unwrap();

        slice.remove_last(METACHAIN_SHARD_ID);
        assert_eq!(slice.last(METACHAIN_SHARD_ID).unwrap().nonce(), 9);

        // The start header survives further removals.
        slice.remove_last(METACHAIN_SHARD_ID);
        assert_eq!(slice.last(METACHAIN_SHARD_ID).unwrap().nonce(), 9);
    }

    #[test]
    fn test_trim_behind_keeps_tail() {
        let slice = notarized(9);
        for nonce in 10..15 {
            slice.save_last(METACHAIN_SHARD_ID, &[meta_header(nonce)]).unwrap();
        }

        slice.trim_behind(METACHAIN_SHARD_ID, 2);

        let nonces: Vec<u64> = slice
            .tail(METACHAIN_SHARD_ID)
            .iter()
            .map(|h| h.nonce())
            .collect();
        assert_eq!(nonces, vec![13, 14]);
    }

    #[test]
    fn test_unknown_shard_is_an_error() {
        let slice = notarized(9);
        assert!(matches!(
            slice.last(ShardId(7)),
            Err(ProcessError::MissingNotarizedHeader(ShardId(7)))
        ));
    }
}
